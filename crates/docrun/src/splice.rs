//! Rendering of cleaned examples and transcripts as documentation markup.

use crate::config::OutputFormat;
use crate::types::{ExampleFile, Transcript};

/// Successful transcripts, one after another.
pub fn render_transcripts(transcripts: &[Transcript]) -> String {
    transcripts
        .iter()
        .filter(|t| t.success)
        .map(Transcript::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A code block in the given markup.
pub fn render_code_block(language: &str, content: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Rst => {
            format!(".. code-block:: {language}\n\n{}\n", indent(content, "   "))
        }
        OutputFormat::Markdown => {
            let fence = fence_for(content, 3);
            format!("{fence}{language}\n{}\n{fence}\n", content.trim_end_matches('\n'))
        }
    }
}

/// The "Run it" admonition holding the transcripts, or `None` when no
/// transcript produced output.
pub fn render_admonition(
    title: &str,
    transcripts: &[Transcript],
    format: OutputFormat,
) -> Option<String> {
    let body = render_transcripts(transcripts);
    if body.is_empty() {
        return None;
    }

    let console = render_code_block("console", &body, format);
    Some(match format {
        OutputFormat::Rst => format!(".. admonition:: {title}\n\n{}", indent(&console, "   ")),
        OutputFormat::Markdown => {
            let fence = fence_for(&console, 4);
            format!("{fence}{{admonition}} {title}\n{console}{fence}\n")
        }
    })
}

/// Cleaned source followed by the admonition.
pub fn render_fragment(
    example: &ExampleFile,
    transcripts: &[Transcript],
    title: &str,
    format: OutputFormat,
) -> String {
    let mut out = render_code_block(&example.language, &example.cleaned, format);
    if let Some(admonition) = render_admonition(title, transcripts, format) {
        out.push('\n');
        out.push_str(&admonition);
    }
    out
}

/// Prefix every non-empty line; blank lines stay empty.
pub fn indent(text: &str, prefix: &str) -> String {
    let mut out = text
        .trim_end_matches('\n')
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// A backtick fence longer than any backtick run inside `content`.
fn fence_for(content: &str, min: usize) -> String {
    let longest = content
        .lines()
        .map(|line| line.trim_start().chars().take_while(|&c| c == '`').count())
        .max()
        .unwrap_or(0);
    "`".repeat(min.max(longest + 1))
}
