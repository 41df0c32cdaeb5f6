//! `literalinclude` blocks in documentation pages.
//!
//! Two markups are understood:
//!
//! ```text
//! .. literalinclude:: /examples/hello.py
//!    :language: python
//!    :caption: hello.py
//! ```
//!
//! and the MyST form
//!
//! ````text
//! ```{literalinclude} /examples/hello.py
//! :language: python
//! ```
//! ````
//!
//! A runnable include is rewritten to point at the cleaned copy of the
//! example and followed by the transcript admonition. Everything else in the
//! page is kept byte-for-byte.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::OutputFormat;

/// Markup of a documentation page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Rst,
    Markdown,
}

impl PageKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "rst" => Some(PageKind::Rst),
            "md" => Some(PageKind::Markdown),
            _ => None,
        }
    }

    pub fn format(self) -> OutputFormat {
        match self {
            PageKind::Rst => OutputFormat::Rst,
            PageKind::Markdown => OutputFormat::Markdown,
        }
    }
}

/// One `literalinclude` block, as line indices into the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeBlock {
    /// Line of the directive itself.
    pub start: usize,
    /// One past the last line of the block.
    pub end: usize,
    pub target: String,
    pub options: Vec<(String, String)>,
    /// Leading whitespace of the directive line.
    pub indent: String,
    /// Opening fence for MyST blocks.
    fence: Option<String>,
}

impl IncludeBlock {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|(n, _)| n == name)
    }

    /// Resolve the target the way Sphinx does: `/`-prefixed paths are
    /// relative to the source root, everything else to the page directory.
    pub fn resolve(&self, source_root: &Path, page_dir: &Path) -> PathBuf {
        match self.target.strip_prefix('/') {
            Some(rooted) => source_root.join(rooted),
            None => page_dir.join(&self.target),
        }
    }

    /// The block with its target replaced, followed by `trailer` when given.
    pub fn rewrite(&self, lines: &[&str], new_target: &str, trailer: Option<&str>) -> Vec<String> {
        let mut out = Vec::with_capacity(self.end - self.start + 8);
        out.push(match &self.fence {
            Some(fence) => format!("{}{fence}{{literalinclude}} {new_target}", self.indent),
            None => format!("{}.. literalinclude:: {new_target}", self.indent),
        });
        out.extend(lines[self.start + 1..self.end].iter().map(|l| l.to_string()));

        if let Some(trailer) = trailer {
            out.push(String::new());
            out.extend(trailer.trim_end_matches('\n').lines().map(|line| {
                if line.is_empty() {
                    String::new()
                } else {
                    format!("{}{line}", self.indent)
                }
            }));
        }
        out
    }
}

fn rst_directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)\.\.\s+literalinclude::\s*(\S+)\s*$").expect("static regex")
    })
}

fn myst_directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)(`{3,})\{literalinclude\}\s+(\S+)\s*$").expect("static regex")
    })
}

fn option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*):([\w-]+):\s*(.*?)\s*$").expect("static regex"))
}

/// Find every `literalinclude` block in a page.
pub fn find_includes(lines: &[&str], kind: PageKind) -> Vec<IncludeBlock> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let found = match kind {
            PageKind::Rst => parse_rst_block(lines, i),
            PageKind::Markdown => parse_myst_block(lines, i),
        };
        match found {
            Some(block) => {
                i = block.end;
                blocks.push(block);
            }
            None => i += 1,
        }
    }
    blocks
}

fn parse_rst_block(lines: &[&str], start: usize) -> Option<IncludeBlock> {
    let caps = rst_directive_re().captures(lines[start])?;
    let indent = caps[1].to_string();
    let target = caps[2].to_string();

    let mut options = Vec::new();
    let mut end = start + 1;
    while let Some(caps) = lines.get(end).and_then(|l| option_re().captures(l)) {
        if caps[1].len() <= indent.len() {
            break;
        }
        options.push((caps[2].to_string(), caps[3].to_string()));
        end += 1;
    }

    Some(IncludeBlock {
        start,
        end,
        target,
        options,
        indent,
        fence: None,
    })
}

fn parse_myst_block(lines: &[&str], start: usize) -> Option<IncludeBlock> {
    let caps = myst_directive_re().captures(lines[start])?;
    let indent = caps[1].to_string();
    let fence = caps[2].to_string();
    let target = caps[3].to_string();

    let mut options = Vec::new();
    let mut end = start + 1;
    while let Some(line) = lines.get(end) {
        let trimmed = line.trim();
        if trimmed.len() >= fence.len() && trimmed.chars().all(|c| c == '`') {
            return Some(IncludeBlock {
                start,
                end: end + 1,
                target,
                options,
                indent,
                fence: Some(fence),
            });
        }
        if let Some(caps) = option_re().captures(line) {
            options.push((caps[2].to_string(), caps[3].to_string()));
        }
        end += 1;
    }

    // unterminated fence
    None
}

/// File name for the cleaned copy of an example: separators become `_`.
pub fn cleaned_copy_name(relative: &Path) -> String {
    relative
        .to_string_lossy()
        .trim_start_matches(['/', '\\'])
        .replace(['/', '\\'], "_")
}
