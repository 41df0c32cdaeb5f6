//! Core data types for example files, directives, and transcripts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DocrunError, DocrunResult};

/// The application object an example file exposes to the server command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppObject {
    pub name: String,
    /// 1-based line of the first match.
    pub line: usize,
}

/// A `run:` marker comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// 1-based source line.
    pub line: usize,
    /// Text after `run:`, left-trimmed.
    pub raw: String,
    /// `raw` split with shell quoting rules. Never empty.
    pub args: Vec<String>,
}

/// A scanned example source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleFile {
    pub path: PathBuf,
    /// Path relative to the scan root.
    pub relative: PathBuf,
    /// Dotted module path (`docs/examples/hello.py` -> `docs.examples.hello`).
    pub module: String,
    pub app: Option<AppObject>,
    pub directives: Vec<Directive>,
    /// Source with every directive line removed.
    pub cleaned: String,
    pub language: String,
}

impl ExampleFile {
    /// True when the file carries at least one directive.
    pub fn is_runnable(&self) -> bool {
        !self.directives.is_empty()
    }

    pub fn require_app(&self) -> DocrunResult<&AppObject> {
        self.app
            .as_ref()
            .ok_or_else(|| DocrunError::NoApplication(self.path.clone()))
    }
}

/// Captured result of one directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub line: usize,
    /// Display form of the request, e.g. `curl http://127.0.0.1:8000/`.
    pub command: String,
    pub output: String,
    pub status: Option<u16>,
    /// False when the request produced only whitespace or nothing.
    pub success: bool,
}

impl Transcript {
    /// `> <command>` followed by the output lines.
    pub fn render(&self) -> String {
        std::iter::once(format!("> {}", self.command))
            .chain(self.output.lines().map(str::to_string))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// All transcripts produced for one example file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleRun {
    pub file: PathBuf,
    /// Port the server actually listened on.
    pub port: u16,
    pub transcripts: Vec<Transcript>,
}

impl ExampleRun {
    pub fn failed_count(&self) -> usize {
        self.transcripts.iter().filter(|t| !t.success).count()
    }
}

/// Counters for a documentation build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub files_copied: usize,
    pub pages_scanned: usize,
    pub pages_rewritten: usize,
    pub examples_run: usize,
    pub directives_run: usize,
    pub directives_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(output: &str, success: bool) -> Transcript {
        Transcript {
            line: 3,
            command: "curl http://127.0.0.1:8000/".to_string(),
            output: output.to_string(),
            status: Some(200),
            success,
        }
    }

    #[test]
    fn test_transcript_render_prefixes_command() {
        let t = transcript("{\"hello\": \"world\"}\n", true);
        assert_eq!(
            t.render(),
            "> curl http://127.0.0.1:8000/\n{\"hello\": \"world\"}"
        );
    }

    #[test]
    fn test_transcript_render_multiline_output() {
        let t = transcript("line one\r\nline two\n", true);
        assert_eq!(
            t.render(),
            "> curl http://127.0.0.1:8000/\nline one\nline two"
        );
    }

    #[test]
    fn test_require_app_missing() {
        let file = ExampleFile {
            path: PathBuf::from("examples/no_app.py"),
            relative: PathBuf::from("no_app.py"),
            module: "no_app".to_string(),
            app: None,
            directives: vec![],
            cleaned: String::new(),
            language: "python".to_string(),
        };
        assert!(!file.is_runnable());
        assert!(matches!(
            file.require_app(),
            Err(DocrunError::NoApplication(_))
        ));
    }

    #[test]
    fn test_failed_count() {
        let run = ExampleRun {
            file: PathBuf::from("a.py"),
            port: 9998,
            transcripts: vec![transcript("ok", true), transcript("", false)],
        };
        assert_eq!(run.failed_count(), 1);
    }
}
