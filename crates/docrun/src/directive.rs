//! Extraction of `run:` marker comments from example sources.
//!
//! A directive is a line that starts in column 0 with the comment prefix,
//! one or more spaces, then `run:`:
//!
//! ```text
//! # run: /hello
//! # run: /items -X POST -H "Content-Type: application/json" -d '{"name": "x"}'
//! ```
//!
//! Everything after the colon is split with shell quoting rules and handed to
//! the request runner. Directive lines are removed from the cleaned source;
//! every other line is kept in order.

use std::path::Path;

use regex::Regex;

use crate::error::{DocrunError, DocrunResult};
use crate::types::Directive;

/// Build the directive regex for a comment prefix.
pub fn directive_regex(comment_prefix: &str) -> DocrunResult<Regex> {
    Regex::new(&format!(r"^{} +run:(.*)$", regex::escape(comment_prefix)))
        .map_err(|e| DocrunError::Pattern(e.to_string()))
}

/// Split `content` into the cleaned source and its directives.
///
/// `file` is only used to label errors.
pub fn extract_run_args(
    content: &str,
    comment_prefix: &str,
    file: &Path,
) -> DocrunResult<(String, Vec<Directive>)> {
    let re = directive_regex(comment_prefix)?;

    let mut cleaned = Vec::new();
    let mut directives = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let lno = idx + 1;
        let Some(caps) = re.captures(line) else {
            cleaned.push(line);
            continue;
        };

        let raw = caps.get(1).map_or("", |m| m.as_str()).trim_start();
        let args = shlex::split(raw).ok_or_else(|| DocrunError::Directive {
            file: file.to_path_buf(),
            line: lno,
            message: format!("unbalanced quoting in run directive {raw:?}"),
        })?;
        if args.is_empty() {
            return Err(DocrunError::Directive {
                file: file.to_path_buf(),
                line: lno,
                message: "run directive has no request path".to_string(),
            });
        }

        directives.push(Directive {
            line: lno,
            raw: raw.to_string(),
            args,
        });
    }

    Ok((cleaned.join("\n"), directives))
}
