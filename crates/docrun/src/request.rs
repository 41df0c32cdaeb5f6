//! Translation of directive arguments into HTTP requests.
//!
//! Directive arguments follow curl's command line: the first argument is the
//! URL path, the rest are the curl options an author would type. Only the
//! options that change the request or its printed output are understood.

/// A request parsed from directive arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    /// Path and query, always starting with `/`.
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// curl `-i`: print the status line and headers before the body.
    pub include_headers: bool,
    /// curl `-L`: follow redirects.
    pub follow_redirects: bool,
    /// Option tokens as written, for display.
    pub options: Vec<String>,
}

enum BodyKind {
    Form,
    Json,
}

impl RequestSpec {
    /// Parse directive arguments (`path` followed by curl options).
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let (path, rest) = args
            .split_first()
            .ok_or_else(|| "run directive has no request path".to_string())?;
        if !path.starts_with('/') {
            return Err(format!("request path must start with '/': {path:?}"));
        }

        let mut method: Option<String> = None;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut body: Option<(BodyKind, String)> = None;
        let mut include_headers = false;
        let mut follow_redirects = false;

        let mut tokens = rest.iter();
        while let Some(token) = tokens.next() {
            let (flag, inline) = split_flag(token);
            match flag {
                "-X" | "--request" => {
                    let value = take_value(flag, inline, &mut tokens)?;
                    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_alphabetic()) {
                        return Err(format!("invalid request method {value:?}"));
                    }
                    method = Some(value.to_ascii_uppercase());
                }
                "-H" | "--header" => {
                    let value = take_value(flag, inline, &mut tokens)?;
                    let (name, val) = value
                        .split_once(':')
                        .ok_or_else(|| format!("header must be 'Name: value', got {value:?}"))?;
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(format!("header has an empty name: {value:?}"));
                    }
                    headers.push((name.to_string(), val.trim().to_string()));
                }
                "-d" | "--data" | "--data-raw" | "--data-binary" => {
                    let value = take_value(flag, inline, &mut tokens)?;
                    body = Some(match body {
                        // curl joins repeated -d values with '&'
                        Some((BodyKind::Form, prev)) => (BodyKind::Form, format!("{prev}&{value}")),
                        _ => (BodyKind::Form, value),
                    });
                }
                "--json" => {
                    let value = take_value(flag, inline, &mut tokens)?;
                    body = Some((BodyKind::Json, value));
                }
                "-i" | "--include" => include_headers = true,
                "-I" | "--head" => {
                    include_headers = true;
                    method = Some("HEAD".to_string());
                }
                "-L" | "--location" => follow_redirects = true,
                "-s" | "--silent" | "-S" | "--show-error" => {}
                _ if is_short_cluster(token) => {
                    for c in token[1..].chars() {
                        match c {
                            'i' => include_headers = true,
                            'L' => follow_redirects = true,
                            's' | 'S' => {}
                            other => {
                                return Err(format!("unsupported curl option -{other} in {token:?}"))
                            }
                        }
                    }
                }
                _ => return Err(format!("unsupported curl option {token:?}")),
            }
        }

        let method = match (method, &body) {
            (Some(m), _) => m,
            (None, Some(_)) => "POST".to_string(),
            (None, None) => "GET".to_string(),
        };

        let body = body.map(|(kind, value)| {
            match kind {
                BodyKind::Form => {
                    default_header(&mut headers, "Content-Type", "application/x-www-form-urlencoded")
                }
                BodyKind::Json => {
                    default_header(&mut headers, "Content-Type", "application/json");
                    default_header(&mut headers, "Accept", "application/json");
                }
            }
            value
        });

        Ok(Self {
            path: path.clone(),
            method,
            headers,
            body,
            include_headers,
            follow_redirects,
            options: rest.to_vec(),
        })
    }

    /// Full URL against a base such as `http://127.0.0.1:9998`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }

    /// The command shown in documentation, pointing at the display address.
    pub fn display_command(&self, host: &str, port: u16) -> String {
        let url = self.url(&format!("http://{host}:{port}"));
        let words: Vec<&str> = std::iter::once("curl")
            .chain(std::iter::once(url.as_str()))
            .chain(self.options.iter().map(String::as_str))
            .collect();
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

/// Split `--name=value` and `-Xvalue` forms into flag and inline value.
fn split_flag(token: &str) -> (&str, Option<&str>) {
    if let Some(long) = token.strip_prefix("--") {
        if let Some((name, value)) = long.split_once('=') {
            return (&token[..name.len() + 2], Some(value));
        }
        return (token, None);
    }
    if token.len() > 2 && token.starts_with('-') && token.is_char_boundary(2) {
        let (flag, value) = token.split_at(2);
        if matches!(flag, "-X" | "-H" | "-d") {
            return (flag, Some(value));
        }
    }
    (token, None)
}

fn take_value<'a>(
    flag: &str,
    inline: Option<&str>,
    tokens: &mut impl Iterator<Item = &'a String>,
) -> Result<String, String> {
    match inline {
        Some(value) => Ok(value.to_string()),
        None => tokens
            .next()
            .cloned()
            .ok_or_else(|| format!("curl option {flag} needs a value")),
    }
}

/// `-si`, `-sSL` and similar bundles of value-less short flags.
fn is_short_cluster(token: &str) -> bool {
    token.len() > 2
        && token.starts_with('-')
        && !token.starts_with("--")
        && token[1..].chars().all(|c| c.is_ascii_alphabetic())
}

fn default_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
        headers.push((name.to_string(), value.to_string()));
    }
}
