//! Configuration loading and resolution.
//!
//! Configuration lives in a `docrun.toml` file. Every field has a default, so
//! a missing file or a partial file is always valid. The file is resolved in
//! this order: explicit path, `DOCRUN_CONFIG`, `./docrun.toml`, built-in
//! defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DocrunError, DocrunResult};

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "docrun.toml";

/// Environment variable that points at a config file.
pub const CONFIG_ENV_VAR: &str = "DOCRUN_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocrunConfig {
    pub scan: ScanConfig,
    pub server: ServerConfig,
    pub request: RequestConfig,
    pub render: RenderConfig,
}

/// How example files are found and read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Globs a path must match to be considered an example.
    pub include: Vec<String>,
    /// Globs that exclude a path even when it matches `include`.
    pub exclude: Vec<String>,
    /// Line comment marker that introduces a `run:` directive.
    pub comment_prefix: String,
    /// Regex locating the application object. Must contain a `name` group.
    pub app_pattern: String,
    /// Language used for rendered code blocks and `:language:` matching.
    pub language: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: vec!["*.py".to_string()],
            exclude: Vec::new(),
            comment_prefix: "#".to_string(),
            app_pattern: r"^(?P<name>app)\s*(?::[^=]+)?=[^=]".to_string(),
            language: "python".to_string(),
        }
    }
}

/// How example servers are launched and stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Program and arguments. Supports `{module}`, `{app}`, `{file}`,
    /// `{host}` and `{port}` placeholders.
    pub command: Vec<String>,
    pub host: String,
    /// Lowest port of the pool (inclusive).
    pub port_start: u16,
    /// Highest port of the pool (inclusive). Ports are handed out from here down.
    pub port_end: u16,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Ports tried before giving up on a single example.
    pub startup_attempts: u32,
    /// Directory the server runs in. Also the root for `{module}` paths.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the server process.
    pub env: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: [
                "uvicorn",
                "{module}:{app}",
                "--host",
                "{host}",
                "--port",
                "{port}",
                "--no-access-log",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            host: "127.0.0.1".to_string(),
            port_start: 9000,
            port_end: 9998,
            startup_timeout_ms: 100_000,
            poll_interval_ms: 100,
            shutdown_grace_ms: 5_000,
            startup_attempts: 5,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// How requests are issued and shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    /// Host shown in transcripts instead of the real one.
    pub display_host: String,
    /// Port shown in transcripts instead of the ephemeral one.
    pub display_port: u16,
    /// Fail the build when a request yields no output.
    pub strict: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            display_host: "127.0.0.1".to_string(),
            display_port: 8000,
            strict: true,
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Output markup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Rst,
    Markdown,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rst" | "restructuredtext" => Ok(OutputFormat::Rst),
            "md" | "markdown" | "myst" => Ok(OutputFormat::Markdown),
            other => Err(format!(
                "unknown output format '{other}' (expected rst or markdown)"
            )),
        }
    }
}

/// How transcripts are rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Format used by `docrun run`. Pages are rendered in their own markup.
    pub format: OutputFormat,
    pub admonition_title: String,
    /// Directory under the build output that receives cleaned example copies.
    pub examples_dir: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Rst,
            admonition_title: "Run it".to_string(),
            examples_dir: "_examples".to_string(),
        }
    }
}

impl DocrunConfig {
    /// Resolve the config file path, if any applies.
    ///
    /// An explicit path or `DOCRUN_CONFIG` is returned even when the file is
    /// missing so that loading reports it; `./docrun.toml` only when present.
    pub fn resolve_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            if !env_path.is_empty() {
                return Some(PathBuf::from(env_path));
            }
        }

        let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        None
    }

    /// Load the resolved config file, falling back to defaults.
    pub fn load(explicit: Option<&str>) -> DocrunResult<Self> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> DocrunResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DocrunError::io_with_path(e, path))?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            DocrunError::Toml(inner) => {
                DocrunError::config(format!("failed to parse {}: {inner}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> DocrunResult<Self> {
        let config: DocrunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> DocrunResult<String> {
        toml::to_string_pretty(self).map_err(|e| DocrunError::config(e.to_string()))
    }

    /// Reject values that would only fail later, mid-build.
    pub fn validate(&self) -> DocrunResult<()> {
        if self.scan.comment_prefix.trim().is_empty() {
            return Err(DocrunError::config("scan.comment_prefix must not be empty"));
        }
        if self.scan.include.is_empty() {
            return Err(DocrunError::config("scan.include must list at least one glob"));
        }
        for pattern in self.scan.include.iter().chain(&self.scan.exclude) {
            glob::Pattern::new(pattern)
                .map_err(|e| DocrunError::Pattern(format!("glob '{pattern}': {e}")))?;
        }

        let app_re = Regex::new(&self.scan.app_pattern)
            .map_err(|e| DocrunError::Pattern(format!("scan.app_pattern: {e}")))?;
        if !app_re.capture_names().flatten().any(|n| n == "name") {
            return Err(DocrunError::config(
                "scan.app_pattern must contain a (?P<name>...) group",
            ));
        }

        match self.server.command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => return Err(DocrunError::config("server.command must name a program")),
        }
        if self.server.port_start > self.server.port_end {
            return Err(DocrunError::config(format!(
                "server.port_start ({}) is greater than server.port_end ({})",
                self.server.port_start, self.server.port_end
            )));
        }
        if self.server.port_start == 0 {
            return Err(DocrunError::config("server.port_start must be non-zero"));
        }
        if self.server.startup_attempts == 0 {
            return Err(DocrunError::config("server.startup_attempts must be at least 1"));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(DocrunError::config("server.poll_interval_ms must be non-zero"));
        }

        let dir = &self.render.examples_dir;
        if dir.is_empty() || dir.contains(['/', '\\']) || dir == "." || dir == ".." {
            return Err(DocrunError::config(
                "render.examples_dir must be a single directory name",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DocrunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port_end, 9998);
        assert_eq!(config.request.display_port, 8000);
        assert!(config.request.strict);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = DocrunConfig::from_toml_str(
            r#"
            [server]
            command = ["python", "-m", "myserver", "--port", "{port}"]
            port_start = 7000
            port_end = 7010

            [request]
            strict = false
            "#,
        )
        .unwrap();

        assert_eq!(config.server.command[0], "python");
        assert_eq!(config.server.port_start, 7000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.request.strict);
        assert_eq!(config.scan.comment_prefix, "#");
        assert_eq!(config.render.admonition_title, "Run it");
    }

    #[test]
    fn test_format_and_env_parse() {
        let config = DocrunConfig::from_toml_str(
            r#"
            [render]
            format = "markdown"

            [server.env]
            APP_ENV = "docs"
            "#,
        )
        .unwrap();
        assert_eq!(config.render.format, OutputFormat::Markdown);
        assert_eq!(config.server.env.get("APP_ENV").map(String::as_str), Some("docs"));
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let err = DocrunConfig::from_toml_str(
            r#"
            [server]
            port_start = 9100
            port_end = 9000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("port_start"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = DocrunConfig::from_toml_str("[server]\ncommand = []\n").unwrap_err();
        assert!(matches!(err, DocrunError::Config(_)));
    }

    #[test]
    fn test_app_pattern_requires_name_group() {
        let err = DocrunConfig::from_toml_str("[scan]\napp_pattern = '^app = '\n").unwrap_err();
        assert!(err.to_string().contains("name"));

        let err = DocrunConfig::from_toml_str("[scan]\napp_pattern = '(?P<name>'\n").unwrap_err();
        assert!(matches!(err, DocrunError::Pattern(_)));
    }

    #[test]
    fn test_examples_dir_must_be_single_component() {
        let err =
            DocrunConfig::from_toml_str("[render]\nexamples_dir = 'a/b'\n").unwrap_err();
        assert!(err.to_string().contains("examples_dir"));
    }

    #[test]
    fn test_toml_string_loads_back() {
        let mut config = DocrunConfig::default();
        config.server.working_dir = Some(PathBuf::from("docs"));
        config.render.format = OutputFormat::Markdown;

        let text = config.to_toml_string().unwrap();
        let loaded = DocrunConfig::from_toml_str(&text).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("RST".parse::<OutputFormat>().unwrap(), OutputFormat::Rst);
        assert_eq!("myst".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("html".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docrun.toml");
        std::fs::write(&path, "[server\n").unwrap();
        let err = DocrunConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("docrun.toml"));

        let missing = DocrunConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, DocrunError::IoPath { .. }));
    }

    #[test]
    fn test_explicit_path_wins() {
        let resolved = DocrunConfig::resolve_path(Some("custom/docrun.toml"));
        assert_eq!(resolved, Some(PathBuf::from("custom/docrun.toml")));
    }
}
