//! Error types for example discovery, execution, and rendering.

use std::path::PathBuf;

/// All errors that can occur while running documentation examples.
#[derive(thiserror::Error, Debug)]
pub enum DocrunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {}: {source}", .path.display())]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    /// A `run:` directive that cannot be turned into a request.
    #[error("{}:{line}: {message}", .file.display())]
    Directive {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("No application object found in {}", .0.display())]
    NoApplication(PathBuf),

    #[error("No free port left in {start}..={end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("Server for {} failed to start after {attempts} attempt(s): {reason}", .file.display())]
    StartupFailed {
        file: PathBuf,
        attempts: u32,
        reason: String,
    },

    #[error("Request `{command}` failed: {source}")]
    Request {
        command: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request succeeded at the transport level but produced nothing to show.
    #[error("Example {}:{line} yielded no output for `{command}`", .file.display())]
    EmptyResponse {
        file: PathBuf,
        line: usize,
        command: String,
    },

    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DocrunError {
    pub fn config(message: impl Into<String>) -> Self {
        DocrunError::Config(message.into())
    }

    pub fn io_with_path(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DocrunError::IoPath {
            path: path.into(),
            source,
        }
    }
}

impl From<walkdir::Error> for DocrunError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(|p| p.to_path_buf());
        match path {
            Some(path) => DocrunError::IoPath {
                path,
                source: e.into(),
            },
            None => DocrunError::Io(e.into()),
        }
    }
}

/// Convenience result type.
pub type DocrunResult<T> = Result<T, DocrunError>;
