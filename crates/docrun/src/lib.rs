//! Docrun: execute documentation examples and splice their HTTP transcripts into the docs.

pub mod config;
pub mod directive;
pub mod error;
pub mod launcher;
pub mod pages;
pub mod pipeline;
pub mod request;
pub mod runner;
pub mod scanner;
pub mod splice;
pub mod types;

pub use config::{DocrunConfig, OutputFormat, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
pub use directive::extract_run_args;
pub use error::{DocrunError, DocrunResult};
pub use launcher::{launch, PortPool, RunningServer};
pub use pipeline::Pipeline;
pub use request::RequestSpec;
pub use runner::RequestRunner;
pub use scanner::Scanner;
pub use splice::{render_admonition, render_fragment, render_transcripts};
pub use types::*;
