//! Subcommand implementations for the `docrun` binary.

pub mod build_cmd;
pub mod config_cmd;
pub mod doctor;
pub mod extract_cmd;
pub mod list_cmd;
pub mod output;
pub mod run_cmd;
