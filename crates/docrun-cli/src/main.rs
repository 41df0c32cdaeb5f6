//! docrun: run documentation examples and splice their HTTP transcripts into the docs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use docrun::{DocrunConfig, OutputFormat};

mod cli;

#[derive(Parser)]
#[command(
    name = "docrun",
    about = "Run documentation examples against a live server and splice the transcripts into the docs",
    version,
    after_help = "Run 'docrun <command> --help' for details on each command."
)]
struct Cli {
    /// Path to docrun.toml (overrides DOCRUN_CONFIG and ./docrun.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an example's cleaned source and its run directives
    Extract {
        /// Example source file.
        file: PathBuf,
    },

    /// List runnable examples under a directory
    List {
        /// Directory to scan. Defaults to server.working_dir, then the current directory.
        root: Option<PathBuf>,
    },

    /// Run one example and print the rendered fragment
    Run {
        /// Example source file.
        file: PathBuf,

        /// Markup for the fragment (rst, markdown). Defaults to render.format.
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Print only the transcripts, without the source block.
        #[arg(long)]
        transcript_only: bool,
    },

    /// Copy a documentation tree, running every included example
    Build {
        /// Documentation source directory.
        source: PathBuf,

        /// Output directory.
        out: PathBuf,
    },

    /// Check that examples can be run in this environment
    Check,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   docrun completions bash > ~/.local/share/bash-completion/completions/docrun
    ///   docrun completions zsh > ~/.zfunc/_docrun
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file in use
    Path,
    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&str>) -> Result<DocrunConfig> {
    DocrunConfig::load(path).context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli::output::set_json(cli.json);
    let config_path = cli.config.as_deref();
    tracing::debug!(config = ?config_path, "docrun starting");

    let result = match cli.command {
        Commands::Extract { file } => match load_config(config_path) {
            Ok(config) => cli::extract_cmd::run(config, &file),
            Err(e) => Err(e),
        },
        Commands::List { root } => match load_config(config_path) {
            Ok(config) => {
                let root = root
                    .or_else(|| config.server.working_dir.clone())
                    .unwrap_or_else(|| PathBuf::from("."));
                cli::list_cmd::run(config, &root)
            }
            Err(e) => Err(e),
        },
        Commands::Run {
            file,
            format,
            transcript_only,
        } => match load_config(config_path) {
            Ok(config) => cli::run_cmd::run(config, &file, format, transcript_only).await,
            Err(e) => Err(e),
        },
        Commands::Build { source, out } => match load_config(config_path) {
            Ok(config) => cli::build_cmd::run(config, &source, &out).await,
            Err(e) => Err(e),
        },
        Commands::Check => cli::doctor::run(config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::config_cmd::show(config_path),
            ConfigAction::Path => cli::config_cmd::path(config_path),
            ConfigAction::Init { force } => cli::config_cmd::init(config_path, force),
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "docrun", &mut std::io::stdout());
            Ok(())
        }
    };

    // 0=success, 1=error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
