//! CLI handlers for `docrun config show|path|init`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use docrun::{DocrunConfig, CONFIG_FILE_NAME};

use crate::cli::output;

/// Print the effective configuration.
pub fn show(config_path: Option<&str>) -> Result<()> {
    let config = DocrunConfig::load(config_path).context("failed to load configuration")?;
    if output::is_json() {
        output::print_json(&config);
    } else {
        print!("{}", config.to_toml_string()?);
    }
    Ok(())
}

/// Print which config file is in use.
pub fn path(config_path: Option<&str>) -> Result<()> {
    let resolved = DocrunConfig::resolve_path(config_path);
    if output::is_json() {
        output::print_json(&serde_json::json!({ "path": resolved }));
        return Ok(());
    }
    match resolved {
        Some(path) => println!("{}", path.display()),
        None => println!("(no config file, using defaults)"),
    }
    Ok(())
}

/// Write the default configuration.
pub fn init(config_path: Option<&str>, force: bool) -> Result<()> {
    let target = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    write_default(&target, force)?;

    if output::is_json() {
        output::print_json(&serde_json::json!({ "created": target }));
    } else {
        println!("Created {}", target.display());
    }
    Ok(())
}

fn write_default(target: &Path, force: bool) -> Result<()> {
    if target.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }
    let content = DocrunConfig::default().to_toml_string()?;
    std::fs::write(target, content)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(())
}
