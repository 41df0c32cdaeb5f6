//! Environment readiness check for `docrun check`.

use std::path::PathBuf;

use anyhow::{bail, Result};

use docrun::{DocrunConfig, PortPool};

use crate::cli::output;

/// Check the config, the launcher program, and the port pool.
pub async fn run(config_path: Option<&str>) -> Result<()> {
    let source = DocrunConfig::resolve_path(config_path);
    let (config, config_line) = match DocrunConfig::load(config_path) {
        Ok(config) => {
            let line = match &source {
                Some(path) => format!("[OK] Config loaded: {}", path.display()),
                None => "[OK] No config file, using defaults".to_string(),
            };
            (Some(config), line)
        }
        Err(e) => (None, format!("[!!] Config invalid: {e}")),
    };

    let (program, program_path) = match &config {
        Some(config) => {
            let program = config.server.command.first().cloned().unwrap_or_default();
            let found = find_program(&program, config.server.working_dir.as_ref());
            (Some(program), found)
        }
        None => (None, None),
    };

    let free_port = config.as_ref().and_then(|config| {
        PortPool::from_config(&config.server)
            .take_free(&config.server.host)
            .ok()
    });

    let ready = config.is_some() && program_path.is_some() && free_port.is_some();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "config": source,
            "config_ok": config.is_some(),
            "program": program,
            "program_path": program_path,
            "free_port": free_port,
            "ready": ready,
        }));
    } else {
        println!("Docrun Check");
        println!("============");
        println!();
        println!("{config_line}");

        if let Some(program) = &program {
            match &program_path {
                Some(path) => println!("[OK] Server program found: {}", path.display()),
                None => println!("[!!] Server program '{program}' NOT found on PATH"),
            }
        }

        if let Some(config) = &config {
            match free_port {
                Some(port) => println!("[OK] Free port available: {port}"),
                None => println!(
                    "[!!] No free port in {}..={} on {}",
                    config.server.port_start, config.server.port_end, config.server.host
                ),
            }
        }

        println!();
        println!("Status: {}", if ready { "READY" } else { "NOT READY" });
    }

    if !ready {
        bail!("environment is not ready to run examples");
    }
    Ok(())
}

/// Resolve a program through `PATH`, or relative to the server working directory.
fn find_program(program: &str, working_dir: Option<&PathBuf>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    match working_dir {
        Some(dir) if program.contains('/') => {
            let path = dir.join(program);
            path.is_file().then_some(path)
        }
        _ => which::which(program).ok(),
    }
}
