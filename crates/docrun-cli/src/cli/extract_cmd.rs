//! CLI handler for `docrun extract <file>`.

use std::path::Path;

use anyhow::{Context, Result};

use docrun::{DocrunConfig, Pipeline};

use crate::cli::output;

/// Show what the scanner sees in an example without starting a server.
pub fn run(config: DocrunConfig, file: &Path) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let example = pipeline
        .scan(file)
        .with_context(|| format!("failed to scan {}", file.display()))?;

    if output::is_json() {
        output::print_json(&example);
        return Ok(());
    }

    println!("File:   {}", example.path.display());
    println!("Module: {}", example.module);
    match &example.app {
        Some(app) => println!("App:    {} (line {})", app.name, app.line),
        None => println!("App:    none found"),
    }
    println!();

    if example.directives.is_empty() {
        println!("  No run directives.");
    } else {
        println!("  {} directive(s):", example.directives.len());
        for directive in &example.directives {
            println!("  {:>5}  {}", directive.line, directive.raw);
        }
    }

    println!();
    println!("{}", example.cleaned);
    Ok(())
}
