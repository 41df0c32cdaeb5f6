//! CLI handler for `docrun list [root]`.

use std::path::Path;

use anyhow::{Context, Result};

use docrun::{DocrunConfig, Scanner};

use crate::cli::output;

/// List every runnable example under `root`.
pub fn run(config: DocrunConfig, root: &Path) -> Result<()> {
    let scanner = Scanner::new(&config.scan)?;
    let examples = scanner
        .scan_dir(root)
        .with_context(|| format!("failed to scan {}", root.display()))?;

    if output::is_json() {
        output::print_json(&examples);
        return Ok(());
    }

    if examples.is_empty() {
        println!("  No runnable examples under {}.", root.display());
        return Ok(());
    }

    println!("  {} runnable example(s):\n", examples.len());
    println!("  {:<48}  {:<12}  {}", "file", "app", "directives");
    println!("  {}  {}  {}", "-".repeat(48), "-".repeat(12), "-".repeat(10));
    for example in &examples {
        let app = example.app.as_ref().map_or("-", |a| a.name.as_str());
        println!(
            "  {:<48}  {:<12}  {}",
            example.relative.display().to_string(),
            app,
            example.directives.len()
        );
    }
    Ok(())
}
