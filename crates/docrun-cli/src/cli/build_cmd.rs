//! CLI handler for `docrun build <source> <out>`.

use std::path::Path;

use anyhow::{Context, Result};

use docrun::{DocrunConfig, Pipeline};

use crate::cli::output;

pub async fn run(config: DocrunConfig, source: &Path, out: &Path) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let report = pipeline
        .build(source, out)
        .await
        .with_context(|| format!("failed to build {}", source.display()))?;

    if output::is_json() {
        output::print_json(&report);
        return Ok(());
    }

    println!("Built {} into {}", source.display(), out.display());
    println!("  Pages scanned:     {}", report.pages_scanned);
    println!("  Pages rewritten:   {}", report.pages_rewritten);
    println!("  Files copied:      {}", report.files_copied);
    println!("  Examples run:      {}", report.examples_run);
    println!("  Directives run:    {}", report.directives_run);
    if report.directives_failed > 0 {
        println!("  Empty responses:   {}", report.directives_failed);
    }
    Ok(())
}
