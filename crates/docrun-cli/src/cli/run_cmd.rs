//! CLI handler for `docrun run <file>`.

use std::path::Path;

use anyhow::{Context, Result};

use docrun::splice::{render_fragment, render_transcripts};
use docrun::{DocrunConfig, OutputFormat, Pipeline};

use crate::cli::output;

/// Run one example and print its fragment.
pub async fn run(
    config: DocrunConfig,
    file: &Path,
    format: Option<OutputFormat>,
    transcript_only: bool,
) -> Result<()> {
    let format = format.unwrap_or(config.render.format);
    let title = config.render.admonition_title.clone();

    let mut pipeline = Pipeline::new(config)?;
    let (example, run) = pipeline
        .run_file(file)
        .await
        .with_context(|| format!("failed to run {}", file.display()))?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "file": example.path,
            "module": example.module,
            "port": run.port,
            "transcripts": run.transcripts,
        }));
    } else if transcript_only {
        println!("{}", render_transcripts(&run.transcripts));
    } else {
        print!("{}", render_fragment(&example, &run.transcripts, &title, format));
    }

    Ok(())
}
