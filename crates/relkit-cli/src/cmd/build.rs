//! Build command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Run the full build graph.
pub async fn build(
    config: &Path,
    offline: bool,
    target: Option<&str>,
    output: Output,
) -> Result<()> {
    let graph = super::load_graph(config, offline)?;
    output.info(&format!(
        "Building {} {}",
        graph.config().project.name,
        graph.config().project.version
    ));
    let reports = graph.build(target).await.context("Build failed")?;
    super::print_reports(output, &reports);
    Ok(())
}
