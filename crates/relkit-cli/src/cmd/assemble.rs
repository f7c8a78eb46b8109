//! Assemble command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Assemble distributions, staging whatever bundles they read from.
pub async fn assemble(
    config: &Path,
    offline: bool,
    target: Option<&str>,
    output: Output,
) -> Result<()> {
    let graph = super::load_graph(config, offline)?;
    let reports = graph.assemble(target).await.context("Assembly failed")?;
    super::print_reports(output, &reports);
    Ok(())
}
