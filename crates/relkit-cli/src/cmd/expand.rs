//! Expand command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Resolve and stage every bundle.
pub async fn expand(config: &Path, offline: bool, output: Output) -> Result<()> {
    let graph = super::load_graph(config, offline)?;
    let staged = graph.expand().await.context("Staging failed")?;

    if staged.is_empty() {
        output.warning("No bundles configured");
    }
    for (id, staging) in &staged {
        output.data(&staging.destination_path.display().to_string());
        let state = if staging.refreshed {
            "expanded"
        } else {
            "up to date"
        };
        output.success(&format!("{id}: {state}"));
    }
    Ok(())
}
