//! Resolve command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Resolve every bundle and print `<id>\t<coordinate>\t<path>`.
pub async fn resolve(config: &Path, offline: bool, output: Output) -> Result<()> {
    let graph = super::load_graph(config, offline)?;
    let resolved = graph.resolve().await.context("Resolution failed")?;

    if resolved.is_empty() {
        output.warning("No bundles configured");
    }
    for (id, artifact) in &resolved {
        output.data(&format!(
            "{id}\t{}\t{}",
            artifact.coordinate,
            artifact.local_path.display()
        ));
    }
    Ok(())
}
