//! Clean command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Remove staging directories, assembled archives and optionally the cache.
pub fn clean(config: &Path, include_cache: bool, output: Output) -> Result<()> {
    let graph = super::load_graph(config, true)?;
    let report = graph.clean(include_cache).context("Clean failed")?;

    for path in &report.removed {
        output.info(&format!("Removed {}", path.display()));
    }
    output.success("Build directory is clean.");
    Ok(())
}
