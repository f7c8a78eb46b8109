//! Manifest command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Print the manifest as it would be embedded.
pub fn manifest(config: &Path, output: Output) -> Result<()> {
    let graph = super::load_graph(config, true)?;
    let manifest = graph.manifest().context("Cannot compose manifest")?;
    for line in manifest.render().lines() {
        output.data(line);
    }
    Ok(())
}
