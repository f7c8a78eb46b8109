//! Command implementations

pub mod assemble;
pub mod build;
pub mod clean;
pub mod coordinate;
pub mod expand;
pub mod manifest;
pub mod resolve;

use std::path::Path;

use anyhow::{Context, Result};
use relkit_core::{BuildConfig, BuildGraph, DistributionReport};
use tracing::debug;

use crate::ui::Output;

/// Load the build file and wire up the task graph.
pub fn load_graph(config: &Path, offline: bool) -> Result<BuildGraph> {
    debug!(config = %config.display(), offline, "loading build file");
    let build_config = BuildConfig::load(config)
        .with_context(|| format!("Failed to load build file {}", config.display()))?;
    BuildGraph::new(build_config, offline).context("Failed to initialise the build")
}

/// Print one line per produced archive.
pub fn print_reports(output: Output, reports: &[DistributionReport]) {
    if reports.is_empty() {
        output.warning("No distributions configured");
        return;
    }
    for report in reports {
        for archive in &report.assembly.archives {
            output.data(&archive.display().to_string());
        }
        let rewritten = if report.rewrites.is_empty() {
            String::new()
        } else {
            ", paths rewritten".to_string()
        };
        output.success(&format!(
            "{}: {} entries{rewritten}",
            report.name,
            report.assembly.entries.len()
        ));
    }
}
