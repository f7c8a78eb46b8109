//! Coordinate command (hidden, for debugging build files)

use anyhow::{Context, Result};
use relkit_schema::ArtifactCoordinate;

use crate::ui::Output;

/// Parse a coordinate and print its parts.
pub fn coordinate(text: &str, output: Output) -> Result<()> {
    let coordinate: ArtifactCoordinate = text
        .parse()
        .with_context(|| format!("Invalid coordinate '{text}'"))?;

    output.data(&format!("group:      {}", coordinate.group()));
    output.data(&format!("name:       {}", coordinate.name()));
    output.data(&format!("version:    {}", coordinate.version()));
    if let Some(classifier) = coordinate.classifier() {
        output.data(&format!("classifier: {classifier}"));
    }
    output.data(&format!("extension:  {}", coordinate.extension()));
    output.data(&format!("floating:   {}", coordinate.is_floating()));
    output.data(&format!("path:       {}", coordinate.repository_path()));
    Ok(())
}
