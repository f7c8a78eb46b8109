//! Shared types and wire formats for relkit.
//!
//! Everything here is a plain value: parsing and rendering of the textual
//! formats (dependency coordinates, digests, JAR-style manifests) with no I/O.

pub mod coordinate;
pub mod hash;
pub mod manifest;
pub mod types;

// Re-exports
pub use coordinate::{ArtifactCoordinate, CoordinateError};
pub use hash::Sha256Digest;
pub use manifest::DistributionManifest;
pub use types::*;

/// Name of the sidecar file recording which archive a staging directory was
/// expanded from.
pub const EXPANDED_MARKER: &str = ".expanded-from";

/// Version suffix that marks a floating (re-resolved every run) version.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";
