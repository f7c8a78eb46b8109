//! Core engine for relkit: resolve zipped artifacts into a local cache,
//! stage them deterministically, and assemble distribution archives from the
//! staged contents.
//!
//! The pieces compose leaf-first:
//! [`ArtifactCache`] → [`ArchiveExpander`] → [`ExposedFileSet`] →
//! [`DistributionAssembler`] → [`PathRewriter`], with [`ManifestComposer`]
//! supplying the embedded metadata. [`BuildGraph`] wires them together from a
//! [`BuildConfig`].

pub mod assemble;
pub mod cache;
pub mod config;
pub mod error;
pub mod expand;
pub mod fileset;
pub mod graph;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod rewrite;

pub use assemble::{
    ArchiveEntryMapping, AssemblyError, AssemblyOptions, AssemblyResult, ConflictPolicy,
    DistributionAssembler,
};
pub use cache::{ArtifactCache, ResolutionError, ResolvedArtifact};
pub use config::{BuildConfig, ConfigError};
pub use error::BuildError;
pub use expand::{ArchiveExpander, ExpansionError, StagingDirectory};
pub use fileset::{ExposedFileSet, FileSetDescriptor, FileSetError, ResolvedFileSet};
pub use graph::{BuildGraph, CleanReport, DistributionReport};
pub use manifest::{ManifestComposer, ManifestConfig};
pub use paths::*;
pub use rewrite::{PathRewriter, RewriteError};

/// Name recorded as `Built-By` when none is configured.
pub const TOOL_NAME: &str = "relkit";

/// User Agent string for repository requests
pub const USER_AGENT: &str = concat!("relkit/", env!("CARGO_PKG_VERSION"));
