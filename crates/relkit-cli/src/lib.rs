//! relkit - reproducible staging and distribution assembly
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves zipped bundles from Maven-layout repositories, stages them into
//! the build directory, and assembles distribution archives from the staged
//! contents plus local build outputs.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.relkit/
//! └── cache/      # Resolved artifacts by group/name/version
//!
//! <project>/
//! ├── relkit.toml
//! └── build/
//!     ├── <bundle>/           # Staging directories (with .expanded-from)
//!     └── distributions/      # Assembled archives
//! ```

pub mod cmd;
pub mod ui;

pub use relkit_core::paths::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "relkit")]
#[command(author, version, about = "relkit - reproducible staging and distribution assembly")]
pub struct Cli {
    /// Build file to load
    #[arg(
        long,
        global = true,
        env = "RELKIT_CONFIG",
        default_value = relkit_core::config::DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Only use local repositories and the existing cache
    #[arg(long, global = true)]
    pub offline: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve every bundle and print its cached path
    Resolve,
    /// Resolve and stage every bundle into the build directory
    Expand,
    /// Assemble distribution archives (without path rewriting)
    Assemble {
        /// Only assemble this distribution
        #[arg(long)]
        target: Option<String>,
    },
    /// Run the full build: resolve, expand, assemble and rewrite
    Build {
        /// Only build this distribution
        #[arg(long)]
        target: Option<String>,
    },
    /// Print the manifest that would be embedded
    Manifest,
    /// Remove staging directories and assembled archives
    Clean {
        /// Also remove the artifact cache
        #[arg(long)]
        cache: bool,
    },
    /// Parse a dependency coordinate and show its repository path
    #[command(hide = true)]
    Coordinate {
        /// Coordinate text, e.g. group:name:version[:classifier][@ext]
        text: String,
    },
}
