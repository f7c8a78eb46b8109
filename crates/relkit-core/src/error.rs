//! Errors surfaced by build operations

use thiserror::Error;

use crate::assemble::AssemblyError;
use crate::cache::ResolutionError;
use crate::config::ConfigError;
use crate::expand::ExpansionError;
use crate::rewrite::RewriteError;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Expansion failed: {0}")]
    Expansion(#[from] ExpansionError),

    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Path rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {message}")]
    Context {
        context: &'static str,
        message: String,
    },
}

impl BuildError {
    /// Create an error with context for better debugging.
    pub fn context(ctx: &'static str, msg: impl std::fmt::Display) -> Self {
        Self::Context {
            context: ctx,
            message: msg.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for BuildError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::context("Background task failed", err)
    }
}
