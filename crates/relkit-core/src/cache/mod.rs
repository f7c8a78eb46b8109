//! Artifact cache: coordinate → verified local file.
//!
//! Resolutions are memoized per coordinate for the lifetime of the cache
//! handle, so concurrent callers asking for the same coordinate await a single
//! in-flight fetch. Fixed versions found on disk are served without touching
//! any backend once they hash to their recorded digest; floating versions are
//! always re-fetched.

pub mod backend;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use relkit_schema::{ArtifactCoordinate, ArtifactKind, Sha256Digest};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub use backend::{Backend, HttpRepository, LocalRepository};

use crate::io::download::DownloadError;
use crate::io::{sha256_file, write_atomic};

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Artifact {coordinate} not found in any repository (tried: {tried})")]
    NotFound { coordinate: String, tried: String },

    #[error("Checksum mismatch for {coordinate}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        coordinate: String,
        expected: String,
        actual: String,
    },

    #[error("Download from {repository} failed: {source}")]
    Download {
        repository: String,
        #[source]
        source: DownloadError,
    },

    #[error("Artifact {0} is not cached and remote repositories are disabled (offline)")]
    Offline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A coordinate resolved to a file in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub coordinate: ArtifactCoordinate,
    pub local_path: PathBuf,
    pub kind: ArtifactKind,
    pub sha256: Sha256Digest,
}

type Slot = Arc<OnceCell<ResolvedArtifact>>;

/// On-disk artifact cache backed by an ordered list of repositories.
///
/// Share it between consumers as `Arc<ArtifactCache>`.
pub struct ArtifactCache {
    root: PathBuf,
    backends: Vec<Box<dyn Backend>>,
    offline: bool,
    slots: Mutex<HashMap<ArtifactCoordinate, Slot>>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("root", &self.root)
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("offline", &self.offline)
            .finish()
    }
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>, backends: Vec<Box<dyn Backend>>) -> Self {
        Self {
            root: root.into(),
            backends,
            offline: false,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Skip remote backends; floating versions fall back to the cached copy.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the cached file for `coordinate` lives:
    /// `<root>/<group>/<name>/<version>/<file>`.
    pub fn entry_path(&self, coordinate: &ArtifactCoordinate) -> PathBuf {
        self.root
            .join(coordinate.group())
            .join(coordinate.name())
            .join(coordinate.version())
            .join(coordinate.file_name())
    }

    /// Resolve a coordinate to a local file.
    ///
    /// Within the lifetime of this handle a coordinate is resolved at most
    /// once; concurrent callers share the in-flight resolution.
    pub async fn resolve(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<ResolvedArtifact, ResolutionError> {
        let slot = self.slot(coordinate);
        let resolved = slot
            .get_or_try_init(|| self.resolve_uncached(coordinate))
            .await?;
        Ok(resolved.clone())
    }

    /// Resolve several coordinates concurrently, failing on the first error.
    pub async fn resolve_all(
        &self,
        coordinates: &[ArtifactCoordinate],
    ) -> Result<Vec<ResolvedArtifact>, ResolutionError> {
        try_join_all(coordinates.iter().map(|c| self.resolve(c))).await
    }

    /// Drop the cached file and the in-memory resolution for `coordinate`, so
    /// the next `resolve` fetches it again.
    pub fn invalidate(&self, coordinate: &ArtifactCoordinate) -> Result<(), ResolutionError> {
        self.lock_slots().remove(coordinate);

        let path = self.entry_path(coordinate);
        for file in [path.clone(), digest_path(&path)] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(%coordinate, "invalidated cache entry");
        Ok(())
    }

    fn slot(&self, coordinate: &ArtifactCoordinate) -> Slot {
        self.lock_slots()
            .entry(coordinate.clone())
            .or_default()
            .clone()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactCoordinate, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn resolve_uncached(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<ResolvedArtifact, ResolutionError> {
        let path = self.entry_path(coordinate);
        let floating = coordinate.is_floating();

        if !floating || self.offline {
            if let Some(hit) = self.read_entry(coordinate, &path).await? {
                debug!(%coordinate, path = %path.display(), "cache hit");
                return Ok(hit);
            }
        }

        self.fetch(coordinate, &path).await
    }

    async fn read_entry(
        &self,
        coordinate: &ArtifactCoordinate,
        path: &Path,
    ) -> Result<Option<ResolvedArtifact>, ResolutionError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }

        let owned = path.to_path_buf();
        let sha256 = tokio::task::spawn_blocking(move || sha256_file(&owned))
            .await
            .map_err(std::io::Error::other)??;

        let recorded = tokio::fs::read_to_string(digest_path(path))
            .await
            .ok()
            .and_then(|text| Sha256Digest::new(text).ok());
        match recorded {
            Some(expected) if expected != sha256 => {
                warn!(
                    %coordinate,
                    path = %path.display(),
                    %expected,
                    actual = %sha256,
                    "cached file does not match its recorded digest, discarding"
                );
                for file in [path.to_path_buf(), digest_path(path)] {
                    tokio::fs::remove_file(&file).await.ok();
                }
                return Ok(None);
            }
            Some(_) => {}
            None => write_atomic(&digest_path(path), format!("{sha256}\n").as_bytes())?,
        }

        Ok(Some(ResolvedArtifact {
            coordinate: coordinate.clone(),
            local_path: path.to_path_buf(),
            kind: coordinate.kind(),
            sha256,
        }))
    }

    async fn fetch(
        &self,
        coordinate: &ArtifactCoordinate,
        path: &Path,
    ) -> Result<ResolvedArtifact, ResolutionError> {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("cache entry has no parent"))?;
        tokio::fs::create_dir_all(dir).await?;

        let mut tried = Vec::new();
        let mut last_error = None;

        for backend in &self.backends {
            if self.offline && backend.is_remote() {
                continue;
            }
            tried.push(backend.name().to_string());

            let tmp = tempfile::Builder::new()
                .prefix(".relkit-")
                .suffix(".part")
                .tempfile_in(dir)?
                .into_temp_path();

            match backend.fetch(coordinate, &tmp).await {
                Ok(Some(sha256)) => {
                    tmp.persist(path).map_err(|e| e.error)?;
                    write_atomic(&digest_path(path), format!("{sha256}\n").as_bytes())?;
                    info!(%coordinate, repository = backend.name(), "resolved");
                    return Ok(ResolvedArtifact {
                        coordinate: coordinate.clone(),
                        local_path: path.to_path_buf(),
                        kind: coordinate.kind(),
                        sha256,
                    });
                }
                Ok(None) => continue,
                Err(e @ ResolutionError::ChecksumMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(%coordinate, repository = backend.name(), error = %e, "repository failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            return Err(e);
        }
        if self.offline && self.backends.iter().any(|b| b.is_remote()) {
            return Err(ResolutionError::Offline(coordinate.to_string()));
        }
        Err(ResolutionError::NotFound {
            coordinate: coordinate.to_string(),
            tried: if tried.is_empty() {
                "no repositories".to_string()
            } else {
                tried.join(", ")
            },
        })
    }
}

fn digest_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}
