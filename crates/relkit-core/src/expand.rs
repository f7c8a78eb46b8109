//! Deterministic, idempotent unpacking of resolved archives into staging
//! directories.
//!
//! A staging directory carries a `.expanded-from` marker holding the SHA-256
//! of the archive it was produced from. Matching marker: nothing is touched.
//! Anything else: the directory is wiped and rebuilt from scratch through a
//! temporary sibling, and the marker is written last. A missing marker always
//! means "not expanded".

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use relkit_schema::{EXPANDED_MARKER, Sha256Digest};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::ResolvedArtifact;
use crate::io::extract::{ExtractError, extract_auto};
use crate::io::{sha256_file, write_atomic};

#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error("Failed to expand {archive}: {source}")]
    Extract {
        archive: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Staging task panicked: {0}")]
    Join(String),
}

/// A directory whose contents mirror one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDirectory {
    pub source_archive_path: PathBuf,
    pub destination_path: PathBuf,
    pub last_expanded_source_hash: Sha256Digest,
    /// Whether this call actually (re-)expanded the archive.
    pub refreshed: bool,
}

/// Expands archives, serialising work per destination directory.
#[derive(Debug, Default)]
pub struct ArchiveExpander {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ArchiveExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand a resolved artifact into `destination`.
    ///
    /// Two calls for the same destination never run at once: in-process
    /// callers queue on a per-path lock, other processes on an advisory lock
    /// held on `<destination>.lock`.
    pub async fn expand(
        &self,
        artifact: &ResolvedArtifact,
        destination: &Path,
    ) -> Result<StagingDirectory, ExpansionError> {
        let destination = std::path::absolute(destination)?;
        let lock = self.lock_for(&destination);
        let _guard = lock.lock().await;

        let source = artifact.local_path.clone();
        tokio::task::spawn_blocking(move || expand_archive(&source, &destination))
            .await
            .map_err(|e| ExpansionError::Join(e.to_string()))?
    }

    fn lock_for(&self, destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(destination.to_path_buf())
            .or_default()
            .clone()
    }
}

/// Blocking core of [`ArchiveExpander::expand`].
pub fn expand_archive(
    source: &Path,
    destination: &Path,
) -> Result<StagingDirectory, ExpansionError> {
    let parent = destination
        .parent()
        .ok_or_else(|| std::io::Error::other("staging directory has no parent"))?;
    fs::create_dir_all(parent)?;

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path(destination))?;
    lock_file.lock_exclusive()?;

    let fingerprint = sha256_file(source)?;
    let staging = StagingDirectory {
        source_archive_path: source.to_path_buf(),
        destination_path: destination.to_path_buf(),
        last_expanded_source_hash: fingerprint.clone(),
        refreshed: false,
    };

    if read_marker(destination).as_ref() == Some(&fingerprint) {
        debug!(destination = %destination.display(), "staging directory up to date");
        return Ok(staging);
    }

    if destination.exists() {
        info!(destination = %destination.display(), "source changed, wiping staging directory");
        fs::remove_dir_all(destination)?;
    }

    let dir_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{dir_name}."))
        .tempdir_in(parent)?;

    let files = extract_auto(source, tmp.path()).map_err(|e| ExpansionError::Extract {
        archive: source.to_path_buf(),
        source: e,
    })?;

    fs::rename(tmp.keep(), destination)?;
    write_atomic(
        &destination.join(EXPANDED_MARKER),
        format!("{}\n", fingerprint.to_marker()).as_bytes(),
    )?;

    info!(
        archive = %source.display(),
        destination = %destination.display(),
        files = files.len(),
        "expanded"
    );

    Ok(StagingDirectory {
        refreshed: true,
        ..staging
    })
}

/// The fingerprint recorded in `destination`, if any.
pub fn read_marker(destination: &Path) -> Option<Sha256Digest> {
    let text = fs::read_to_string(destination.join(EXPANDED_MARKER)).ok()?;
    Sha256Digest::new(text).ok()
}

/// Remove the marker so the next expansion rebuilds `destination`.
pub fn invalidate(destination: &Path) -> std::io::Result<()> {
    match fs::remove_file(destination.join(EXPANDED_MARKER)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn lock_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relkit_schema::ArtifactKind;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn artifact(path: &Path) -> ResolvedArtifact {
        ResolvedArtifact {
            coordinate: "io.example:corepkg:2.0.0@zip".parse().unwrap(),
            local_path: path.to_path_buf(),
            kind: ArtifactKind::Zip,
            sha256: sha256_file(path).unwrap(),
        }
    }

    #[test]
    fn test_second_expansion_is_noop() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg-2.0.0.zip");
        write_zip(&archive, &[("corepkg-2.0.0/lib/a.jar", b"a")]);
        let dest = dir.path().join("stage");

        let first = expand_archive(&archive, &dest).unwrap();
        assert!(first.refreshed);
        assert_eq!(read_marker(&dest), Some(first.last_expanded_source_hash.clone()));

        // A file planted after expansion survives: the directory is not touched.
        fs::write(dest.join("planted"), b"x").unwrap();
        let marker_before = fs::metadata(dest.join(EXPANDED_MARKER))
            .unwrap()
            .modified()
            .unwrap();
        let lock_before = fs::metadata(lock_path(&dest)).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let second = expand_archive(&archive, &dest).unwrap();
        assert!(!second.refreshed);
        assert!(dest.join("planted").exists());
        let marker_after = fs::metadata(dest.join(EXPANDED_MARKER))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(marker_before, marker_after);
        let lock_after = fs::metadata(lock_path(&dest)).unwrap().modified().unwrap();
        assert_eq!(lock_before, lock_after);
    }

    #[test]
    fn test_changed_source_wipes_stale_entries() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg.zip");
        let dest = dir.path().join("stage");

        write_zip(&archive, &[("x.jar", b"1")]);
        expand_archive(&archive, &dest).unwrap();
        assert!(dest.join("x.jar").exists());

        write_zip(&archive, &[("y.jar", b"2")]);
        let staged = expand_archive(&archive, &dest).unwrap();

        assert!(staged.refreshed);
        assert!(!dest.join("x.jar").exists());
        assert_eq!(fs::read(dest.join("y.jar")).unwrap(), b"2");
    }

    #[test]
    fn test_marker_format() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg.zip");
        write_zip(&archive, &[("a.txt", b"a")]);
        let dest = dir.path().join("stage");

        let staged = expand_archive(&archive, &dest).unwrap();
        let text = fs::read_to_string(dest.join(EXPANDED_MARKER)).unwrap();
        assert_eq!(
            text,
            format!("sha256:{}\n", staged.last_expanded_source_hash)
        );
    }

    #[test]
    fn test_corrupt_archive_leaves_no_marker() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();
        let dest = dir.path().join("stage");

        let err = expand_archive(&archive, &dest).unwrap_err();
        assert!(matches!(err, ExpansionError::Extract { .. }));
        assert!(read_marker(&dest).is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn test_invalidate_forces_reexpansion() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg.zip");
        write_zip(&archive, &[("a.txt", b"a")]);
        let dest = dir.path().join("stage");

        expand_archive(&archive, &dest).unwrap();
        fs::write(dest.join("stale"), b"x").unwrap();
        invalidate(&dest).unwrap();
        invalidate(&dest).unwrap();

        let staged = expand_archive(&archive, &dest).unwrap();
        assert!(staged.refreshed);
        assert!(!dest.join("stale").exists());
    }

    #[tokio::test]
    async fn test_concurrent_expansions_of_one_destination() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg.zip");
        write_zip(&archive, &[("lib/a.jar", b"a"), ("lib/b.jar", b"b")]);
        let dest = dir.path().join("stage");
        let expander = Arc::new(ArchiveExpander::new());
        let art = artifact(&archive);

        let (a, b) = tokio::join!(expander.expand(&art, &dest), expander.expand(&art, &dest));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Exactly one of the two did the work.
        assert!(a.refreshed ^ b.refreshed);
        assert_eq!(fs::read(dest.join("lib/b.jar")).unwrap(), b"b");
    }
}
