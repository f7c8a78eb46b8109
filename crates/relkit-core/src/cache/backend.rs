//! Repository backends the cache fetches from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relkit_schema::{ArtifactCoordinate, Sha256Digest};
use reqwest::Client;
use tracing::debug;

use super::ResolutionError;
use crate::io::download::{self, DownloadError};
use crate::io::sha256_file;

/// A place artifacts can be fetched from, laid out in the Maven layout.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Remote backends are skipped in offline mode.
    fn is_remote(&self) -> bool;

    /// Copy the artifact for `coordinate` to `dest` and return its digest.
    ///
    /// Returns `Ok(None)` when this repository does not have the artifact.
    async fn fetch(
        &self,
        coordinate: &ArtifactCoordinate,
        dest: &Path,
    ) -> Result<Option<Sha256Digest>, ResolutionError>;
}

/// A Maven-layout repository on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    name: String,
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("local:{}", root.display()),
            root,
        }
    }

    fn artifact_path(&self, coordinate: &ArtifactCoordinate) -> PathBuf {
        let mut path = self.root.clone();
        for segment in coordinate.directory_segments() {
            path.push(segment);
        }
        path.push(coordinate.file_name());
        path
    }
}

#[async_trait]
impl Backend for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        coordinate: &ArtifactCoordinate,
        dest: &Path,
    ) -> Result<Option<Sha256Digest>, ResolutionError> {
        let source = self.artifact_path(coordinate);
        if !tokio::fs::try_exists(&source).await? {
            debug!(repository = %self.name, path = %source.display(), "artifact not present");
            return Ok(None);
        }

        tokio::fs::copy(&source, dest).await?;
        let dest_owned = dest.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || sha256_file(&dest_owned))
            .await
            .map_err(std::io::Error::other)??;

        let sidecar = sidecar_path(&source);
        if let Ok(text) = tokio::fs::read_to_string(&sidecar).await {
            verify_sidecar(coordinate, &text, &actual, dest).await?;
        }

        Ok(Some(actual))
    }
}

/// A Maven-layout repository served over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpRepository {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpRepository {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            name: base_url.clone(),
            base_url,
            client,
        }
    }

    fn artifact_url(&self, coordinate: &ArtifactCoordinate) -> String {
        format!("{}/{}", self.base_url, coordinate.repository_path())
    }
}

#[async_trait]
impl Backend for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        coordinate: &ArtifactCoordinate,
        dest: &Path,
    ) -> Result<Option<Sha256Digest>, ResolutionError> {
        let url = self.artifact_url(coordinate);
        let actual = match download::download_to(&self.client, &url, dest).await {
            Ok(digest) => digest,
            Err(DownloadError::NotFound(_)) => {
                debug!(repository = %self.name, %url, "artifact not present");
                return Ok(None);
            }
            Err(source) => {
                return Err(ResolutionError::Download {
                    repository: self.name.clone(),
                    source,
                });
            }
        };

        let sidecar = download::fetch_text(&self.client, &format!("{url}.sha256"))
            .await
            .map_err(|source| ResolutionError::Download {
                repository: self.name.clone(),
                source,
            })?;
        if let Some(text) = sidecar {
            verify_sidecar(coordinate, &text, &actual, dest).await?;
        }

        Ok(Some(actual))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Compare a `.sha256` sidecar (first whitespace-separated token) against the
/// fetched bytes, removing `dest` on mismatch.
async fn verify_sidecar(
    coordinate: &ArtifactCoordinate,
    text: &str,
    actual: &Sha256Digest,
    dest: &Path,
) -> Result<(), ResolutionError> {
    let expected = text.split_whitespace().next().unwrap_or_default();
    let matches = Sha256Digest::new(expected).is_ok_and(|e| &e == actual);
    if !matches {
        tokio::fs::remove_file(dest).await.ok();
        return Err(ResolutionError::ChecksumMismatch {
            coordinate: coordinate.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::tempdir;

    fn publish(repo: &Path, coordinate: &ArtifactCoordinate, bytes: &[u8]) -> PathBuf {
        let path = LocalRepository::new(repo).artifact_path(coordinate);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn test_local_fetch_copies_and_hashes() {
        let repo = tempdir().unwrap();
        let out = tempdir().unwrap();
        let c: ArtifactCoordinate = "io.example:corepkg:2.0.0@zip".parse().unwrap();
        publish(repo.path(), &c, b"hello");

        let dest = out.path().join("corepkg.zip");
        let digest = LocalRepository::new(repo.path())
            .fetch(&c, &dest)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(digest, Sha256Digest::from_bytes(&Sha256::digest(b"hello")).unwrap());
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_local_missing_is_none() {
        let repo = tempdir().unwrap();
        let c: ArtifactCoordinate = "io.example:absent:1.0".parse().unwrap();
        let got = LocalRepository::new(repo.path())
            .fetch(&c, &repo.path().join("x"))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_local_sidecar_mismatch_removes_download() {
        let repo = tempdir().unwrap();
        let out = tempdir().unwrap();
        let c: ArtifactCoordinate = "io.example:corepkg:2.0.0".parse().unwrap();
        let path = publish(repo.path(), &c, b"hello");
        std::fs::write(sidecar_path(&path), format!("{}  corepkg-2.0.0.jar\n", "0".repeat(64)))
            .unwrap();

        let dest = out.path().join("corepkg.jar");
        let err = LocalRepository::new(repo.path())
            .fetch(&c, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, ResolutionError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_fetch_verifies_sidecar() {
        let mut server = mockito::Server::new_async().await;
        let c: ArtifactCoordinate = "io.example:corepkg:2.0.0@zip".parse().unwrap();
        let path = format!("/{}", c.repository_path());
        let _body = server
            .mock("GET", path.as_str())
            .with_body("hello")
            .create_async()
            .await;
        let _sum = server
            .mock("GET", format!("{path}.sha256").as_str())
            .with_body("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\n")
            .create_async()
            .await;

        let out = tempdir().unwrap();
        let dest = out.path().join("corepkg.zip");
        let repo = HttpRepository::new(format!("{}/", server.url()), Client::new());
        let digest = repo.fetch(&c, &dest).await.unwrap();

        assert!(digest.is_some());
        assert!(repo.is_remote());
    }

    #[tokio::test]
    async fn test_http_missing_is_none() {
        let mut server = mockito::Server::new_async().await;
        let c: ArtifactCoordinate = "io.example:corepkg:9.9.9".parse().unwrap();
        let _missing = server
            .mock("GET", format!("/{}", c.repository_path()).as_str())
            .with_status(404)
            .create_async()
            .await;

        let out = tempdir().unwrap();
        let repo = HttpRepository::new(server.url(), Client::new());
        let got = repo.fetch(&c, &out.path().join("x.jar")).await.unwrap();
        assert!(got.is_none());
    }
}
