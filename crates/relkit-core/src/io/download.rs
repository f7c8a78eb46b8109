//! Async download with streaming SHA256 computation.

use std::io::Write;
use std::path::Path;

use futures::StreamExt;
use relkit_schema::Sha256Digest;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Stream `url` into `dest`, hashing as bytes arrive.
///
/// A 404 is reported as [`DownloadError::NotFound`] so callers can move on
/// to the next repository. On any failure the partial file is removed.
pub async fn download_to(
    client: &Client,
    url: &str,
    dest: &Path,
) -> Result<Sha256Digest, DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(DownloadError::NotFound(url.to_string()));
    }
    let response = response.error_for_status()?;

    let result = stream_into(response, dest).await;
    if result.is_err() {
        tokio::fs::remove_file(dest).await.ok();
    }
    result
}

async fn stream_into(
    response: reqwest::Response,
    dest: &Path,
) -> Result<Sha256Digest, DownloadError> {
    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.write_all(&chunk)?;
    }

    file.flush().await?;
    file.sync_all().await?;

    Sha256Digest::from_bytes(&hasher.finalize()).map_err(|e| std::io::Error::other(e).into())
}

/// Fetch a small text resource such as a `.sha256` sidecar.
///
/// Returns `Ok(None)` on 404.
pub async fn fetch_text(client: &Client, url: &str) -> Result<Option<String>, DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let text = response.error_for_status()?.text().await?;
    Ok(Some(text))
}
