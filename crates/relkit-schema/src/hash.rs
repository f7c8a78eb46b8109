//! Content digests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// The string is not a SHA-256 digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid SHA256 digest '{0}': expected 64 hex characters")]
pub struct DigestError(pub String);

/// A validated SHA256 digest (64 lowercase hex characters).
///
/// Used both as the cache checksum of a resolved artifact and as the
/// fingerprint recorded in a staging directory's marker file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix and normalizes to
    /// lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the hex portion is not exactly 64 ASCII hex
    /// characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.trim().strip_prefix("sha256:").unwrap_or(s.trim());

        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError(s));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Build a digest from raw hash output bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DigestError> {
        Self::new(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `sha256:<hex>` form written to marker files.
    pub fn to_marker(&self) -> String {
        format!("sha256:{}", self.0)
    }
}

impl FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
