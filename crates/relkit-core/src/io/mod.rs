//! IO modules - side effects (network, filesystem)

pub mod download;
pub mod extract;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use relkit_schema::Sha256Digest;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of a file, reading it in 64KB chunks.
pub fn sha256_file(path: &Path) -> io::Result<Sha256Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Sha256Digest::from_bytes(&hasher.finalize()).map_err(io::Error::other)
}

/// Write `contents` to `path` through a temporary file in the same directory,
/// so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".relkit-")
        .suffix(".part")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
