//! Stripping leading path segments from every entry of an archive.
//!
//! Hosts that install a distribution by unpacking it in place expect the
//! entries without the versioned top-level directory. The rewrite copies the
//! archive entry by entry under new names (zip entries are copied raw, without
//! recompressing) and replaces the original atomically.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use relkit_schema::ArchiveFormat;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Cannot strip {segments} segment(s) from '{entry}' in {}: {reason}", archive.display())]
    InvariantViolation {
        archive: PathBuf,
        entry: String,
        segments: usize,
        reason: &'static str,
    },

    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Counts from one rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub entries: usize,
    /// Directory entries that named the stripped prefix itself.
    pub dropped_dirs: usize,
}

/// Strips a fixed number of leading components from entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRewriter {
    segments: usize,
}

enum Renamed {
    Keep(String),
    Drop,
}

impl PathRewriter {
    pub fn new(segments: usize) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Rewrite `archive` in place. Zero segments leaves the file untouched.
    pub fn rewrite(&self, archive: &Path) -> Result<RewriteReport, RewriteError> {
        if self.segments == 0 {
            return Ok(RewriteReport::default());
        }
        let format = ArchiveFormat::detect(archive)
            .ok_or_else(|| RewriteError::UnsupportedFormat(archive.to_path_buf()))?;

        let dir = archive
            .parent()
            .ok_or_else(|| io::Error::other("archive path has no parent"))?;
        let tmp = tempfile::Builder::new()
            .prefix(".relkit-")
            .suffix(".part")
            .tempfile_in(dir)?;

        let report = {
            let out = BufWriter::new(tmp.as_file());
            let input = BufReader::new(File::open(archive)?);
            match format {
                ArchiveFormat::Zip => self.rewrite_zip(archive, input, out)?,
                ArchiveFormat::Tar => self.rewrite_tar(archive, input, out)?,
                ArchiveFormat::TarGz => {
                    let encoder = GzEncoder::new(out, Compression::default());
                    let (report, encoder) =
                        self.rewrite_tar_into(archive, GzDecoder::new(input), encoder)?;
                    encoder.finish()?.flush()?;
                    report
                }
                ArchiveFormat::TarZst => {
                    let encoder = zstd::stream::write::Encoder::new(out, 0)?;
                    let decoder = zstd::stream::read::Decoder::new(input)?;
                    let (report, encoder) = self.rewrite_tar_into(archive, decoder, encoder)?;
                    encoder.finish()?.flush()?;
                    report
                }
            }
        };

        tmp.as_file().sync_all()?;
        tmp.persist(archive).map_err(|e| e.error)?;
        info!(
            archive = %archive.display(),
            segments = self.segments,
            entries = report.entries,
            "rewrote entry paths"
        );
        Ok(report)
    }

    fn rename(&self, archive: &Path, name: &str, is_dir: bool) -> Result<Renamed, RewriteError> {
        let parts: Vec<&str> = name
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();
        let violation = |reason: &'static str| RewriteError::InvariantViolation {
            archive: archive.to_path_buf(),
            entry: name.to_string(),
            segments: self.segments,
            reason,
        };

        if is_dir {
            if parts.len() < self.segments {
                return Err(violation("directory is shallower than the stripped prefix"));
            }
            if parts.len() == self.segments {
                return Ok(Renamed::Drop);
            }
            Ok(Renamed::Keep(format!("{}/", parts[self.segments..].join("/"))))
        } else {
            if parts.len() <= self.segments {
                return Err(violation("file has no path left after stripping"));
            }
            Ok(Renamed::Keep(parts[self.segments..].join("/")))
        }
    }

    fn rewrite_zip<R, W>(
        &self,
        archive_path: &Path,
        input: R,
        out: W,
    ) -> Result<RewriteReport, RewriteError>
    where
        R: Read + io::Seek,
        W: Write + io::Seek,
    {
        let mut archive = zip::ZipArchive::new(input)?;
        let mut writer = zip::ZipWriter::new(out);
        let mut seen = HashSet::new();
        let mut report = RewriteReport::default();

        for i in 0..archive.len() {
            let file = archive.by_index_raw(i)?;
            let name = file.name().to_string();
            match self.rename(archive_path, &name, file.is_dir())? {
                Renamed::Drop => report.dropped_dirs += 1,
                Renamed::Keep(new_name) => {
                    if !seen.insert(new_name.clone()) {
                        return Err(RewriteError::InvariantViolation {
                            archive: archive_path.to_path_buf(),
                            entry: name,
                            segments: self.segments,
                            reason: "two entries collide after stripping",
                        });
                    }
                    writer.raw_copy_file_rename(file, new_name)?;
                    report.entries += 1;
                }
            }
        }

        writer.finish()?.flush()?;
        Ok(report)
    }

    fn rewrite_tar<R: Read, W: Write>(
        &self,
        archive_path: &Path,
        input: R,
        out: W,
    ) -> Result<RewriteReport, RewriteError> {
        let (report, mut out) = self.rewrite_tar_into(archive_path, input, out)?;
        out.flush()?;
        Ok(report)
    }

    fn rewrite_tar_into<R: Read, W: Write>(
        &self,
        archive_path: &Path,
        input: R,
        out: W,
    ) -> Result<(RewriteReport, W), RewriteError> {
        let mut archive = tar::Archive::new(input);
        let mut builder = tar::Builder::new(out);
        let mut seen = HashSet::new();
        let mut report = RewriteReport::default();

        for entry in archive.entries()? {
            let entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let is_dir = entry.header().entry_type().is_dir();

            match self.rename(archive_path, &name, is_dir)? {
                Renamed::Drop => report.dropped_dirs += 1,
                Renamed::Keep(new_name) => {
                    if !seen.insert(new_name.clone()) {
                        return Err(RewriteError::InvariantViolation {
                            archive: archive_path.to_path_buf(),
                            entry: name,
                            segments: self.segments,
                            reason: "two entries collide after stripping",
                        });
                    }
                    let mut header = entry.header().clone();
                    builder.append_data(&mut header, &new_name, entry)?;
                    report.entries += 1;
                }
            }
        }

        Ok((report, builder.into_inner()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, dirs: &[&str], files: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for d in dirs {
            zip.add_directory(*d, SimpleFileOptions::default()).unwrap();
        }
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_strip_one_segment_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.zip");
        write_zip(
            &path,
            &["pkg-1.0/", "pkg-1.0/lib/"],
            &[("pkg-1.0/lib/a.jar", b"a"), ("pkg-1.0/README.md", b"r")],
        );

        let report = PathRewriter::new(1).rewrite(&path).unwrap();

        assert_eq!(report.dropped_dirs, 1);
        assert_eq!(zip_names(&path), vec!["lib/", "lib/a.jar", "README.md"]);

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut body = String::new();
        archive
            .by_name("lib/a.jar")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "a");
    }

    #[test]
    fn test_underflow_is_invariant_violation_and_keeps_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.zip");
        write_zip(&path, &[], &[("pkg-1.0/lib/a.jar", b"a"), ("top.txt", b"t")]);
        let before = fs::read(&path).unwrap();

        let err = PathRewriter::new(1).rewrite(&path).unwrap_err();

        assert!(
            matches!(err, RewriteError::InvariantViolation { ref entry, .. } if entry == "top.txt")
        );
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_collision_after_strip_is_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("two.zip");
        write_zip(&path, &[], &[("a/x.txt", b"1"), ("b/x.txt", b"2")]);

        assert!(matches!(
            PathRewriter::new(1).rewrite(&path),
            Err(RewriteError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_zero_segments_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("any.zip");
        write_zip(&path, &[], &[("x", b"1")]);
        let before = fs::read(&path).unwrap();

        assert_eq!(
            PathRewriter::new(0).rewrite(&path).unwrap(),
            RewriteReport::default()
        );
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_strip_tar_gz() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.tar.gz");
        {
            let enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(enc);
            let mut header = tar::Header::new_gnu();
            header.set_size(1);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "pkg-1.0/bin/run", &b"x"[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        PathRewriter::new(1).rewrite(&path).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&path).unwrap()));
        let entries: Vec<(String, u32)> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.path().unwrap().display().to_string(),
                    e.header().mode().unwrap(),
                )
            })
            .collect();
        assert_eq!(entries, vec![("bin/run".to_string(), 0o755)]);
    }

    #[test]
    fn test_shallow_directory_is_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deep.zip");
        write_zip(&path, &["a/"], &[("a/b/c.txt", b"c")]);

        assert!(matches!(
            PathRewriter::new(2).rewrite(&path),
            Err(RewriteError::InvariantViolation { .. })
        ));
    }
}
