//! Artifact kinds and archive formats.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// What a resolved coordinate points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A Java archive consumed as-is (still a zip container).
    Jar,
    /// A zipped bundle meant to be expanded into a staging directory.
    Zip,
}

impl ArtifactKind {
    /// Map a file extension (without the dot) to an artifact kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jar" => Some(Self::Jar),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

/// Archive container format, used both for reading staged bundles and for
/// writing distributions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchiveFormat {
    /// Zip archive (`.zip`, `.jar`).
    #[serde(rename = "zip")]
    Zip,
    /// Uncompressed tar archive (`.tar`).
    #[serde(rename = "tar")]
    Tar,
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zstandard-compressed tar archive (`.tar.zst`).
    #[serde(rename = "tar.zst")]
    TarZst,
}

impl ArchiveFormat {
    /// Detect the format from a file name, case-insensitively.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();

        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") || name.ends_with(".jar") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// The file extension written for this format, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
        }
    }

    /// Whether this is one of the tar variants.
    pub fn is_tar(self) -> bool {
        !matches!(self, Self::Zip)
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            ArchiveFormat::detect(Path::new("foo.tar.zst")),
            Some(ArchiveFormat::TarZst)
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("foo.tgz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("dir.zip/LIB.JAR")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::detect(Path::new("README")), None);
    }

    #[test]
    fn test_format_serde_names() {
        let formats: Vec<ArchiveFormat> =
            serde_json::from_str(r#"["zip", "tar", "tar.gz"]"#).unwrap();
        assert_eq!(
            formats,
            vec![ArchiveFormat::Zip, ArchiveFormat::Tar, ArchiveFormat::TarGz]
        );
    }
}
