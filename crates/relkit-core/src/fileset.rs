//! Lazily evaluated, named collections of files.
//!
//! An [`ExposedFileSet`] is a two-phase handle: building one only records the
//! producer and the query. The filesystem is touched when
//! [`ExposedFileSet::resolve`] is called, which first materialises the
//! producer (expanding its archive if needed) and then lists matching files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use glob::{MatchOptions, Pattern};
use relkit_schema::EXPANDED_MARKER;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::cache::ResolvedArtifact;
use crate::expand::{ExpansionError, StagingDirectory, expand_archive};

#[derive(Error, Debug)]
pub enum FileSetError {
    #[error("File set '{name}': root directory {} does not exist", path.display())]
    MissingRoot { name: String, path: PathBuf },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to list {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Expansion(#[from] ExpansionError),
}

/// Ant-style matching: `*` stays within one path segment, `**` spans them.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A read-only query over a producer's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSetDescriptor {
    /// Relative to the producer's output directory.
    pub root_directory: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl FileSetDescriptor {
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            ..Self::default()
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Compile the patterns, reporting the first invalid one.
    pub fn compile(&self) -> Result<CompiledFilter, FileSetError> {
        Ok(CompiledFilter {
            include: compile_all(&self.include_patterns)?,
            exclude: compile_all(&self.exclude_patterns)?,
        })
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Pattern>, FileSetError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| FileSetError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Include/exclude patterns ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl CompiledFilter {
    /// Exclude wins over include; no include patterns means everything.
    pub fn matches(&self, relative: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(relative, MATCH_OPTIONS));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(relative, MATCH_OPTIONS))
    }
}

/// Something that produces a directory of files on demand.
pub trait FileProducer: Send + Sync + fmt::Debug {
    /// Make the output exist and return its directory.
    fn materialize(&self) -> Result<PathBuf, FileSetError>;
}

/// A plain directory, e.g. another module's build output.
#[derive(Debug, Clone)]
pub struct SourceDirectory {
    path: PathBuf,
}

impl SourceDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FileProducer for SourceDirectory {
    fn materialize(&self) -> Result<PathBuf, FileSetError> {
        Ok(self.path.clone())
    }
}

/// Expansion of one resolved archive into a staging directory, run at most
/// once per handle.
#[derive(Debug)]
pub struct StagingStep {
    artifact: ResolvedArtifact,
    destination: PathBuf,
    staged: Mutex<Option<StagingDirectory>>,
}

impl StagingStep {
    pub fn new(artifact: ResolvedArtifact, destination: impl Into<PathBuf>) -> Self {
        Self {
            artifact,
            destination: destination.into(),
            staged: Mutex::new(None),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Expand (or confirm) the staging directory.
    pub fn stage(&self) -> Result<StagingDirectory, ExpansionError> {
        let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(done) = staged.as_ref() {
            return Ok(done.clone());
        }
        let done = expand_archive(&self.artifact.local_path, &self.destination)?;
        *staged = Some(done.clone());
        Ok(done)
    }
}

impl FileProducer for StagingStep {
    fn materialize(&self) -> Result<PathBuf, FileSetError> {
        Ok(self.stage()?.destination_path)
    }
}

/// One file selected by a file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the descriptor root, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Whether any executable bit is set on the source file.
    pub executable: bool,
}

/// The listed contents of a file set, sorted by relative path.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFileSet {
    pub root: PathBuf,
    pub entries: Vec<FileEntry>,
}

impl ResolvedFileSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }
}

impl IntoIterator for ResolvedFileSet {
    type Item = FileEntry;
    type IntoIter = std::vec::IntoIter<FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Named handle to a producer's output filtered by a descriptor.
#[derive(Debug, Clone)]
pub struct ExposedFileSet {
    name: String,
    producer: Arc<dyn FileProducer>,
    descriptor: FileSetDescriptor,
}

impl ExposedFileSet {
    pub fn new(
        name: impl Into<String>,
        producer: Arc<dyn FileProducer>,
        descriptor: FileSetDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            producer,
            descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &FileSetDescriptor {
        &self.descriptor
    }

    /// Materialise the producer and list the matching files. Blocking.
    pub fn resolve(&self) -> Result<ResolvedFileSet, FileSetError> {
        let filter = self.descriptor.compile()?;
        let output = self.producer.materialize()?;
        let root = output.join(&self.descriptor.root_directory);

        if !root.is_dir() {
            return Err(FileSetError::MissingRoot {
                name: self.name.clone(),
                path: root,
            });
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|source| FileSetError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() || entry.file_name() == EXPANDED_MARKER {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if filter.matches(&relative) {
                entries.push(FileEntry {
                    executable: is_executable(entry.path()),
                    relative_path: relative,
                    absolute_path: entry.path().to_path_buf(),
                });
            }
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        debug!(file_set = %self.name, root = %root.display(), files = entries.len(), "resolved file set");
        Ok(ResolvedFileSet { root, entries })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sha256_file;
    use relkit_schema::ArtifactKind;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    fn names(set: &ResolvedFileSet) -> Vec<&str> {
        set.iter().map(|e| e.relative_path.as_str()).collect()
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "lib/a.jar");
        touch(dir.path(), "lib/a-sources.jar");
        touch(dir.path(), "lib/notes.txt");

        let set = ExposedFileSet::new(
            "lib",
            Arc::new(SourceDirectory::new(dir.path())),
            FileSetDescriptor::new("lib")
                .include("**/*.jar")
                .exclude("*-sources.jar"),
        );
        let resolved = set.resolve().unwrap();
        assert_eq!(names(&resolved), vec!["a.jar"]);
    }

    #[test]
    fn test_no_include_means_everything_sorted_files_only() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "b.txt");
        touch(dir.path(), "a/z.txt");
        touch(dir.path(), "a/b/c.txt");
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let set = ExposedFileSet::new(
            "all",
            Arc::new(SourceDirectory::new(dir.path())),
            FileSetDescriptor::new(""),
        );
        assert_eq!(
            names(&set.resolve().unwrap()),
            vec!["a/b/c.txt", "a/z.txt", "b.txt"]
        );
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let filter = FileSetDescriptor::new("")
            .include("*.jar")
            .compile()
            .unwrap();
        assert!(filter.matches("a.jar"));
        assert!(!filter.matches("sub/a.jar"));

        let deep = FileSetDescriptor::new("")
            .include("**/*.jar")
            .compile()
            .unwrap();
        assert!(deep.matches("a.jar"));
        assert!(deep.matches("sub/dir/a.jar"));
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempdir().unwrap();
        let set = ExposedFileSet::new(
            "ghost",
            Arc::new(SourceDirectory::new(dir.path())),
            FileSetDescriptor::new("nope"),
        );
        assert!(matches!(
            set.resolve(),
            Err(FileSetError::MissingRoot { .. })
        ));
    }

    #[test]
    fn test_bad_pattern_is_error() {
        let err = FileSetDescriptor::new("").include("[").compile().unwrap_err();
        assert!(matches!(err, FileSetError::Pattern { .. }));
    }

    #[test]
    fn test_staging_step_is_lazy() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("corepkg-2.0.0.zip");
        {
            let mut zip = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
            zip.start_file("lib/a.jar", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"a").unwrap();
            zip.finish().unwrap();
        }
        let artifact = ResolvedArtifact {
            coordinate: "io.example:corepkg:2.0.0@zip".parse().unwrap(),
            local_path: archive.clone(),
            kind: ArtifactKind::Zip,
            sha256: sha256_file(&archive).unwrap(),
        };
        let stage = dir.path().join("stage");
        let step = Arc::new(StagingStep::new(artifact, &stage));

        let set = ExposedFileSet::new(
            "core-lib",
            step.clone(),
            FileSetDescriptor::new("lib").include("**/*.jar"),
        );
        assert!(!stage.exists());

        let resolved = set.resolve().unwrap();
        assert_eq!(names(&resolved), vec!["a.jar"]);
        assert!(stage.join(EXPANDED_MARKER).exists());

        // The marker never leaks into a file set rooted at the stage.
        let whole = ExposedFileSet::new("core", step, FileSetDescriptor::new(""));
        assert_eq!(names(&whole.resolve().unwrap()), vec!["lib/a.jar"]);
    }
}
