//! Composition of distribution archives from ordered file-set mappings.
//!
//! Assembly happens in two passes. The plan pass resolves every mapping,
//! applies filters and settles destination collisions; nothing is written
//! until it succeeds. The write pass streams the plan into each enabled
//! format inside a private directory beside the output; the archives are
//! only moved into the output directory once every format is written.
//!
//! Archives are reproducible: entries are sorted by name, timestamps are
//! fixed and ownership is zeroed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use relkit_schema::{ArchiveFormat, DistributionManifest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::fileset::{CompiledFilter, ExposedFileSet, FileSetDescriptor, FileSetError};

/// Where the manifest is embedded.
pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

const MODE_EXECUTABLE: u32 = 0o755;
const MODE_REGULAR: u32 = 0o644;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Input file set '{file_set}' is unavailable: {source}")]
    MissingInput {
        file_set: String,
        #[source]
        source: FileSetError,
    },

    #[error("Entry '{path}' from '{second}' would overwrite the one from '{first}'")]
    Conflict {
        path: String,
        first: String,
        second: String,
    },

    #[error("No archive formats enabled for {0}")]
    NoFormats(String),

    #[error(transparent)]
    Pattern(#[from] FileSetError),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What to do when two mappings produce the same destination path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// The later mapping wins.
    #[default]
    Overwrite,
    /// Fail the assembly.
    Error,
}

/// One contribution to an archive: a file set placed under a prefix.
#[derive(Debug, Clone)]
pub struct ArchiveEntryMapping {
    pub source_file_set: ExposedFileSet,
    /// `""` or `"."` for the archive root.
    pub destination_prefix: String,
    /// Extra filter on the file set's relative paths.
    pub entry_filter: Option<CompiledFilter>,
    /// Higher priority is applied later, so it wins collisions.
    pub priority: i32,
}

impl ArchiveEntryMapping {
    pub fn new(source_file_set: ExposedFileSet, destination_prefix: impl Into<String>) -> Self {
        Self {
            source_file_set,
            destination_prefix: destination_prefix.into(),
            entry_filter: None,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Filter entries with include/exclude patterns on top of the file set's
    /// own descriptor.
    pub fn with_filter(mut self, filter: &FileSetDescriptor) -> Result<Self, FileSetError> {
        self.entry_filter = Some(filter.compile()?);
        Ok(self)
    }
}

/// Per-target assembly settings.
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub base_name: String,
    pub version: String,
    pub formats: Vec<ArchiveFormat>,
    /// Wrap every entry in `<base_name>-<version>/`.
    pub top_level_dir: bool,
    pub on_conflict: ConflictPolicy,
    /// Globs over destination paths that get mode 0755.
    pub executable: Vec<String>,
    /// Embedded at [`MANIFEST_ENTRY`] when present.
    pub manifest: Option<DistributionManifest>,
}

impl AssemblyOptions {
    pub fn new(base_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            version: version.into(),
            formats: vec![ArchiveFormat::Zip, ArchiveFormat::Tar],
            top_level_dir: true,
            on_conflict: ConflictPolicy::Overwrite,
            executable: Vec::new(),
            manifest: None,
        }
    }

    /// `<base_name>-<version>`, the archive stem and top-level directory.
    pub fn archive_stem(&self) -> String {
        format!("{}-{}", self.base_name, self.version)
    }
}

/// What an assembly produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyResult {
    /// One archive per enabled format.
    pub archives: Vec<PathBuf>,
    /// Entry names as written, sorted.
    pub entries: Vec<String>,
    /// Number of entries replaced by a later mapping.
    pub overwritten: usize,
}

/// Archives written but not yet visible in the output directory.
#[derive(Debug)]
pub struct StagedAssembly {
    dir: tempfile::TempDir,
    output_dir: PathBuf,
    result: AssemblyResult,
}

impl StagedAssembly {
    /// The written archives, still in the private directory.
    pub fn archives(&self) -> &[PathBuf] {
        &self.result.archives
    }

    /// Move every archive into the output directory, replacing older copies.
    /// If a move fails, the archives already moved are removed again.
    pub fn publish(self) -> Result<AssemblyResult, AssemblyError> {
        let mut published: Vec<PathBuf> = Vec::new();
        for staged in &self.result.archives {
            let name = staged
                .file_name()
                .ok_or_else(|| io::Error::other("staged archive has no file name"))?;
            let target = self.output_dir.join(name);
            if let Err(e) = std::fs::rename(staged, &target) {
                for done in &published {
                    std::fs::remove_file(done).ok();
                }
                return Err(e.into());
            }
            info!(archive = %target.display(), entries = self.result.entries.len(), "assembled");
            published.push(target);
        }
        debug!(dir = %self.dir.path().display(), "published staged archives");

        Ok(AssemblyResult {
            archives: published,
            ..self.result
        })
    }
}

#[derive(Debug, Clone)]
enum EntrySource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct PlannedEntry {
    origin: String,
    source: EntrySource,
    mode: u32,
}

/// Writes distribution archives.
#[derive(Debug, Clone)]
pub struct DistributionAssembler {
    options: AssemblyOptions,
}

impl DistributionAssembler {
    pub fn new(options: AssemblyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    /// Assemble `mappings` into `<output_dir>/<base_name>-<version>.<ext>`
    /// for every enabled format. Blocking.
    ///
    /// Either every format lands in `output_dir` or none does.
    pub fn assemble(
        &self,
        mappings: &[ArchiveEntryMapping],
        output_dir: &Path,
    ) -> Result<AssemblyResult, AssemblyError> {
        self.assemble_staged(mappings, output_dir)?.publish()
    }

    /// Write every format into a private directory beside `output_dir`
    /// without publishing anything. Dropping the result discards the
    /// archives.
    pub fn assemble_staged(
        &self,
        mappings: &[ArchiveEntryMapping],
        output_dir: &Path,
    ) -> Result<StagedAssembly, AssemblyError> {
        let stem = self.options.archive_stem();
        if self.options.formats.is_empty() {
            return Err(AssemblyError::NoFormats(stem));
        }

        let (plan, overwritten) = self.plan(mappings)?;
        let prefix = if self.options.top_level_dir {
            format!("{stem}/")
        } else {
            String::new()
        };
        let entries: Vec<(String, &PlannedEntry)> = plan
            .iter()
            .map(|(dest, entry)| (format!("{prefix}{dest}"), entry))
            .collect();

        std::fs::create_dir_all(output_dir)?;
        let parent = output_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let dir = tempfile::Builder::new().prefix(".relkit-").tempdir_in(parent)?;

        let mut archives = Vec::new();
        for format in &self.options.formats {
            let target = dir.path().join(format!("{stem}.{}", format.extension()));
            write_archive(*format, &target, &entries)?;
            debug!(archive = %target.display(), entries = entries.len(), "written");
            archives.push(target);
        }

        Ok(StagedAssembly {
            dir,
            output_dir: output_dir.to_path_buf(),
            result: AssemblyResult {
                archives,
                entries: entries.into_iter().map(|(name, _)| name).collect(),
                overwritten,
            },
        })
    }

    fn plan(
        &self,
        mappings: &[ArchiveEntryMapping],
    ) -> Result<(BTreeMap<String, PlannedEntry>, usize), AssemblyError> {
        let executable = FileSetDescriptor {
            include_patterns: self.options.executable.clone(),
            ..FileSetDescriptor::default()
        }
        .compile()?;
        let has_executable_globs = !self.options.executable.is_empty();

        let mut ordered: Vec<&ArchiveEntryMapping> = mappings.iter().collect();
        ordered.sort_by_key(|m| m.priority);

        let mut plan = BTreeMap::new();
        let mut overwritten = 0;

        for mapping in ordered {
            let name = mapping.source_file_set.name().to_string();
            let files =
                mapping
                    .source_file_set
                    .resolve()
                    .map_err(|source| AssemblyError::MissingInput {
                        file_set: name.clone(),
                        source,
                    })?;

            for file in files {
                if let Some(filter) = &mapping.entry_filter {
                    if !filter.matches(&file.relative_path) {
                        continue;
                    }
                }
                let dest = join_prefix(&mapping.destination_prefix, &file.relative_path);
                let mode = if (has_executable_globs && executable.matches(&dest)) || file.executable
                {
                    MODE_EXECUTABLE
                } else {
                    MODE_REGULAR
                };
                let entry = PlannedEntry {
                    origin: name.clone(),
                    source: EntrySource::File(file.absolute_path),
                    mode,
                };
                overwritten += self.insert(&mut plan, dest, entry)?;
            }
        }

        if let Some(manifest) = &self.options.manifest {
            let entry = PlannedEntry {
                origin: "manifest".to_string(),
                source: EntrySource::Bytes(manifest.render().into_bytes()),
                mode: MODE_REGULAR,
            };
            overwritten += self.insert(&mut plan, MANIFEST_ENTRY.to_string(), entry)?;
        }

        Ok((plan, overwritten))
    }

    fn insert(
        &self,
        plan: &mut BTreeMap<String, PlannedEntry>,
        dest: String,
        entry: PlannedEntry,
    ) -> Result<usize, AssemblyError> {
        match plan.get(&dest) {
            Some(existing) if self.options.on_conflict == ConflictPolicy::Error => {
                Err(AssemblyError::Conflict {
                    path: dest,
                    first: existing.origin.clone(),
                    second: entry.origin,
                })
            }
            Some(existing) => {
                debug!(path = %dest, from = %existing.origin, to = %entry.origin, "entry overwritten");
                plan.insert(dest, entry);
                Ok(1)
            }
            None => {
                plan.insert(dest, entry);
                Ok(0)
            }
        }
    }
}

fn join_prefix(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() || prefix == "." {
        relative.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

fn write_archive(
    format: ArchiveFormat,
    target: &Path,
    entries: &[(String, &PlannedEntry)],
) -> Result<(), AssemblyError> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::other("archive path has no parent"))?;
    let tmp = tempfile::Builder::new()
        .prefix(".relkit-")
        .suffix(".part")
        .tempfile_in(dir)?;

    {
        let out = BufWriter::new(tmp.as_file());
        match format {
            ArchiveFormat::Zip => {
                write_zip(out, entries)?.flush()?;
            }
            ArchiveFormat::Tar => {
                write_tar(out, entries)?.flush()?;
            }
            ArchiveFormat::TarGz => {
                let gz = write_tar(GzEncoder::new(out, Compression::default()), entries)?;
                gz.finish()?.flush()?;
            }
            ArchiveFormat::TarZst => {
                let zst = write_tar(zstd::stream::write::Encoder::new(out, 0)?, entries)?;
                zst.finish()?.flush()?;
            }
        }
    }

    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn write_zip<W: Write + Seek>(
    out: W,
    entries: &[(String, &PlannedEntry)],
) -> Result<W, AssemblyError> {
    let mut zip = zip::ZipWriter::new(out);
    for (name, entry) in entries {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(entry.mode);
        zip.start_file(name.as_str(), options)?;
        match &entry.source {
            EntrySource::File(path) => {
                io::copy(&mut File::open(path)?, &mut zip)?;
            }
            EntrySource::Bytes(bytes) => zip.write_all(bytes)?,
        }
    }
    Ok(zip.finish()?)
}

fn write_tar<W: Write>(out: W, entries: &[(String, &PlannedEntry)]) -> io::Result<W> {
    let mut builder = tar::Builder::new(out);
    for (name, entry) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(entry.mode);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        match &entry.source {
            EntrySource::File(path) => {
                let file = File::open(path)?;
                header.set_size(file.metadata()?.len());
                builder.append_data(&mut header, name, file)?;
            }
            EntrySource::Bytes(bytes) => {
                header.set_size(bytes.len() as u64);
                builder.append_data(&mut header, name, bytes.as_slice())?;
            }
        }
    }
    builder.into_inner()
}
