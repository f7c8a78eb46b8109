//! The build task graph.
//!
//! `resolve` (all bundles concurrently) → `expand` (concurrently, disjoint
//! destinations) → `assemble` per distribution → `rewrite` where configured.
//! Each stage only starts once the previous one has fully succeeded, so a
//! failure anywhere leaves no partially built distribution behind.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use relkit_schema::DistributionManifest;
use tracing::{info, warn};

use crate::assemble::{
    ArchiveEntryMapping, AssemblyError, AssemblyOptions, AssemblyResult, DistributionAssembler,
    StagedAssembly,
};
use crate::cache::{ArtifactCache, Backend, HttpRepository, LocalRepository, ResolvedArtifact};
use crate::config::{BuildConfig, ConfigError, DistributionConfig, RepositoryConfig};
use crate::error::BuildError;
use crate::expand::{ArchiveExpander, StagingDirectory};
use crate::fileset::{ExposedFileSet, FileProducer, SourceDirectory, StagingStep};
use crate::manifest::ManifestComposer;
use crate::rewrite::{PathRewriter, RewriteError, RewriteReport};

/// Outcome of building one distribution.
#[derive(Debug, Clone)]
pub struct DistributionReport {
    pub name: String,
    pub assembly: AssemblyResult,
    /// One report per archive when the distribution strips segments.
    pub rewrites: Vec<RewriteReport>,
}

/// Paths removed by [`BuildGraph::clean`].
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
}

/// Runs build operations described by a [`BuildConfig`].
#[derive(Debug)]
pub struct BuildGraph {
    config: BuildConfig,
    cache: Arc<ArtifactCache>,
    expander: Arc<ArchiveExpander>,
    composer: ManifestComposer,
}

impl BuildGraph {
    /// Build the graph, wiring the cache to the configured repositories.
    pub fn new(config: BuildConfig, offline: bool) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;

        let backends: Vec<Box<dyn Backend>> = config
            .resolved_repositories()
            .into_iter()
            .map(|repo| -> Box<dyn Backend> {
                match repo {
                    RepositoryConfig::Local { path } => Box::new(LocalRepository::new(path)),
                    RepositoryConfig::Http { url } => {
                        Box::new(HttpRepository::new(url, client.clone()))
                    }
                }
            })
            .collect();

        let cache = ArtifactCache::new(config.cache_dir()?, backends).offline(offline);
        Ok(Self::with_parts(
            config,
            Arc::new(cache),
            ManifestComposer::new(),
        ))
    }

    /// Build the graph from explicit parts.
    pub fn with_parts(
        config: BuildConfig,
        cache: Arc<ArtifactCache>,
        composer: ManifestComposer,
    ) -> Self {
        Self {
            config,
            cache,
            expander: Arc::new(ArchiveExpander::new()),
            composer,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Resolve every configured bundle, keyed by bundle id.
    pub async fn resolve(&self) -> Result<Vec<(String, ResolvedArtifact)>, BuildError> {
        let ids: Vec<&str> = self.config.bundles.iter().map(|b| b.id.as_str()).collect();
        self.resolve_bundles(&ids).await
    }

    async fn resolve_bundles(
        &self,
        ids: &[&str],
    ) -> Result<Vec<(String, ResolvedArtifact)>, BuildError> {
        let coordinates = ids
            .iter()
            .map(|id| {
                self.config
                    .bundle(id)
                    .map(|b| b.coordinate.clone())
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown bundle '{id}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let resolved = self.cache.resolve_all(&coordinates).await?;
        Ok(ids
            .iter()
            .map(|id| (*id).to_string())
            .zip(resolved)
            .collect())
    }

    /// Resolve and stage every bundle.
    pub async fn expand(&self) -> Result<Vec<(String, StagingDirectory)>, BuildError> {
        let resolved = self.resolve().await?;
        let staged = try_join_all(resolved.iter().map(|(id, artifact)| async move {
            let bundle = self
                .config
                .bundle(id)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown bundle '{id}'")))?;
            let staging = self
                .expander
                .expand(artifact, &self.config.stage_dir(bundle))
                .await?;
            Ok::<_, BuildError>((id.clone(), staging))
        }))
        .await?;
        Ok(staged)
    }

    /// Compose the manifest from `[manifest]` and the project version.
    pub fn manifest(&self) -> Result<DistributionManifest, BuildError> {
        Ok(self.composer.compose(&self.config.manifest_config())?)
    }

    /// Assemble the selected distributions (all when `target` is `None`)
    /// without rewriting entry paths.
    pub async fn assemble(
        &self,
        target: Option<&str>,
    ) -> Result<Vec<DistributionReport>, BuildError> {
        let staged = self.stage_distributions(target).await?;
        let pending = staged
            .into_iter()
            .map(|(name, assembly)| (name, assembly, Vec::new()))
            .collect();
        publish(pending).await
    }

    /// The full graph: resolve, expand, assemble and rewrite.
    ///
    /// Nothing reaches the distributions directory unless every archive of
    /// every selected distribution was written and rewritten.
    pub async fn build(&self, target: Option<&str>) -> Result<Vec<DistributionReport>, BuildError> {
        let staged = self.expand().await?;
        let refreshed = staged.iter().filter(|(_, s)| s.refreshed).count();
        info!(bundles = staged.len(), refreshed, "staging complete");

        let mut pending = Vec::new();
        for (name, assembly) in self.stage_distributions(target).await? {
            let segments = self
                .config
                .distribution(&name)
                .map_or(0, |d| d.strip_segments);
            if segments == 0 {
                pending.push((name, assembly, Vec::new()));
                continue;
            }

            let rewriter = PathRewriter::new(segments);
            let (assembly, rewrites) = tokio::task::spawn_blocking(move || {
                let rewrites = assembly
                    .archives()
                    .iter()
                    .map(|archive| rewriter.rewrite(archive))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, RewriteError>((assembly, rewrites))
            })
            .await??;
            pending.push((name, assembly, rewrites));
        }
        publish(pending).await
    }

    /// Write the selected distributions into private directories; nothing
    /// is published yet.
    async fn stage_distributions(
        &self,
        target: Option<&str>,
    ) -> Result<Vec<(String, StagedAssembly)>, BuildError> {
        let targets = self.targets(target)?;

        let needed: BTreeSet<&str> = targets
            .iter()
            .flat_map(|d| d.contents.iter().filter_map(|c| c.bundle.as_deref()))
            .collect();
        let needed: Vec<&str> = needed.into_iter().collect();
        let resolved = self.resolve_bundles(&needed).await?;

        let mut steps: HashMap<String, Arc<StagingStep>> = HashMap::new();
        for (id, artifact) in resolved {
            let bundle = self
                .config
                .bundle(&id)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown bundle '{id}'")))?;
            let step = StagingStep::new(artifact, self.config.stage_dir(bundle));
            steps.insert(id, Arc::new(step));
        }

        let manifest = if targets.iter().any(|d| d.embed_manifest) {
            Some(self.manifest()?)
        } else {
            None
        };

        let mut staged = Vec::new();
        for dist in targets {
            let mappings = self.mappings(dist, &steps)?;
            let options = AssemblyOptions {
                base_name: dist.base_name(&self.config.project).to_string(),
                version: self.config.project.version.clone(),
                formats: dist.formats.clone(),
                top_level_dir: dist.top_level_dir,
                on_conflict: dist.on_conflict,
                executable: dist.executable.clone(),
                manifest: if dist.embed_manifest {
                    manifest.clone()
                } else {
                    None
                },
            };

            let output_dir = self.config.distributions_dir();
            let assembler = DistributionAssembler::new(options);
            let assembly = tokio::task::spawn_blocking(move || {
                assembler.assemble_staged(&mappings, &output_dir)
            })
            .await??;
            staged.push((dist.name.clone(), assembly));
        }
        Ok(staged)
    }

    /// Remove staging directories and assembled archives, and the artifact
    /// cache when `include_cache` is set.
    pub fn clean(&self, include_cache: bool) -> Result<CleanReport, BuildError> {
        let mut targets: Vec<PathBuf> = Vec::new();
        for bundle in &self.config.bundles {
            let stage = self.config.stage_dir(bundle);
            let mut lock = stage.clone().into_os_string();
            lock.push(".lock");
            targets.push(stage);
            targets.push(PathBuf::from(lock));
        }
        targets.push(self.config.distributions_dir());
        if include_cache {
            targets.push(self.cache.root().to_path_buf());
        }

        let mut report = CleanReport::default();
        for path in targets {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else if path.exists() {
                std::fs::remove_file(&path)
            } else {
                continue;
            };
            match removed {
                Ok(()) => {
                    info!(path = %path.display(), "removed");
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove");
                    return Err(e.into());
                }
            }
        }
        Ok(report)
    }

    fn targets(&self, target: Option<&str>) -> Result<Vec<&DistributionConfig>, BuildError> {
        match target {
            Some(name) => {
                let dist = self.config.distribution(name).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown distribution '{name}'"))
                })?;
                Ok(vec![dist])
            }
            None => Ok(self.config.distributions.iter().collect()),
        }
    }

    fn mappings(
        &self,
        dist: &DistributionConfig,
        steps: &HashMap<String, Arc<StagingStep>>,
    ) -> Result<Vec<ArchiveEntryMapping>, BuildError> {
        dist.contents
            .iter()
            .map(|contents| -> Result<ArchiveEntryMapping, BuildError> {
                let producer: Arc<dyn FileProducer> = match (&contents.bundle, &contents.dir) {
                    (Some(id), _) => steps
                        .get(id)
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownBundle {
                            distribution: dist.name.clone(),
                            bundle: id.clone(),
                        })?,
                    (None, Some(dir)) => {
                        Arc::new(SourceDirectory::new(self.config.contents_dir(dir)))
                    }
                    (None, None) => {
                        return Err(ConfigError::Invalid(format!(
                            "distribution '{}': contents block without a source",
                            dist.name
                        ))
                        .into());
                    }
                };
                let file_set =
                    ExposedFileSet::new(contents.label(), producer, contents.descriptor());
                Ok(ArchiveEntryMapping::new(file_set, contents.into.clone())
                    .with_priority(contents.priority))
            })
            .collect()
    }
}

type Pending = Vec<(String, StagedAssembly, Vec<RewriteReport>)>;

/// Move staged archives into place, in distribution order.
async fn publish(pending: Pending) -> Result<Vec<DistributionReport>, BuildError> {
    let reports = tokio::task::spawn_blocking(move || {
        pending
            .into_iter()
            .map(|(name, staged, rewrites)| -> Result<_, AssemblyError> {
                Ok(DistributionReport {
                    name,
                    assembly: staged.publish()?,
                    rewrites,
                })
            })
            .collect::<Result<Vec<_>, AssemblyError>>()
    })
    .await??;
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn publish_zip(repo: &Path, coordinate: &str, entries: &[(&str, &[u8])]) {
        let c: relkit_schema::ArtifactCoordinate = coordinate.parse().unwrap();
        let path = repo.join(c.repository_path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn graph(root: &Path, text: &str) -> BuildGraph {
        let config = BuildConfig::parse(text, Path::new("relkit.toml"), root.to_path_buf()).unwrap();
        let cache = ArtifactCache::new(
            config.cache_dir().unwrap(),
            vec![Box::new(LocalRepository::new(root.join("repo")))],
        );
        BuildGraph::with_parts(
            config,
            Arc::new(cache),
            ManifestComposer::with_clock(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        )
    }

    const CONFIG: &str = r#"
[project]
name = "demo"
version = "1.0"

[cache]
dir = "cache"

[[bundle]]
id = "core"
coordinate = "io.example:corepkg:2.0.0@zip"

[manifest]
title = "Demo"
vendor = "Example"

[[distribution]]
name = "main"
formats = ["zip"]
strip_segments = 1

[[distribution.contents]]
bundle = "core"
root = "corepkg-2.0.0/lib"
into = "lib"
include = ["*.jar"]
"#;

    #[tokio::test]
    async fn test_build_strips_top_level_dir() {
        let root = tempdir().unwrap();
        publish_zip(
            &root.path().join("repo"),
            "io.example:corepkg:2.0.0@zip",
            &[("corepkg-2.0.0/lib/a.jar", b"a"), ("corepkg-2.0.0/README", b"r")],
        );

        let reports = graph(root.path(), CONFIG).build(None).await.unwrap();

        assert_eq!(reports.len(), 1);
        let archive = &reports[0].assembly.archives[0];
        assert_eq!(archive, &root.path().join("build/distributions/demo-1.0.zip"));
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["META-INF/MANIFEST.MF", "lib/a.jar"]);
        assert!(zip.by_name("lib/a.jar").is_ok());
    }

    #[tokio::test]
    async fn test_assemble_keeps_top_level_dir() {
        let root = tempdir().unwrap();
        publish_zip(
            &root.path().join("repo"),
            "io.example:corepkg:2.0.0@zip",
            &[("corepkg-2.0.0/lib/a.jar", b"a")],
        );

        let reports = graph(root.path(), CONFIG)
            .assemble(Some("main"))
            .await
            .unwrap();
        assert!(reports[0]
            .assembly
            .entries
            .contains(&"demo-1.0/lib/a.jar".to_string()));
        assert!(reports[0].rewrites.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rewrite_publishes_nothing() {
        let root = tempdir().unwrap();
        publish_zip(
            &root.path().join("repo"),
            "io.example:corepkg:2.0.0@zip",
            &[("lib/a.jar", b"a")],
        );
        let text = CONFIG
            .replace(
                "formats = [\"zip\"]",
                "formats = [\"zip\", \"tar\"]\ntop_level_dir = false",
            )
            .replace(
                "root = \"corepkg-2.0.0/lib\"\ninto = \"lib\"",
                "root = \"lib\"\ninto = \".\"",
            );

        let err = graph(root.path(), &text).build(None).await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Rewrite(RewriteError::InvariantViolation { .. })
        ));

        let left: Vec<_> = fs::read_dir(root.path().join("build/distributions"))
            .unwrap()
            .collect();
        assert!(left.is_empty());
        let stray: Vec<String> = fs::read_dir(root.path().join("build"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".relkit-"))
            .collect();
        assert!(stray.is_empty(), "leftover staging: {stray:?}");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_published_archive() {
        let root = tempdir().unwrap();
        publish_zip(
            &root.path().join("repo"),
            "io.example:corepkg:2.0.0@zip",
            &[("corepkg-2.0.0/lib/a.jar", b"a")],
        );
        let g = graph(root.path(), CONFIG);
        let first = g.build(None).await.unwrap();
        let second = g.build(None).await.unwrap();
        assert_eq!(first[0].assembly.archives, second[0].assembly.archives);
        assert_eq!(
            fs::read_dir(root.path().join("build/distributions"))
                .unwrap()
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_target_is_config_error() {
        let root = tempdir().unwrap();
        let err = graph(root.path(), CONFIG)
            .assemble(Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[tokio::test]
    async fn test_clean_removes_stage_and_distributions() {
        let root = tempdir().unwrap();
        publish_zip(
            &root.path().join("repo"),
            "io.example:corepkg:2.0.0@zip",
            &[("corepkg-2.0.0/lib/a.jar", b"a")],
        );
        let g = graph(root.path(), CONFIG);
        g.build(None).await.unwrap();
        assert!(root.path().join("build/core").exists());

        let report = g.clean(false).unwrap();
        assert!(!root.path().join("build/core").exists());
        assert!(!root.path().join("build/distributions").exists());
        assert!(root.path().join("cache").exists());
        assert!(!report.removed.is_empty());

        g.clean(true).unwrap();
        assert!(!root.path().join("cache").exists());
    }

    #[test]
    fn test_manifest_uses_project_version() {
        let root = tempdir().unwrap();
        let manifest = graph(root.path(), CONFIG).manifest().unwrap();
        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.title, "Demo");
    }
}
