//! `relkit.toml`: project, repositories, bundles, manifest and distributions.
//!
//! Everything is validated up front so that configuration mistakes surface
//! before any network or filesystem work. Relative paths are resolved
//! against the directory containing the config file.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use relkit_schema::{ArchiveFormat, ArtifactCoordinate};
use serde::Deserialize;
use thiserror::Error;

use crate::assemble::ConflictPolicy;
use crate::fileset::FileSetDescriptor;
use crate::manifest::ManifestConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relkit.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Distribution '{distribution}' references unknown bundle '{bundle}'")]
    UnknownBundle {
        distribution: String,
        bundle: String,
    },

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<BundleConfig>,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default, rename = "distribution")]
    pub distributions: Vec<DistributionConfig>,

    /// Directory the config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryConfig {
    Local { path: PathBuf },
    Http { url: String },
}

/// A zipped artifact to resolve and stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    pub id: String,
    pub coordinate: ArtifactCoordinate,
    /// Relative to the build directory; defaults to the id.
    pub stage: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    pub name: String,
    /// Defaults to `project.name`.
    pub base_name: Option<String>,
    #[serde(default = "default_formats")]
    pub formats: Vec<ArchiveFormat>,
    /// Leading segments stripped after assembly; 0 disables the rewrite.
    #[serde(default)]
    pub strip_segments: usize,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    #[serde(default = "yes")]
    pub embed_manifest: bool,
    #[serde(default = "yes")]
    pub top_level_dir: bool,
    #[serde(default)]
    pub executable: Vec<String>,
    #[serde(default)]
    pub contents: Vec<ContentsConfig>,
}

fn default_formats() -> Vec<ArchiveFormat> {
    vec![ArchiveFormat::Zip, ArchiveFormat::Tar]
}

fn yes() -> bool {
    true
}

/// One `[[distribution.contents]]` block: a file set and where it goes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentsConfig {
    pub bundle: Option<String>,
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub root: PathBuf,
    #[serde(default)]
    pub into: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ContentsConfig {
    pub fn descriptor(&self) -> FileSetDescriptor {
        FileSetDescriptor {
            root_directory: self.root.clone(),
            include_patterns: self.include.clone(),
            exclude_patterns: self.exclude.clone(),
        }
    }

    /// A short label for logs and errors.
    pub fn label(&self) -> String {
        let source = match (&self.bundle, &self.dir) {
            (Some(b), _) => format!("bundle:{b}"),
            (None, Some(d)) => format!("dir:{}", d.display()),
            (None, None) => "?".to_string(),
        };
        if self.root.as_os_str().is_empty() {
            source
        } else {
            format!("{source}/{}", self.root.display())
        }
    }
}

impl BuildConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::parse(&text, path, base_dir)
    }

    /// Parse and validate config text. `origin` is only used in errors.
    pub fn parse(text: &str, origin: &Path, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.base_dir = base_dir;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::MissingField("project.name"));
        }
        if self.project.version.trim().is_empty() {
            return Err(ConfigError::MissingField("project.version"));
        }

        let mut bundle_ids = HashSet::new();
        let mut stages: Vec<(PathBuf, &str)> = Vec::new();
        for bundle in &self.bundles {
            if bundle.id.trim().is_empty() {
                return Err(ConfigError::MissingField("bundle.id"));
            }
            if !bundle_ids.insert(bundle.id.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "bundle",
                    name: bundle.id.clone(),
                });
            }

            // Each expansion wipes its directory, so stages must be disjoint.
            let stage = stage_path(bundle)?;
            for (other, other_id) in &stages {
                if *other == stage {
                    return Err(ConfigError::Duplicate {
                        kind: "stage directory",
                        name: stage.display().to_string(),
                    });
                }
                if other.starts_with(&stage) || stage.starts_with(other) {
                    return Err(ConfigError::Invalid(format!(
                        "bundles '{other_id}' and '{}' have nested stage directories",
                        bundle.id
                    )));
                }
            }
            stages.push((stage, bundle.id.as_str()));
        }

        let mut names = HashSet::new();
        for dist in &self.distributions {
            if !names.insert(dist.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "distribution",
                    name: dist.name.clone(),
                });
            }
            if dist.formats.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "distribution '{}' enables no formats",
                    dist.name
                )));
            }
            check_patterns(&dist.name, &dist.executable)?;

            for contents in &dist.contents {
                match (&contents.bundle, &contents.dir) {
                    (Some(bundle), None) => {
                        if !bundle_ids.contains(bundle.as_str()) {
                            return Err(ConfigError::UnknownBundle {
                                distribution: dist.name.clone(),
                                bundle: bundle.clone(),
                            });
                        }
                    }
                    (None, Some(_)) => {}
                    _ => {
                        return Err(ConfigError::Invalid(format!(
                            "distribution '{}': each contents block needs exactly one of 'bundle' or 'dir'",
                            dist.name
                        )));
                    }
                }
                check_patterns(&dist.name, &contents.include)?;
                check_patterns(&dist.name, &contents.exclude)?;
            }
        }

        if self.distributions.iter().any(|d| d.embed_manifest) {
            let m = &self.manifest;
            if m.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
                return Err(ConfigError::MissingField("manifest.title"));
            }
            if m.vendor.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(ConfigError::MissingField("manifest.vendor"));
            }
        }

        Ok(())
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn build_dir(&self) -> PathBuf {
        self.resolve_path(&self.project.build_dir)
    }

    /// Where assembled archives are written.
    pub fn distributions_dir(&self) -> PathBuf {
        self.build_dir().join(crate::paths::DISTRIBUTIONS_DIR)
    }

    /// The configured cache directory, else `$RELKIT_HOME/cache`.
    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache.dir {
            Some(dir) => Ok(self.resolve_path(dir)),
            None => crate::paths::default_cache_dir().ok_or(ConfigError::MissingField("cache.dir")),
        }
    }

    pub fn stage_dir(&self, bundle: &BundleConfig) -> PathBuf {
        let stage = bundle
            .stage
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.id));
        self.build_dir().join(stage)
    }

    /// Repository paths resolved against the config directory.
    pub fn resolved_repositories(&self) -> Vec<RepositoryConfig> {
        self.repositories
            .iter()
            .map(|r| match r {
                RepositoryConfig::Local { path } => RepositoryConfig::Local {
                    path: self.resolve_path(path),
                },
                RepositoryConfig::Http { url } => RepositoryConfig::Http { url: url.clone() },
            })
            .collect()
    }

    pub fn contents_dir(&self, dir: &Path) -> PathBuf {
        self.resolve_path(dir)
    }

    pub fn bundle(&self, id: &str) -> Option<&BundleConfig> {
        self.bundles.iter().find(|b| b.id == id)
    }

    pub fn distribution(&self, name: &str) -> Option<&DistributionConfig> {
        self.distributions.iter().find(|d| d.name == name)
    }

    /// `[manifest]` with `version` defaulted to the project version.
    pub fn manifest_config(&self) -> ManifestConfig {
        let mut m = self.manifest.clone();
        if m.version.is_none() {
            m.version = Some(self.project.version.clone());
        }
        m
    }
}

impl DistributionConfig {
    pub fn base_name<'a>(&'a self, project: &'a ProjectConfig) -> &'a str {
        self.base_name.as_deref().unwrap_or(&project.name)
    }
}

/// The bundle's stage relative to the build directory, normalised.
fn stage_path(bundle: &BundleConfig) -> Result<PathBuf, ConfigError> {
    let raw = bundle
        .stage
        .clone()
        .unwrap_or_else(|| PathBuf::from(&bundle.id));

    let mut stage = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => stage.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "bundle '{}': stage '{}' must stay inside the build directory",
                    bundle.id,
                    raw.display()
                )));
            }
        }
    }

    if stage.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "bundle '{}': stage must be a non-empty relative path",
            bundle.id
        )));
    }
    if stage.starts_with(crate::paths::DISTRIBUTIONS_DIR) {
        return Err(ConfigError::Invalid(format!(
            "bundle '{}': stage '{}' is reserved for assembled archives",
            bundle.id,
            raw.display()
        )));
    }
    Ok(stage)
}

fn check_patterns(distribution: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::Invalid(format!(
                "distribution '{distribution}': bad pattern '{pattern}': {e}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[project]
name = "LPhyBeastExt"
version = "0.3.1"

[cache]
dir = ".cache"

[[repository]]
kind = "local"
path = "repo"

[[repository]]
kind = "http"
url = "https://repo1.maven.org/maven2"

[[bundle]]
id = "lphybeast"
coordinate = "io.github.linguaphylo:lphybeast:1.1.0@zip"

[manifest]
title = "LPhyBEAST extension"
vendor = "LPhyBEAST developer team"
main_class = "lphybeast.LPhyBEAST"

[[distribution]]
name = "main"
formats = ["zip"]
strip_segments = 1
executable = ["bin/*"]

[[distribution.contents]]
bundle = "lphybeast"
root = "lphybeast-1.1.0/lib"
into = "lib"
include = ["**/*.jar"]
exclude = ["*-sources.jar"]

[[distribution.contents]]
dir = "."
include = ["README.md", "LICENSE"]
priority = 1
"#;

    fn parse(text: &str) -> Result<BuildConfig, ConfigError> {
        BuildConfig::parse(text, Path::new("relkit.toml"), PathBuf::from("/work"))
    }

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.project.build_dir, PathBuf::from("build"));
        assert_eq!(config.build_dir(), PathBuf::from("/work/build"));
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/work/.cache"));
        assert_eq!(
            config.resolved_repositories()[0],
            RepositoryConfig::Local {
                path: PathBuf::from("/work/repo")
            }
        );

        let bundle = config.bundle("lphybeast").unwrap();
        assert_eq!(config.stage_dir(bundle), PathBuf::from("/work/build/lphybeast"));

        let dist = config.distribution("main").unwrap();
        assert_eq!(dist.base_name(&config.project), "LPhyBeastExt");
        assert_eq!(dist.formats, vec![ArchiveFormat::Zip]);
        assert_eq!(dist.on_conflict, ConflictPolicy::Overwrite);
        assert!(dist.embed_manifest && dist.top_level_dir);
        assert_eq!(dist.contents[0].label(), "bundle:lphybeast/lphybeast-1.1.0/lib");
        assert_eq!(dist.contents[1].priority, 1);

        assert_eq!(config.manifest_config().version.as_deref(), Some("0.3.1"));
    }

    #[test]
    fn test_default_formats_are_zip_and_tar() {
        let text = SAMPLE.replace("formats = [\"zip\"]\n", "");
        let config = parse(&text).unwrap();
        assert_eq!(
            config.distributions[0].formats,
            vec![ArchiveFormat::Zip, ArchiveFormat::Tar]
        );
    }

    #[test]
    fn test_unknown_bundle_reference() {
        let text = SAMPLE.replace("bundle = \"lphybeast\"", "bundle = \"nope\"");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::UnknownBundle { ref bundle, .. }) if bundle == "nope"
        ));
    }

    #[test]
    fn test_malformed_coordinate_is_parse_error() {
        let text = SAMPLE.replace(
            "io.github.linguaphylo:lphybeast:1.1.0@zip",
            "lphybeast-1.1.0",
        );
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("relkit.toml"));
    }

    #[test]
    fn test_missing_manifest_vendor_when_embedding() {
        let text = SAMPLE.replace("vendor = \"LPhyBEAST developer team\"\n", "");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::MissingField("manifest.vendor"))
        ));
    }

    #[test]
    fn test_contents_needs_exactly_one_source() {
        let text = SAMPLE.replace("dir = \".\"", "dir = \".\"\nbundle = \"lphybeast\"");
        assert!(matches!(parse(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_bundle() {
        let text = format!(
            "{SAMPLE}\n[[bundle]]\nid = \"lphybeast\"\ncoordinate = \"a:b:1\"\n"
        );
        assert!(matches!(
            parse(&text),
            Err(ConfigError::Duplicate { kind: "bundle", .. })
        ));
    }

    #[test]
    fn test_shared_stage_directory_is_rejected() {
        let text = format!(
            "{SAMPLE}\n[[bundle]]\nid = \"other\"\ncoordinate = \"a:b:1@zip\"\nstage = \"./lphybeast\"\n"
        );
        let err = parse(&text).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Duplicate { kind: "stage directory", ref name } if name == "lphybeast"
        ));
    }

    #[test]
    fn test_nested_stage_directories_are_rejected() {
        let text = format!(
            "{SAMPLE}\n[[bundle]]\nid = \"other\"\ncoordinate = \"a:b:1@zip\"\nstage = \"lphybeast/inner\"\n"
        );
        assert!(matches!(parse(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_stage_cannot_leave_build_dir() {
        let text = SAMPLE.replace(
            "coordinate = \"io.github.linguaphylo:lphybeast:1.1.0@zip\"",
            "coordinate = \"io.github.linguaphylo:lphybeast:1.1.0@zip\"\nstage = \"../outside\"",
        );
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("inside the build directory"));
    }

    #[test]
    fn test_stage_cannot_use_distributions_dir() {
        let text = SAMPLE.replace(
            "coordinate = \"io.github.linguaphylo:lphybeast:1.1.0@zip\"",
            "coordinate = \"io.github.linguaphylo:lphybeast:1.1.0@zip\"\nstage = \"distributions\"",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("reserved"));

        // The default stage is the bundle id, so the id is checked too.
        let text = SAMPLE.replace("\"lphybeast\"", "\"distributions\"");
        assert!(matches!(parse(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file_uses_its_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relkit.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = BuildConfig::load(&path).unwrap();
        assert_eq!(config.build_dir(), dir.path().join("build"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            BuildConfig::load(&dir.path().join("relkit.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
