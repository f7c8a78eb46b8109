//! Composition of the distribution manifest.

use chrono::{DateTime, Utc};
use relkit_schema::DistributionManifest;
use serde::Deserialize;

use crate::config::ConfigError;

/// The `[manifest]` table of `relkit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    pub title: Option<String>,
    pub vendor: Option<String>,
    /// Defaults to `project.version`.
    pub version: Option<String>,
    pub main_class: Option<String>,
    pub built_by: Option<String>,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Builds a fresh [`DistributionManifest`] per build from configuration and
/// a clock.
pub struct ManifestComposer {
    clock: Clock,
}

impl std::fmt::Debug for ManifestComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestComposer").finish_non_exhaustive()
    }
}

impl Default for ManifestComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestComposer {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// Compose the manifest.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] if `title`, `vendor` or `version` is
    /// absent or blank, [`ConfigError::Invalid`] if any value spans lines.
    pub fn compose(&self, config: &ManifestConfig) -> Result<DistributionManifest, ConfigError> {
        let title = required(&config.title, "manifest.title")?;
        let vendor = required(&config.vendor, "manifest.vendor")?;
        let version = required(&config.version, "manifest.version")?;

        Ok(DistributionManifest {
            main_class_name: non_blank(&config.main_class, "manifest.main_class")?,
            title,
            vendor,
            version,
            built_by: non_blank(&config.built_by, "manifest.built_by")?
                .unwrap_or_else(|| crate::TOOL_NAME.to_string()),
            build_timestamp: (self.clock)(),
            build_tool_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Trimmed value, `None` when blank. Line breaks would start a new attribute.
fn non_blank(value: &Option<String>, field: &str) -> Result<Option<String>, ConfigError> {
    let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.contains(['\r', '\n']) {
        return Err(ConfigError::Invalid(format!(
            "{field} must not contain line breaks"
        )));
    }
    Ok(Some(value.to_string()))
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ConfigError> {
    non_blank(value, field)?.ok_or(ConfigError::MissingField(field))
}
