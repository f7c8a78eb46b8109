//! Dependency coordinates in `group:name:version[:classifier][@ext]` notation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::SNAPSHOT_SUFFIX;
use crate::types::ArtifactKind;

/// Errors that can occur when parsing an [`ArtifactCoordinate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    /// The text does not have three or four `:`-separated parts.
    #[error("Invalid coordinate '{0}': expected group:name:version[:classifier][@ext]")]
    Malformed(String),

    /// One of the parts is empty or contains whitespace or a path separator.
    #[error("Invalid coordinate '{text}': bad {part} '{value}'")]
    BadPart {
        /// The full coordinate text.
        text: String,
        /// Which part was rejected (`group`, `name`, ...).
        part: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The `@ext` suffix names an artifact type the cache cannot stage.
    #[error("Unsupported artifact extension '{0}': expected jar or zip")]
    UnsupportedExtension(String),
}

/// Identifies a resolvable dependency. Immutable once constructed.
///
/// Comparison and hashing are case-sensitive, matching conventional
/// dependency notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactCoordinate {
    group: String,
    name: String,
    version: String,
    classifier: Option<String>,
    extension: String,
}

impl ArtifactCoordinate {
    /// Build a coordinate from its parts, validating each one.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::BadPart`] if any part is empty or contains
    /// whitespace, `/`, `\` or `:`.
    pub fn new(
        group: &str,
        name: &str,
        version: &str,
        classifier: Option<&str>,
    ) -> Result<Self, CoordinateError> {
        let text = match classifier {
            Some(c) => format!("{group}:{name}:{version}:{c}"),
            None => format!("{group}:{name}:{version}"),
        };
        validate_part(&text, "group", group)?;
        validate_part(&text, "name", name)?;
        validate_part(&text, "version", version)?;
        if let Some(c) = classifier {
            validate_part(&text, "classifier", c)?;
        }
        Ok(Self {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            classifier: classifier.map(str::to_string),
            extension: "jar".to_string(),
        })
    }

    /// Return a copy of this coordinate with a different artifact extension.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::UnsupportedExtension`] unless `ext` is
    /// `jar` or `zip`.
    pub fn with_extension(mut self, ext: &str) -> Result<Self, CoordinateError> {
        ArtifactKind::from_extension(ext)
            .ok_or_else(|| CoordinateError::UnsupportedExtension(ext.to_string()))?;
        self.extension = ext.to_string();
        Ok(self)
    }

    /// The group (e.g. `io.github.linguaphylo`).
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The artifact name (e.g. `lphybeast`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version string as written.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The optional classifier (e.g. `sources`).
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    /// The artifact file extension, `jar` unless overridden with `@ext`.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The kind of file this coordinate resolves to.
    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::from_extension(&self.extension).unwrap_or(ArtifactKind::Jar)
    }

    /// Whether this version must be re-checked against the backends on every
    /// build invocation.
    ///
    /// ```
    /// use relkit_schema::ArtifactCoordinate;
    ///
    /// let snap: ArtifactCoordinate = "io.example:core:1.0-SNAPSHOT".parse().unwrap();
    /// let fixed: ArtifactCoordinate = "io.example:core:1.0".parse().unwrap();
    /// assert!(snap.is_floating());
    /// assert!(!fixed.is_floating());
    /// ```
    pub fn is_floating(&self) -> bool {
        self.version.ends_with(SNAPSHOT_SUFFIX)
            || self.version == "latest.release"
            || self.version == "latest.integration"
    }

    /// File name of the artifact in a Maven-layout repository:
    /// `<name>-<version>[-<classifier>].<ext>`.
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{c}.{}", self.name, self.version, self.extension),
            None => format!("{}-{}.{}", self.name, self.version, self.extension),
        }
    }

    /// Directory segments of the artifact in a Maven-layout repository:
    /// the group split on `.`, then name, then version.
    pub fn directory_segments(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.group.split('.').collect();
        segments.push(&self.name);
        segments.push(&self.version);
        segments
    }

    /// Repository-relative path with `/` separators, suitable for URLs.
    pub fn repository_path(&self) -> String {
        let mut path = self.directory_segments().join("/");
        path.push('/');
        path.push_str(&self.file_name());
        path
    }
}

fn validate_part(text: &str, part: &'static str, value: &str) -> Result<(), CoordinateError> {
    let bad = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '@'));
    // A group made of dots would produce empty directory segments.
    let bad = bad || (part == "group" && value.split('.').any(str::is_empty));
    if bad {
        return Err(CoordinateError::BadPart {
            text: text.to_string(),
            part,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl FromStr for ArtifactCoordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, ext) = match s.split_once('@') {
            Some((body, ext)) => (body, Some(ext)),
            None => (s, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        let coordinate = match parts.as_slice() {
            [group, name, version] => Self::new(group, name, version, None)?,
            [group, name, version, classifier] => {
                Self::new(group, name, version, Some(classifier))?
            }
            _ => return Err(CoordinateError::Malformed(s.to_string())),
        };

        match ext {
            Some(ext) => coordinate.with_extension(ext),
            None => Ok(coordinate),
        }
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{c}")?;
        }
        if self.extension != "jar" {
            write!(f, "@{}", self.extension)?;
        }
        Ok(())
    }
}

impl Serialize for ArtifactCoordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactCoordinate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
