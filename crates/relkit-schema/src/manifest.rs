//! The metadata record embedded in every distribution archive.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Metadata generated fresh for each build, never persisted or reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionManifest {
    /// Entry point of the distribution, if it has one.
    pub main_class_name: Option<String>,
    /// Human-readable title (`Implementation-Title`).
    pub title: String,
    /// Vendor (`Implementation-Vendor`).
    pub vendor: String,
    /// Version of the thing being distributed.
    pub version: String,
    /// Who or what produced the build.
    pub built_by: String,
    /// When the manifest was composed.
    pub build_timestamp: DateTime<Utc>,
    /// Version of the tool that assembled the distribution.
    pub build_tool_version: String,
}

impl DistributionManifest {
    /// Key/value attributes in output order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![("Manifest-Version", "1.0".to_string())];
        if let Some(main) = &self.main_class_name {
            attrs.push(("Main-Class", main.clone()));
        }
        attrs.push(("Implementation-Title", self.title.clone()));
        attrs.push(("Implementation-Vendor", self.vendor.clone()));
        attrs.push(("Implementation-Version", self.version.clone()));
        attrs.push(("Built-By", self.built_by.clone()));
        attrs.push((
            "Build-Timestamp",
            self.build_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        attrs.push((
            "Created-By",
            format!("relkit {}", self.build_tool_version),
        ));
        attrs
    }

    /// Render as JAR manifest text (`Key: value` lines, CRLF-terminated).
    ///
    /// Lines longer than 72 bytes are folded with a leading space, as the JAR
    /// specification requires.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.attributes() {
            let line = format!("{key}: {value}");
            push_folded(&mut out, &line);
        }
        out.push_str("\r\n");
        out
    }
}

fn push_folded(out: &mut String, line: &str) {
    const MAX: usize = 72;
    let mut rest = line;
    let mut first = true;
    while !rest.is_empty() {
        let budget = if first { MAX } else { MAX - 1 };
        let mut cut = rest.len().min(budget);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n");
        rest = &rest[cut..];
        first = false;
    }
}
