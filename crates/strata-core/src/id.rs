use std::fmt;

use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "<unknown>";

/// Maven coordinates (`groupId:artifactId:version`).
///
/// Every component is optional: a POM that failed to parse (or that inherits
/// its group/version from an unresolvable parent) still yields an id.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MavenId {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
}

impl MavenId {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: Some(group_id.into()),
            artifact_id: Some(artifact_id.into()),
            version: Some(version.into()),
        }
    }

    pub fn from_parts(
        group_id: Option<String>,
        artifact_id: Option<String>,
        version: Option<String>,
    ) -> Self {
        Self {
            group_id,
            artifact_id,
            version,
        }
    }

    /// Parse `group:artifact[:version]`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split(':');
        let group_id = parts.next().filter(|s| !s.is_empty())?;
        let artifact_id = parts.next().filter(|s| !s.is_empty())?;
        let version = parts.next().filter(|s| !s.is_empty());
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            group_id: Some(group_id.to_string()),
            artifact_id: Some(artifact_id.to_string()),
            version: version.map(str::to_string),
        })
    }

    /// The `group:artifact` part used for version-agnostic lookups.
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.group_id.as_deref().unwrap_or(UNKNOWN),
            self.artifact_id.as_deref().unwrap_or(UNKNOWN)
        )
    }

    pub fn is_complete(&self) -> bool {
        self.group_id.is_some() && self.artifact_id.is_some() && self.version.is_some()
    }

    /// Same group and artifact, ignoring the version.
    pub fn same_key(&self, other: &MavenId) -> bool {
        self.group_id == other.group_id && self.artifact_id == other.artifact_id
    }
}

impl fmt::Display for MavenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or(UNKNOWN),
            self.artifact_id.as_deref().unwrap_or(UNKNOWN),
            self.version.as_deref().unwrap_or(UNKNOWN)
        )
    }
}
