use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Extensions that denote a deployable artifact in a repository layout.
const ARTIFACT_EXTENSIONS: &[&str] = &["jar", "pom", "war", "ear", "aar", "rar", "zip"];

/// One artifact file known to an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: Option<String>,
    pub extension: String,
}

impl ArtifactInfo {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: None,
            extension: "jar".to_string(),
        }
    }

    /// Parse a repository-relative path laid out as
    /// `<group as dirs>/<artifact>/<version>/<artifact>-<version>[-<classifier>].<ext>`.
    pub fn from_repository_path(relative: &Path) -> Option<Self> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        let [group @ .., artifact, version, file] = parts.as_slice() else {
            return None;
        };
        if group.is_empty() {
            return None;
        }

        let (stem, extension) = file.rsplit_once('.')?;
        if !ARTIFACT_EXTENSIONS.contains(&extension) {
            return None;
        }
        let rest = stem
            .strip_prefix(*artifact)?
            .strip_prefix('-')?
            .strip_prefix(*version)?;
        let classifier = match rest {
            "" => None,
            rest => Some(rest.strip_prefix('-').filter(|c| !c.is_empty())?.to_string()),
        };

        Some(Self {
            group_id: group.join("."),
            artifact_id: artifact.to_string(),
            version: version.to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }

    /// `group:artifact`, the key of the version map.
    pub fn key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }

    pub(crate) fn matches(&self, query: &str) -> bool {
        let query = query.to_ascii_lowercase();
        query.split_whitespace().all(|term| {
            self.group_id.to_ascii_lowercase().contains(term)
                || self.artifact_id.to_ascii_lowercase().contains(term)
                || self.version.to_ascii_lowercase().contains(term)
        })
    }
}

impl fmt::Display for ArtifactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}
