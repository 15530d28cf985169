use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::atomic_write;

pub const USER_ARCHETYPES_XML: &str = "UserArchetypes.xml";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Archetype {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub repository: Option<String>,
    pub description: Option<String>,
}

impl Archetype {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            repository: None,
            description: None,
        }
    }

    fn identity(&self) -> (&str, &str, &str) {
        (&self.group_id, &self.artifact_id, &self.version)
    }
}

/// Collapse archetypes with equal coordinates, keeping the later occurrence
/// at its position.
pub(crate) fn dedup_keep_last(archetypes: Vec<Archetype>) -> Vec<Archetype> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Archetype> = archetypes
        .into_iter()
        .rev()
        .filter(|archetype| {
            let (g, a, v) = archetype.identity();
            seen.insert((g.to_string(), a.to_string(), v.to_string()))
        })
        .collect();
    kept.reverse();
    kept
}

/// Archetypes stored in `path`. A missing or unreadable file yields none.
pub(crate) fn read_archetypes(path: &Path) -> Vec<Archetype> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(
                target = "strata.index",
                path = %path.display(),
                error = %err,
                "failed to read user archetypes"
            );
            return Vec::new();
        }
    };
    let doc = match roxmltree::Document::parse(&text) {
        Ok(doc) => doc,
        Err(err) => {
            tracing::warn!(
                target = "strata.index",
                path = %path.display(),
                error = %err,
                "failed to parse user archetypes"
            );
            return Vec::new();
        }
    };

    doc.root_element()
        .children()
        .filter(|node| node.has_tag_name("archetype"))
        .filter_map(|node| {
            let attr = |name: &str| node.attribute(name).map(str::to_string);
            Some(Archetype {
                group_id: attr("groupId")?,
                artifact_id: attr("artifactId")?,
                version: attr("version")?,
                repository: attr("repository").filter(|r| !r.is_empty()),
                description: attr("description").filter(|d| !d.is_empty()),
            })
        })
        .collect()
}

/// Replace `path` with `archetypes`; failures are logged.
pub(crate) fn write_archetypes(path: &Path, archetypes: &[Archetype]) {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<archetypes>\n");
    for archetype in archetypes {
        xml.push_str("  <archetype");
        push_attr(&mut xml, "groupId", &archetype.group_id);
        push_attr(&mut xml, "artifactId", &archetype.artifact_id);
        push_attr(&mut xml, "version", &archetype.version);
        if let Some(repository) = &archetype.repository {
            push_attr(&mut xml, "repository", repository);
        }
        if let Some(description) = &archetype.description {
            push_attr(&mut xml, "description", description);
        }
        xml.push_str("/>\n");
    }
    xml.push_str("</archetypes>\n");

    if let Err(err) = atomic_write(path, xml.as_bytes()) {
        tracing::warn!(
            target = "strata.index",
            path = %path.display(),
            error = %err,
            "failed to save user archetypes"
        );
    }
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    xml.push(' ');
    xml.push_str(name);
    xml.push_str("=\"");
    for ch in value.chars() {
        match ch {
            '&' => xml.push_str("&amp;"),
            '<' => xml.push_str("&lt;"),
            '>' => xml.push_str("&gt;"),
            '"' => xml.push_str("&quot;"),
            '\n' => xml.push_str("&#10;"),
            ch => xml.push(ch),
        }
    }
    xml.push('"');
}
