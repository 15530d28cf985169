use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The subset of a `settings.xml` file the engine consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MavenSettingsFile {
    pub local_repository: Option<PathBuf>,
    pub offline: Option<bool>,
    pub active_profiles: BTreeSet<String>,
}

impl MavenSettingsFile {
    /// Read `path`, returning `None` when it is missing or malformed.
    pub fn read(path: &Path) -> Option<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "strata.config",
                        path = %path.display(),
                        error = %err,
                        "failed to read settings file"
                    );
                }
                return None;
            }
        };
        match Self::parse(&contents) {
            Ok(settings) => Some(settings),
            Err(err) => {
                tracing::warn!(
                    target = "strata.config",
                    path = %path.display(),
                    error = %err,
                    "ignoring malformed settings file"
                );
                None
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, roxmltree::Error> {
        let doc = roxmltree::Document::parse(contents)?;
        let root = doc.root_element();

        let local_repository = child_text(&root, "localRepository").map(|text| {
            let expanded = expand_user_home(&text);
            PathBuf::from(expanded)
        });
        let offline = child_text(&root, "offline").map(|text| text.eq_ignore_ascii_case("true"));
        let active_profiles = child_element(&root, "activeProfiles")
            .map(|node| {
                node.children()
                    .filter(|n| n.is_element() && n.has_tag_name("activeProfile"))
                    .filter_map(|n| n.text())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            local_repository,
            offline,
            active_profiles,
        })
    }
}

fn expand_user_home(text: &str) -> String {
    if !text.contains("${user.home}") {
        return text.to_string();
    }
    match super::home_dir() {
        Some(home) => text.replace("${user.home}", &home.to_string_lossy()),
        None => text.to_string(),
    }
}

fn child_element<'a>(
    node: &'a roxmltree::Node<'a, 'a>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child_element(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
