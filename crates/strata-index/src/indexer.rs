use std::collections::BTreeSet;
use std::path::Path;

use strata_core::SettingsProvider;
use strata_scheduler::{check_cancelled, CancellationToken};

use crate::artifact::ArtifactInfo;
use crate::error::IndexError;
use crate::metadata::IndexKind;

/// What an [`Indexer`] is asked to scan.
pub struct IndexTarget<'a> {
    pub kind: IndexKind,
    pub path_or_url: &'a str,
    pub repository_ids: &'a BTreeSet<String>,
    pub settings: &'a dyn SettingsProvider,
}

/// Produces the artifact list of a repository and answers free-text search.
///
/// Scans run on a background queue and must check `token` between artifacts.
pub trait Indexer: Send + Sync {
    fn scan(
        &self,
        target: &IndexTarget<'_>,
        token: &CancellationToken,
        sink: &mut dyn FnMut(ArtifactInfo) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;

    /// Whether the index built by this indexer carries a searchable context.
    fn supports_search(&self) -> bool {
        true
    }

    fn search(&self, artifacts: &[ArtifactInfo], query: &str, max_results: usize) -> Vec<ArtifactInfo> {
        let mut hits: Vec<ArtifactInfo> = artifacts
            .iter()
            .filter(|artifact| artifact.matches(query))
            .cloned()
            .collect();
        hits.sort();
        hits.dedup();
        hits.truncate(max_results);
        hits
    }
}

/// Walks a repository on disk.
///
/// Remote repositories can only be scanned when they are reachable as a
/// `file:` URL; anything else fails the scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRepositoryIndexer;

impl LocalRepositoryIndexer {
    fn root<'a>(target: &IndexTarget<'a>) -> Result<&'a Path, IndexError> {
        let location = match target.kind {
            IndexKind::Local => target.path_or_url,
            IndexKind::Remote => target
                .path_or_url
                .strip_prefix("file://")
                .or_else(|| target.path_or_url.strip_prefix("file:"))
                .ok_or_else(|| IndexError::Scan {
                    path_or_url: target.path_or_url.to_string(),
                    message: "remote repositories are not reachable".to_string(),
                })?,
        };
        let root = Path::new(location);
        if !root.is_dir() {
            return Err(IndexError::Scan {
                path_or_url: target.path_or_url.to_string(),
                message: "repository directory does not exist".to_string(),
            });
        }
        Ok(root)
    }
}

impl Indexer for LocalRepositoryIndexer {
    fn scan(
        &self,
        target: &IndexTarget<'_>,
        token: &CancellationToken,
        sink: &mut dyn FnMut(ArtifactInfo) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let root = Self::root(target)?;
        let mut count = 0usize;
        for entry in walkdir::WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            check_cancelled(token)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if let Some(info) = ArtifactInfo::from_repository_path(relative) {
                sink(info)?;
                count += 1;
            }
        }
        tracing::debug!(
            target = "strata.index",
            repository = %target.path_or_url,
            artifacts = count,
            "scanned repository"
        );
        Ok(())
    }
}

/// An indexer for repositories without a searchable index context: the
/// group/artifact/version maps are built, search answers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotNexusIndexer<I>(pub I);

impl<I: Indexer> Indexer for NotNexusIndexer<I> {
    fn scan(
        &self,
        target: &IndexTarget<'_>,
        token: &CancellationToken,
        sink: &mut dyn FnMut(ArtifactInfo) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        self.0.scan(target, token, sink)
    }

    fn supports_search(&self) -> bool {
        false
    }
}
