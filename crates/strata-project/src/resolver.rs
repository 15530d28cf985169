use std::path::{Path, PathBuf};

use strata_core::{MavenId, SettingsProvider};
use strata_scheduler::{check_cancelled, CancellationToken, DownloadOutcome, DownloadPool};

use crate::error::ProjectError;
use crate::events::NativeHandle;
use crate::model::{Dependency, DependencyState, Plugin, ProblemKind, ProjectState, ReadProblem};

/// Outcome of resolving one project's dependencies.
#[derive(Debug, Clone, Default)]
pub struct ResolvedData {
    pub dependencies: Vec<Dependency>,
    pub plugins: Vec<Plugin>,
    pub problems: Vec<ReadProblem>,
    pub native_handle: Option<NativeHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFolders {
    pub sources: Vec<PathBuf>,
    pub test_sources: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
    pub test_resources: Vec<PathBuf>,
}

/// Embedder-provided dependency resolution.
///
/// Implementations run on background queues; they must check `token` at
/// reasonable intervals and return [`ProjectError::Cancelled`] when it fires.
pub trait ProjectResolver: Send + Sync {
    fn resolve(
        &self,
        state: &ProjectState,
        settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<ResolvedData, ProjectError>;

    /// Source and resource roots including generated ones. The default adds
    /// every existing `generated-sources/*` and `generated-test-sources/*`
    /// directory below the build directory.
    fn resolve_folders(
        &self,
        state: &ProjectState,
        token: &CancellationToken,
    ) -> Result<ResolvedFolders, ProjectError> {
        check_cancelled(token)?;
        let mut folders = ResolvedFolders {
            sources: state.sources.clone(),
            test_sources: state.test_sources.clone(),
            resources: state.resources.clone(),
            test_resources: state.test_resources.clone(),
        };
        push_generated_roots(
            &mut folders.sources,
            &state.build_directory.join("generated-sources"),
        );
        push_generated_roots(
            &mut folders.test_sources,
            &state.build_directory.join("generated-test-sources"),
        );
        Ok(folders)
    }

    fn resolve_plugins(
        &self,
        state: &ProjectState,
        _settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<Vec<Plugin>, ProjectError> {
        check_cancelled(token)?;
        Ok(state.plugins.clone())
    }

    /// Fetch additional artifacts (sources, docs) for resolved dependencies.
    fn download_artifacts(
        &self,
        _state: &ProjectState,
        _settings: &dyn SettingsProvider,
        _pool: &DownloadPool,
        token: &CancellationToken,
    ) -> Result<Vec<(MavenId, DownloadOutcome)>, ProjectError> {
        check_cancelled(token)?;
        Ok(Vec::new())
    }
}

fn push_generated_roots(out: &mut Vec<PathBuf>, generated: &Path) {
    let Ok(entries) = std::fs::read_dir(generated) else {
        return;
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        if !out.contains(&dir) {
            out.push(dir);
        }
    }
}

/// Resolves dependencies against the files already present in the local
/// repository. Never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRepositoryResolver;

impl LocalRepositoryResolver {
    /// `<repo>/<group as dirs>/<artifact>/<version>/<artifact>-<version>[-<classifier>].<ext>`
    pub fn artifact_path(
        repository: &Path,
        id: &MavenId,
        classifier: Option<&str>,
        extension: &str,
    ) -> Option<PathBuf> {
        let group = id.group_id.as_deref()?;
        let artifact = id.artifact_id.as_deref()?;
        let version = id.version.as_deref()?;
        if version.contains("${") {
            return None;
        }

        let file_name = match classifier {
            Some(classifier) => format!("{artifact}-{version}-{classifier}.{extension}"),
            None => format!("{artifact}-{version}.{extension}"),
        };
        let mut path = repository.to_path_buf();
        path.extend(group.split('.'));
        Some(path.join(artifact).join(version).join(file_name))
    }

    fn extension_for(type_: &str) -> &str {
        match type_ {
            "test-jar" | "maven-plugin" | "ejb" | "bundle" => "jar",
            other => other,
        }
    }

    fn classifier_for(dep: &Dependency) -> Option<&str> {
        match (dep.classifier.as_deref(), dep.type_or_default()) {
            (Some(classifier), _) => Some(classifier),
            (None, "test-jar") => Some("tests"),
            (None, _) => None,
        }
    }
}

impl ProjectResolver for LocalRepositoryResolver {
    fn resolve(
        &self,
        state: &ProjectState,
        settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<ResolvedData, ProjectError> {
        let repository = settings.local_repository();
        let mut data = ResolvedData {
            plugins: state.plugins.clone(),
            ..ResolvedData::default()
        };

        for dep in &state.dependencies {
            check_cancelled(token)?;
            let mut resolved = dep.clone();
            let file = Self::artifact_path(
                repository,
                &dep.id,
                Self::classifier_for(dep),
                Self::extension_for(dep.type_or_default()),
            )
            .filter(|path| path.is_file());
            resolved.state = match file {
                Some(path) => DependencyState::Resolved(path),
                None => {
                    if !dep.optional {
                        data.problems.push(ReadProblem::new(
                            repository,
                            ProblemKind::Resolution,
                            format!("unresolved dependency {}", dep.id),
                        ));
                    }
                    DependencyState::Unresolved
                }
            };
            data.dependencies.push(resolved);
        }

        Ok(data)
    }

    /// Locates `-sources.jar` files next to resolved artifacts.
    fn download_artifacts(
        &self,
        state: &ProjectState,
        settings: &dyn SettingsProvider,
        pool: &DownloadPool,
        token: &CancellationToken,
    ) -> Result<Vec<(MavenId, DownloadOutcome)>, ProjectError> {
        let ids: Vec<MavenId> = state
            .dependencies
            .iter()
            .filter(|dep| dep.is_resolved())
            .map(|dep| dep.id.clone())
            .collect();
        let repository = settings.local_repository().to_path_buf();

        let outcomes = pool.download_all(&ids, token, |id, _token| {
            Self::artifact_path(&repository, id, Some("sources"), "jar")
                .filter(|path| path.is_file())
                .ok_or_else(|| format!("no sources for {id}"))
        })?;
        Ok(outcomes)
    }
}
