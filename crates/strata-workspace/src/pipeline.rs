//! Turns tree events into background work: reading, resolving, folder and
//! plugin resolution, artifact lookup and indexing of resolved artifacts.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use strata_index::IndexManager;
use strata_project::{
    DependencyState, ProjectDescriptor, ProjectError, ProjectResolver, ProjectsTree, TreeEvent,
    TreeListener,
};
use strata_scheduler::{
    check_cancelled, DownloadPool, ProcessorQueues, ProgressIndicator, TaskCategory, TaskError,
};

use crate::events::{EventHub, WorkspaceEvent};

pub(crate) struct Pipeline {
    pub(crate) tree: Weak<ProjectsTree>,
    pub(crate) indices: Weak<IndexManager>,
    pub(crate) queues: Weak<ProcessorQueues>,
    pub(crate) resolver: Arc<dyn ProjectResolver>,
    pub(crate) events: Arc<EventHub>,
    pub(crate) dirty: Arc<AtomicBool>,
    pub(crate) download_sources: bool,
}

impl TreeListener for Pipeline {
    fn on_event(&self, event: &TreeEvent) {
        self.dirty.store(true, Ordering::SeqCst);
        match event {
            TreeEvent::ProjectsUpdated { updated, .. } => {
                let mut projects: Vec<ProjectDescriptor> =
                    updated.iter().map(|(project, _)| project.clone()).collect();
                if let Some(tree) = self.tree.upgrade() {
                    for (project, _) in updated {
                        projects.extend(tree.dependent_projects(project));
                    }
                }
                self.schedule_resolve(projects);
            }
            TreeEvent::IgnoredStateChanged { unignored, .. } => {
                self.schedule_resolve(unignored.clone());
            }
            TreeEvent::ProfilesChanged(_) => self.schedule_read_all(false),
            TreeEvent::ProjectResolved { .. }
            | TreeEvent::PluginsResolved { .. }
            | TreeEvent::FoldersResolved { .. }
            | TreeEvent::ArtifactsDownloaded { .. } => {}
        }
        self.events.publish(WorkspaceEvent::Tree(event.clone()));
    }
}

impl Pipeline {
    fn schedule(
        &self,
        category: TaskCategory,
        title: &str,
        task: impl FnOnce(&ProgressIndicator) -> Result<(), TaskError> + Send + 'static,
    ) {
        if let Some(queues) = self.queues.upgrade() {
            queues.schedule(category, title, task);
        }
    }

    pub(crate) fn schedule_read(&self, changed: Vec<PathBuf>, deleted: Vec<PathBuf>, force: bool) {
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        self.schedule(TaskCategory::Reading, "Reading projects", move |progress| {
            let profiles = tree.explicit_profiles();
            tree.update(&changed, &deleted, force, &profiles, progress.token())?;
            Ok(())
        });
    }

    pub(crate) fn schedule_read_all(&self, force: bool) {
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        self.schedule(TaskCategory::Reading, "Reading projects", move |progress| {
            tree.update_all(force, progress.token())?;
            Ok(())
        });
    }

    /// Resolve `projects` in one task. Projects that are no longer resolve
    /// candidates by the time the task runs are skipped.
    pub(crate) fn schedule_resolve(&self, projects: Vec<ProjectDescriptor>) {
        let projects = dedup_by_path(projects);
        if projects.is_empty() {
            return;
        }
        let (Some(tree), Some(queues)) = (self.tree.upgrade(), self.queues.upgrade()) else {
            return;
        };
        let follow_up = FollowUp {
            tree: Arc::downgrade(&tree),
            indices: self.indices.clone(),
            queues: Arc::downgrade(&queues),
            resolver: Arc::clone(&self.resolver),
            download_sources: self.download_sources,
        };

        queues.schedule(TaskCategory::Resolving, "Resolving projects", move |progress| {
            let candidates: HashSet<PathBuf> = tree
                .candidates_for_resolve()
                .iter()
                .map(|p| p.path().to_path_buf())
                .collect();
            let todo: Vec<ProjectDescriptor> = projects
                .into_iter()
                .filter(|p| candidates.contains(p.path()))
                .collect();

            let mut resolved = Vec::with_capacity(todo.len());
            for (done, project) in todo.iter().enumerate() {
                check_cancelled(progress.token())?;
                progress.set_text(format!("Resolving {}", project.display_name()));
                progress.set_fraction(done as f64 / todo.len() as f64);
                match tree.resolve(project, &*follow_up.resolver, progress.token()) {
                    Ok(_) => resolved.push(project.clone()),
                    Err(err) => fail_or_cancel(err, project)?,
                }
            }
            follow_up.schedule(resolved);
            Ok(())
        });
    }
}

/// Work scheduled once a batch of projects has been resolved.
struct FollowUp {
    tree: Weak<ProjectsTree>,
    indices: Weak<IndexManager>,
    queues: Weak<ProcessorQueues>,
    resolver: Arc<dyn ProjectResolver>,
    download_sources: bool,
}

impl FollowUp {
    fn schedule(self, projects: Vec<ProjectDescriptor>) {
        if projects.is_empty() {
            return;
        }
        let (Some(tree), Some(queues)) = (self.tree.upgrade(), self.queues.upgrade()) else {
            return;
        };

        {
            let tree = Arc::clone(&tree);
            let resolver = Arc::clone(&self.resolver);
            let projects = projects.clone();
            queues.schedule(
                TaskCategory::FoldersResolving,
                "Resolving folders",
                move |progress| {
                    for project in &projects {
                        check_cancelled(progress.token())?;
                        if let Err(err) = tree.resolve_folders(project, &*resolver, progress.token())
                        {
                            fail_or_cancel(err, project)?;
                        }
                    }
                    Ok(())
                },
            );
        }

        {
            let tree = Arc::clone(&tree);
            let resolver = Arc::clone(&self.resolver);
            let projects = projects.clone();
            queues.schedule(
                TaskCategory::PluginsResolving,
                "Resolving plugins",
                move |progress| {
                    for project in &projects {
                        check_cancelled(progress.token())?;
                        if let Err(err) = tree.resolve_plugins(project, &*resolver, progress.token())
                        {
                            fail_or_cancel(err, project)?;
                        }
                    }
                    Ok(())
                },
            );
        }

        if self.download_sources {
            let tree = Arc::clone(&tree);
            let resolver = Arc::clone(&self.resolver);
            let projects = projects.clone();
            queues.schedule(
                TaskCategory::ArtifactsDownloading,
                "Downloading sources",
                move |progress| {
                    for project in &projects {
                        check_cancelled(progress.token())?;
                        match tree.download_artifacts(
                            project,
                            &*resolver,
                            DownloadPool::shared(),
                            progress.token(),
                        ) {
                            Ok(outcomes) => tracing::debug!(
                                target = "strata.workspace",
                                path = %project.path().display(),
                                found = outcomes.iter().filter(|(_, o)| o.is_resolved()).count(),
                                missing = outcomes.iter().filter(|(_, o)| !o.is_resolved()).count(),
                                "artifact lookup finished"
                            ),
                            Err(err) => fail_or_cancel(err, project)?,
                        }
                    }
                    Ok(())
                },
            );
        }

        let indices = self.indices.clone();
        queues.schedule(
            TaskCategory::PostProcessing,
            "Indexing resolved artifacts",
            move |progress| {
                let Some(indices) = indices.upgrade() else {
                    return Ok(());
                };
                for project in &projects {
                    check_cancelled(progress.token())?;
                    for dep in &project.state().dependencies {
                        if let DependencyState::Resolved(file) = &dep.state {
                            indices.add_artifact(file);
                        }
                    }
                }
                Ok(())
            },
        );
    }
}

/// Cancellation aborts the task; any other failure is logged and the batch
/// goes on with the next project.
fn fail_or_cancel(err: ProjectError, project: &ProjectDescriptor) -> Result<(), TaskError> {
    if err.is_cancelled() {
        return Err(TaskError::Cancelled);
    }
    tracing::warn!(
        target = "strata.workspace",
        path = %project.path().display(),
        error = %err,
        "project processing failed"
    );
    Ok(())
}

fn dedup_by_path(projects: Vec<ProjectDescriptor>) -> Vec<ProjectDescriptor> {
    let mut seen = HashSet::new();
    projects
        .into_iter()
        .filter(|p| seen.insert(p.path().to_path_buf()))
        .collect()
}
