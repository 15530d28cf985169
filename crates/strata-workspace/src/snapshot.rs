use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use strata_core::SettingsProvider;
use strata_project::ProjectsTree;

use crate::events::{EventHub, WorkspaceEvent};

/// The tree saved at `path`, or an empty tree when there is none or it
/// cannot be used.
pub(crate) fn load_tree(path: &Path, settings: Arc<dyn SettingsProvider>) -> ProjectsTree {
    match ProjectsTree::load(path, Arc::clone(&settings)) {
        Ok(Some(tree)) => {
            tracing::debug!(
                target = "strata.workspace",
                path = %path.display(),
                "restored project tree"
            );
            tree
        }
        Ok(None) => ProjectsTree::new(settings),
        Err(err) => {
            tracing::warn!(
                target = "strata.workspace",
                path = %path.display(),
                error = %err,
                "discarding unreadable project tree snapshot"
            );
            ProjectsTree::new(settings)
        }
    }
}

/// Failures are logged and reported as `false`.
pub(crate) fn save_tree(tree: &ProjectsTree, path: &Path, events: &EventHub) -> bool {
    match tree.save(path) {
        Ok(()) => {
            events.publish(WorkspaceEvent::SnapshotSaved {
                path: path.to_path_buf(),
            });
            true
        }
        Err(err) => {
            tracing::warn!(
                target = "strata.workspace",
                path = %path.display(),
                error = %err,
                "failed to save project tree"
            );
            false
        }
    }
}

/// Background thread saving the tree every `interval` while it has unsaved
/// changes.
pub(crate) struct Autosave {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Autosave {
    pub(crate) fn start(
        interval: Duration,
        tree: Arc<ProjectsTree>,
        path: PathBuf,
        dirty: Arc<AtomicBool>,
        events: Arc<EventHub>,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("strata-autosave".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            if dirty.swap(false, Ordering::SeqCst)
                                && !save_tree(&tree, &path, &events)
                            {
                                dirty.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target = "strata.workspace", "autosave thread panicked");
            }
        }
    }
}
