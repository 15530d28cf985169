use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::ProjectDescriptor;
use crate::model::ProjectChanges;
use crate::profiles::ExplicitProfiles;

/// Opaque object produced by a resolver (e.g. an embedder's own project
/// model), handed back through [`TreeEvent::ProjectResolved`].
#[derive(Clone)]
pub struct NativeHandle(pub Arc<dyn Any + Send + Sync>);

impl NativeHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeHandle(..)")
    }
}

#[derive(Debug, Clone)]
pub enum TreeEvent {
    ProfilesChanged(ExplicitProfiles),
    IgnoredStateChanged {
        ignored: Vec<ProjectDescriptor>,
        unignored: Vec<ProjectDescriptor>,
        from_import: bool,
    },
    /// Net effect of one `update`/`delete` call.
    ProjectsUpdated {
        updated: Vec<(ProjectDescriptor, ProjectChanges)>,
        deleted: Vec<ProjectDescriptor>,
    },
    ProjectResolved {
        project: ProjectDescriptor,
        changes: ProjectChanges,
        native_handle: Option<NativeHandle>,
    },
    PluginsResolved {
        project: ProjectDescriptor,
    },
    FoldersResolved {
        project: ProjectDescriptor,
        changes: ProjectChanges,
    },
    ArtifactsDownloaded {
        project: ProjectDescriptor,
    },
}

impl TreeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TreeEvent::ProfilesChanged(_) => "profiles-changed",
            TreeEvent::IgnoredStateChanged { .. } => "ignored-state-changed",
            TreeEvent::ProjectsUpdated { .. } => "projects-updated",
            TreeEvent::ProjectResolved { .. } => "project-resolved",
            TreeEvent::PluginsResolved { .. } => "plugins-resolved",
            TreeEvent::FoldersResolved { .. } => "folders-resolved",
            TreeEvent::ArtifactsDownloaded { .. } => "artifacts-downloaded",
        }
    }
}

pub trait TreeListener: Send + Sync {
    fn on_event(&self, event: &TreeEvent);
}

impl<F> TreeListener for F
where
    F: Fn(&TreeEvent) + Send + Sync,
{
    fn on_event(&self, event: &TreeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<dyn TreeListener>)>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn TreeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Deliver `event` to every listener. Called without any tree lock held;
    /// listeners may call back into the tree.
    pub(crate) fn fire(&self, event: TreeEvent) {
        let listeners: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        tracing::trace!(
            target = "strata.project",
            event = event.kind(),
            listeners = listeners.len(),
            "firing tree event"
        );
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}
