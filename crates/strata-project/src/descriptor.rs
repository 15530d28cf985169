use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use strata_core::MavenId;

use crate::model::ProjectState;

/// Handle to one project of the tree, keyed by its declaration file.
///
/// Cloning is cheap. The current [`ProjectState`] is swapped atomically;
/// readers holding an older `Arc<ProjectState>` keep a consistent view.
#[derive(Clone)]
pub struct ProjectDescriptor {
    inner: Arc<DescriptorInner>,
}

struct DescriptorInner {
    path: PathBuf,
    state: RwLock<Arc<ProjectState>>,
}

impl ProjectDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = ProjectState::unread(&path);
        Self::with_state(path, Arc::new(state))
    }

    pub fn with_state(path: impl Into<PathBuf>, state: Arc<ProjectState>) -> Self {
        Self {
            inner: Arc::new(DescriptorInner {
                path: path.into(),
                state: RwLock::new(state),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn directory(&self) -> &Path {
        self.inner.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn state(&self) -> Arc<ProjectState> {
        Arc::clone(&self.inner.state.read())
    }

    /// Install `state`, returning the previous one.
    pub(crate) fn replace_state(&self, state: Arc<ProjectState>) -> Arc<ProjectState> {
        std::mem::replace(&mut *self.inner.state.write(), state)
    }

    /// Install `state` only if `expected` is still current.
    pub(crate) fn compare_and_replace(
        &self,
        expected: &Arc<ProjectState>,
        state: Arc<ProjectState>,
    ) -> bool {
        let mut current = self.inner.state.write();
        if Arc::ptr_eq(&current, expected) {
            *current = state;
            true
        } else {
            false
        }
    }

    pub fn id(&self) -> MavenId {
        self.state().id.clone()
    }

    pub fn parent_id(&self) -> Option<MavenId> {
        self.state().parent_id.clone()
    }

    pub fn is_aggregator(&self) -> bool {
        self.state().is_aggregator()
    }

    pub fn has_read_errors(&self) -> bool {
        self.state().has_read_errors()
    }

    /// `<name>` if declared, otherwise the artifact id, otherwise the
    /// directory name.
    pub fn display_name(&self) -> String {
        let state = self.state();
        if let Some(name) = state.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(artifact) = state.id.artifact_id.as_deref() {
            return artifact.to_string();
        }
        self.directory()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.inner.path.display().to_string())
    }
}

impl PartialEq for ProjectDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.path == other.inner.path
    }
}

impl Eq for ProjectDescriptor {}

impl Hash for ProjectDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.path.hash(state);
    }
}

impl fmt::Debug for ProjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectDescriptor")
            .field("path", &self.inner.path)
            .field("id", &self.state().id.to_string())
            .finish()
    }
}
