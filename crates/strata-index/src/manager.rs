use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use strata_core::{normalize_path_or_url, remove_dir_best_effort, SettingsProvider};
use strata_scheduler::{ProcessorQueues, TaskCategory, TaskError};

use crate::archetype::{
    dedup_keep_last, read_archetypes, write_archetypes, Archetype, USER_ARCHETYPES_XML,
};
use crate::error::IndexError;
use crate::index::{IndexListener, PackageIndex};
use crate::indexer::Indexer;
use crate::metadata::IndexKind;

const INDEX_DIR_PREFIX: &str = "Index";

/// Where an index stands with respect to background updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatingState {
    Idle,
    Waiting,
    Updating,
}

/// Notifications delivered to [`IndexManager::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    IndexIsBroken { path_or_url: String },
    UpdateFinished { path_or_url: String, error: Option<String> },
}

#[derive(Default)]
struct UpdateStates {
    waiting: BTreeSet<String>,
    updating: Option<String>,
}

struct ManagerShared {
    indices_dir: PathBuf,
    indexer: Arc<dyn Indexer>,
    settings: RwLock<Arc<dyn SettingsProvider>>,
    indices: Mutex<BTreeMap<String, Arc<PackageIndex>>>,
    updates: Mutex<UpdateStates>,
    listeners: Mutex<Vec<Arc<dyn IndexListener>>>,
    subscribers: Mutex<Vec<Sender<IndexEvent>>>,
    archetypes: Mutex<()>,
}

impl ManagerShared {
    fn publish(&self, event: IndexEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn notify_broken(&self, index: &PackageIndex) {
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener.index_is_broken(index);
        }
        self.publish(IndexEvent::IndexIsBroken {
            path_or_url: index.path_or_url(),
        });
    }
}

/// Hands broken notifications of one index to the manager that owns it.
struct BrokenForwarder(Weak<ManagerShared>);

impl IndexListener for BrokenForwarder {
    fn index_is_broken(&self, index: &PackageIndex) {
        if let Some(shared) = self.0.upgrade() {
            shared.notify_broken(index);
        }
    }
}

/// Walks a batch through the update bookkeeping and, however the batch
/// ends, releases the entries it still holds.
///
/// Keys before `next` have left the waiting set already; once taken, a key
/// may be queued again by a later batch, which then owns its entry.
struct BatchGuard<'a> {
    shared: &'a ManagerShared,
    keys: Vec<String>,
    next: usize,
    updating: bool,
}

impl<'a> BatchGuard<'a> {
    fn new(shared: &'a ManagerShared, keys: Vec<String>) -> Self {
        Self {
            shared,
            keys,
            next: 0,
            updating: false,
        }
    }

    /// Take the next key off the waiting set and mark it updating, unless
    /// `skip`. Returns whether the key is now updating.
    fn begin_next(&mut self, skip: bool) -> bool {
        let Some(key) = self.keys.get(self.next) else {
            return false;
        };
        self.next += 1;
        let mut states = self.shared.updates.lock();
        states.waiting.remove(key);
        if skip {
            return false;
        }
        states.updating = Some(key.clone());
        self.updating = true;
        true
    }

    fn end_current(&mut self) {
        if std::mem::take(&mut self.updating) {
            self.shared.updates.lock().updating = None;
        }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut states = self.shared.updates.lock();
        for key in &self.keys[self.next.min(self.keys.len())..] {
            states.waiting.remove(key);
        }
        if self.updating {
            states.updating = None;
        }
    }
}

/// Owns the package indices of a workspace, one per repository location,
/// stored as `Index<N>` directories below a common directory.
pub struct IndexManager {
    shared: Arc<ManagerShared>,
    queues: Arc<ProcessorQueues>,
}

impl IndexManager {
    /// Load every index found in `indices_dir`. Directories that cannot be
    /// loaded are deleted.
    pub fn new(
        indices_dir: impl Into<PathBuf>,
        indexer: Arc<dyn Indexer>,
        settings: Arc<dyn SettingsProvider>,
        queues: Arc<ProcessorQueues>,
    ) -> Result<Self, IndexError> {
        let indices_dir = indices_dir.into();
        std::fs::create_dir_all(&indices_dir).map_err(|err| IndexError::io(&indices_dir, err))?;

        let shared = Arc::new(ManagerShared {
            indices_dir,
            indexer,
            settings: RwLock::new(settings),
            indices: Mutex::new(BTreeMap::new()),
            updates: Mutex::new(UpdateStates::default()),
            listeners: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            archetypes: Mutex::new(()),
        });
        let manager = Self { shared, queues };
        manager.load_existing();
        Ok(manager)
    }

    fn load_existing(&self) {
        let mut dirs: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.shared.indices_dir)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let number = index_dir_number(entry.file_name().to_str()?)?;
                Some((number, entry.path()))
            })
            .collect();
        dirs.sort();

        let mut indices = self.shared.indices.lock();
        for (_, dir) in dirs {
            match PackageIndex::load(&dir, Arc::clone(&self.shared.indexer), self.forwarder()) {
                Ok(index) => {
                    let key = index.path_or_url();
                    if indices.contains_key(&key) {
                        tracing::warn!(
                            target = "strata.index",
                            dir = %dir.display(),
                            index = %key,
                            "duplicate index directory; deleting"
                        );
                        index.close();
                        remove_dir_best_effort(&dir, "duplicate index");
                        continue;
                    }
                    indices.insert(key, Arc::new(index));
                }
                Err(err) => {
                    tracing::warn!(
                        target = "strata.index",
                        dir = %dir.display(),
                        error = %err,
                        "failed to load index; deleting"
                    );
                    remove_dir_best_effort(&dir, "unloadable index");
                }
            }
        }
    }

    fn forwarder(&self) -> Arc<dyn IndexListener> {
        Arc::new(BrokenForwarder(Arc::downgrade(&self.shared)))
    }

    pub fn indices_dir(&self) -> &Path {
        &self.shared.indices_dir
    }

    pub fn settings(&self) -> Arc<dyn SettingsProvider> {
        self.shared.settings.read().clone()
    }

    pub fn set_settings(&self, settings: Arc<dyn SettingsProvider>) {
        *self.shared.settings.write() = settings;
    }

    pub fn add_listener(&self, listener: Arc<dyn IndexListener>) {
        self.shared.listeners.lock().push(listener);
    }

    pub fn subscribe(&self) -> Receiver<IndexEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// The index for `path_or_url`, created on first request. Asking again
    /// with another repository id records that id on the existing index.
    pub fn ensure_index(
        &self,
        kind: IndexKind,
        repository_id: &str,
        path_or_url: &str,
    ) -> Result<Arc<PackageIndex>, IndexError> {
        let key = normalize_path_or_url(path_or_url);
        let mut indices = self.shared.indices.lock();
        if let Some(index) = indices.get(&key) {
            index.add_repository_id(repository_id);
            return Ok(Arc::clone(index));
        }

        let dir = next_index_dir(&self.shared.indices_dir);
        let index = Arc::new(PackageIndex::create(
            &dir,
            kind,
            repository_id,
            &key,
            Arc::clone(&self.shared.indexer),
            self.forwarder(),
        )?);
        tracing::debug!(
            target = "strata.index",
            index = %key,
            dir = %dir.display(),
            "created index"
        );
        indices.insert(key, Arc::clone(&index));
        Ok(index)
    }

    pub fn find_index(&self, path_or_url: &str) -> Option<Arc<PackageIndex>> {
        self.shared
            .indices
            .lock()
            .get(&normalize_path_or_url(path_or_url))
            .cloned()
    }

    pub fn indices(&self) -> Vec<Arc<PackageIndex>> {
        self.shared.indices.lock().values().cloned().collect()
    }

    /// Close `path_or_url`'s index and delete its directory.
    pub fn remove_index(&self, path_or_url: &str) -> bool {
        let removed = self
            .shared
            .indices
            .lock()
            .remove(&normalize_path_or_url(path_or_url));
        match removed {
            Some(index) => {
                index.close();
                remove_dir_best_effort(index.dir(), "removed index");
                true
            }
            None => false,
        }
    }

    /// Record `file` in every local index whose repository contains it.
    pub fn add_artifact(&self, file: &Path) -> bool {
        let mut added = false;
        for index in self.indices() {
            if index.kind() == IndexKind::Local && file.starts_with(index.path_or_url()) {
                added |= index.add_artifact(file);
            }
        }
        added
    }

    pub fn updating_state(&self, index: &PackageIndex) -> UpdatingState {
        let key = index.path_or_url();
        let states = self.shared.updates.lock();
        if states.updating.as_deref() == Some(key.as_str()) {
            UpdatingState::Updating
        } else if states.waiting.contains(&key) {
            UpdatingState::Waiting
        } else {
            UpdatingState::Idle
        }
    }

    /// Queue an update of `indices` on the post-processing queue. Indices
    /// already waiting for an update are not queued twice.
    pub fn schedule_update(&self, indices: &[Arc<PackageIndex>], full: bool) {
        let mut batch = Vec::new();
        {
            let mut states = self.shared.updates.lock();
            for index in indices {
                let key = index.path_or_url();
                if states.waiting.insert(key.clone()) {
                    batch.push((key, Arc::clone(index)));
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.queues.schedule(
            TaskCategory::PostProcessing,
            "Updating package indices",
            move |progress| {
                let mut guard =
                    BatchGuard::new(&shared, batch.iter().map(|(key, _)| key.clone()).collect());
                let total = batch.len();
                let mut cancelled = false;

                for (done, (key, index)) in batch.iter().enumerate() {
                    if !guard.begin_next(cancelled) {
                        continue;
                    }
                    progress.set_text(format!("Updating {key}"));
                    progress.set_fraction(done as f64 / total as f64);

                    let settings = shared.settings.read().clone();
                    let result = index.update_or_repair(full, &*settings, progress.token());
                    guard.end_current();

                    match result {
                        Err(err) if err.is_cancelled() => cancelled = true,
                        result => shared.publish(IndexEvent::UpdateFinished {
                            path_or_url: key.clone(),
                            error: result.err().map(|err| err.to_string()),
                        }),
                    }
                }

                if cancelled {
                    Err(TaskError::Cancelled)
                } else {
                    Ok(())
                }
            },
        );
    }

    /// Block until every scheduled index update has finished.
    pub fn wait_for_background_tasks(&self) {
        self.queues
            .queue(TaskCategory::PostProcessing)
            .wait_for_completion();
    }

    pub fn user_archetypes(&self) -> Vec<Archetype> {
        let _lock = self.shared.archetypes.lock();
        dedup_keep_last(read_archetypes(&self.archetypes_file()))
    }

    pub fn add_archetype(&self, archetype: Archetype) {
        let _lock = self.shared.archetypes.lock();
        let path = self.archetypes_file();
        let mut archetypes = read_archetypes(&path);
        archetypes.push(archetype);
        write_archetypes(&path, &dedup_keep_last(archetypes));
    }

    fn archetypes_file(&self) -> PathBuf {
        self.shared.indices_dir.join(USER_ARCHETYPES_XML)
    }

    /// Close every index. Scheduled updates still running fail with
    /// [`IndexError::Closed`].
    pub fn close(&self) {
        for index in self.indices() {
            index.close();
        }
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("indices_dir", &self.shared.indices_dir)
            .field("indices", &self.shared.indices.lock().len())
            .finish_non_exhaustive()
    }
}

fn index_dir_number(name: &str) -> Option<u64> {
    name.strip_prefix(INDEX_DIR_PREFIX)?.parse().ok()
}

fn next_index_dir(indices_dir: &Path) -> PathBuf {
    let next = std::fs::read_dir(indices_dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter_map(|entry| index_dir_number(entry.file_name().to_str()?))
        .max()
        .map_or(0, |max| max + 1);
    indices_dir.join(format!("{INDEX_DIR_PREFIX}{next}"))
}
