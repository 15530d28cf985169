use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use strata_core::{normalize_path_or_url, now_millis, remove_dir_best_effort, SettingsProvider};
use strata_scheduler::{check_cancelled, CancellationToken};

use crate::artifact::ArtifactInfo;
use crate::error::IndexError;
use crate::indexer::{IndexTarget, Indexer};
use crate::metadata::{IndexKind, IndexMetadata};
use crate::storage::{PersistentMap, RecordLog, RecordWriter};

const GROUPS_LOG: &str = "groups.log";
const VERSIONS_LOG: &str = "versions.log";
const CONTEXT_LOG: &str = "context.log";
const GENERATION_PREFIX: &str = "data";

const CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Lifecycle of a [`PackageIndex`].
///
/// `Closed` is terminal. `Broken` only leaves through
/// [`PackageIndex::update_or_repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Opening,
    Open,
    Broken,
    Closed,
}

/// Told when an index hit a storage failure and was reset.
pub trait IndexListener: Send + Sync {
    fn index_is_broken(&self, index: &PackageIndex);
}

impl<F> IndexListener for F
where
    F: Fn(&PackageIndex) + Send + Sync,
{
    fn index_is_broken(&self, index: &PackageIndex) {
        self(index)
    }
}

/// One complete on-disk copy of an index's maps.
struct Generation {
    name: String,
    dir: PathBuf,
    /// group -> artifact ids
    groups: PersistentMap,
    /// `group:artifact` -> versions
    versions: PersistentMap,
    context: RecordLog,
    context_writer: Option<RecordWriter>,
}

impl Generation {
    fn create(index_dir: &Path, name: String) -> Result<Self, IndexError> {
        let dir = index_dir.join(&name);
        std::fs::create_dir_all(&dir).map_err(|err| IndexError::io(&dir, err))?;
        Ok(Self {
            groups: PersistentMap::create(dir.join(GROUPS_LOG))?,
            versions: PersistentMap::create(dir.join(VERSIONS_LOG))?,
            context: RecordLog::new(dir.join(CONTEXT_LOG)),
            context_writer: None,
            name,
            dir,
        })
    }

    fn open(index_dir: &Path, name: String) -> Self {
        let dir = index_dir.join(&name);
        Self {
            groups: PersistentMap::open(dir.join(GROUPS_LOG)),
            versions: PersistentMap::open(dir.join(VERSIONS_LOG)),
            context: RecordLog::new(dir.join(CONTEXT_LOG)),
            context_writer: None,
            name,
            dir,
        }
    }

    fn add(&mut self, info: &ArtifactInfo) -> Result<bool, IndexError> {
        self.groups.insert(&info.group_id, &info.artifact_id)?;
        let added = self.versions.insert(&info.key(), &info.version)?;
        if added {
            if self.context_writer.is_none() {
                self.context_writer = Some(self.context.writer()?);
            }
            if let Some(writer) = self.context_writer.as_mut() {
                writer.push(info)?;
            }
        }
        Ok(added)
    }

    fn flush(&mut self) -> Result<(), IndexError> {
        self.groups.flush()?;
        self.versions.flush()?;
        match self.context_writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn sync(&mut self) -> Result<(), IndexError> {
        self.groups.sync()?;
        self.versions.sync()?;
        match self.context_writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }

    fn read_context(&mut self) -> Result<Vec<ArtifactInfo>, IndexError> {
        self.flush()?;
        self.context.read_all()
    }
}

struct ExistenceCaches {
    groups: LruCache<String, bool>,
    artifacts: LruCache<String, bool>,
    versions: LruCache<String, bool>,
}

impl ExistenceCaches {
    fn new() -> Self {
        Self {
            groups: LruCache::new(CACHE_CAPACITY),
            artifacts: LruCache::new(CACHE_CAPACITY),
            versions: LruCache::new(CACHE_CAPACITY),
        }
    }

    fn clear(&mut self) {
        self.groups.clear();
        self.artifacts.clear();
        self.versions.clear();
    }

    fn remember(&mut self, info: &ArtifactInfo) {
        self.groups.put(info.group_id.clone(), true);
        self.artifacts.put(info.key(), true);
        self.versions.put(version_key(info), true);
    }
}

fn version_key(info: &ArtifactInfo) -> String {
    format!("{}:{}", info.key(), info.version)
}

struct IndexInner {
    state: IndexState,
    meta: IndexMetadata,
    generation: Option<Generation>,
    caches: ExistenceCaches,
    /// Artifacts added while a rebuild runs; replayed into the new
    /// generation before it replaces the active one.
    added_during_rebuild: Option<Vec<ArtifactInfo>>,
}

/// Persistent group/artifact/version maps for one repository.
///
/// Lookups never fail: a storage error resets the index to a fresh empty
/// generation, marks it [`IndexState::Broken`], notifies the listener and
/// answers "not found" until the index is repaired.
pub struct PackageIndex {
    dir: PathBuf,
    indexer: Arc<dyn Indexer>,
    listener: Arc<dyn IndexListener>,
    inner: Mutex<IndexInner>,
    /// Serializes rebuilds; lookups keep using the active generation meanwhile.
    update_lock: Mutex<()>,
}

impl PackageIndex {
    /// Create a new, empty index in `dir`.
    pub fn create(
        dir: &Path,
        kind: IndexKind,
        repository_id: &str,
        path_or_url: &str,
        indexer: Arc<dyn Indexer>,
        listener: Arc<dyn IndexListener>,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir).map_err(|err| IndexError::io(dir, err))?;
        let ids = BTreeSet::from([repository_id.to_string()]);
        let meta = IndexMetadata::new(kind, ids, normalize_path_or_url(path_or_url));
        Self::start_fresh(dir, meta, indexer, listener)
    }

    /// Open the index previously created in `dir`.
    ///
    /// An index written with another format version is recreated empty,
    /// keeping its identity.
    pub fn load(
        dir: &Path,
        indexer: Arc<dyn Indexer>,
        listener: Arc<dyn IndexListener>,
    ) -> Result<Self, IndexError> {
        let meta = IndexMetadata::read(dir)?.ok_or_else(|| IndexError::Metadata {
            path: dir.to_path_buf(),
            message: "missing index.properties".to_string(),
        })?;

        if !meta.is_current_version() {
            tracing::info!(
                target = "strata.index",
                index = %meta.path_or_url,
                version = %meta.version,
                "index format changed; recreating"
            );
            remove_generations(dir, None);
            let meta = IndexMetadata::new(meta.kind, meta.repository_ids, meta.path_or_url);
            return Self::start_fresh(dir, meta, indexer, listener);
        }

        let active = meta
            .data_dir_name
            .clone()
            .filter(|name| dir.join(name).is_dir());
        let Some(active) = active else {
            let meta = IndexMetadata {
                last_update: None,
                ..meta
            };
            return Self::start_fresh(dir, meta, indexer, listener);
        };

        // Leftovers of interrupted rebuilds.
        remove_generations(dir, Some(&active));
        let generation = Generation::open(dir, active);
        Ok(Self::from_parts(dir, meta, generation, indexer, listener))
    }

    fn start_fresh(
        dir: &Path,
        mut meta: IndexMetadata,
        indexer: Arc<dyn Indexer>,
        listener: Arc<dyn IndexListener>,
    ) -> Result<Self, IndexError> {
        let generation = Generation::create(dir, next_generation_name(dir))?;
        meta.data_dir_name = Some(generation.name.clone());
        meta.write(dir)?;
        Ok(Self::from_parts(dir, meta, generation, indexer, listener))
    }

    fn from_parts(
        dir: &Path,
        meta: IndexMetadata,
        generation: Generation,
        indexer: Arc<dyn Indexer>,
        listener: Arc<dyn IndexListener>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            indexer,
            listener,
            inner: Mutex::new(IndexInner {
                state: IndexState::Open,
                meta,
                generation: Some(generation),
                caches: ExistenceCaches::new(),
                added_during_rebuild: None,
            }),
            update_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn kind(&self) -> IndexKind {
        self.inner.lock().meta.kind
    }

    /// Normalized repository location; the identity of the index.
    pub fn path_or_url(&self) -> String {
        self.inner.lock().meta.path_or_url.clone()
    }

    pub fn repository_ids(&self) -> BTreeSet<String> {
        self.inner.lock().meta.repository_ids.clone()
    }

    /// Record another repository id for the same location. Returns whether
    /// the id was new.
    pub fn add_repository_id(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.meta.repository_ids.insert(id.to_string()) {
            return false;
        }
        if let Err(err) = inner.meta.write(&self.dir) {
            tracing::warn!(
                target = "strata.index",
                dir = %self.dir.display(),
                error = %err,
                "failed to persist index metadata"
            );
        }
        true
    }

    pub fn state(&self) -> IndexState {
        self.inner.lock().state
    }

    pub fn is_broken(&self) -> bool {
        self.state() == IndexState::Broken
    }

    /// Epoch millis of the last successful update.
    pub fn last_update(&self) -> Option<u64> {
        self.inner.lock().meta.last_update
    }

    pub fn failure_message(&self) -> Option<String> {
        self.inner.lock().meta.failure_message.clone()
    }

    /// Name of the active generation directory.
    pub fn data_dir_name(&self) -> Option<String> {
        self.inner.lock().meta.data_dir_name.clone()
    }

    pub fn supports_search(&self) -> bool {
        self.indexer.supports_search()
    }

    /// Record an artifact file that appeared in a local repository.
    ///
    /// Returns whether the version was new to the index.
    pub fn add_artifact(&self, file: &Path) -> bool {
        let (kind, root) = {
            let inner = self.inner.lock();
            (inner.meta.kind, inner.meta.path_or_url.clone())
        };
        if kind != IndexKind::Local {
            return false;
        }
        let Ok(relative) = file.strip_prefix(Path::new(&root)) else {
            return false;
        };
        let Some(info) = ArtifactInfo::from_repository_path(relative) else {
            return false;
        };

        let mut inner = self.inner.lock();
        if inner.state != IndexState::Open {
            return false;
        }
        let IndexInner {
            generation,
            caches,
            added_during_rebuild,
            ..
        } = &mut *inner;
        let Some(generation) = generation.as_mut() else {
            return false;
        };

        let result = generation
            .add(&info)
            .and_then(|added| generation.flush().map(|()| added));
        match result {
            Ok(added) => {
                caches.remember(&info);
                if let Some(backlog) = added_during_rebuild.as_mut() {
                    backlog.push(info);
                }
                added
            }
            Err(err) => {
                self.break_down(inner, &err);
                false
            }
        }
    }

    pub fn has_group_id(&self, group_id: &str) -> bool {
        self.query(false, |generation, caches| {
            if let Some(hit) = caches.groups.get(group_id) {
                return Ok(*hit);
            }
            let found = generation.groups.contains_key(group_id)?;
            caches.groups.put(group_id.to_string(), found);
            Ok(found)
        })
    }

    pub fn has_artifact_id(&self, group_id: &str, artifact_id: &str) -> bool {
        let key = format!("{group_id}:{artifact_id}");
        self.query(false, |generation, caches| {
            if let Some(hit) = caches.artifacts.get(&key) {
                return Ok(*hit);
            }
            let found = generation.versions.contains_key(&key)?;
            caches.artifacts.put(key, found);
            Ok(found)
        })
    }

    pub fn has_version(&self, group_id: &str, artifact_id: &str, version: &str) -> bool {
        let key = format!("{group_id}:{artifact_id}");
        let cache_key = format!("{key}:{version}");
        self.query(false, |generation, caches| {
            if let Some(hit) = caches.versions.get(&cache_key) {
                return Ok(*hit);
            }
            let found = generation.versions.contains(&key, version)?;
            caches.versions.put(cache_key, found);
            Ok(found)
        })
    }

    pub fn group_ids(&self) -> BTreeSet<String> {
        self.query(BTreeSet::new(), |generation, _| generation.groups.keys())
    }

    pub fn artifact_ids(&self, group_id: &str) -> BTreeSet<String> {
        self.query(BTreeSet::new(), |generation, _| generation.groups.get(group_id))
    }

    pub fn versions(&self, group_id: &str, artifact_id: &str) -> BTreeSet<String> {
        let key = format!("{group_id}:{artifact_id}");
        self.query(BTreeSet::new(), |generation, _| generation.versions.get(&key))
    }

    /// Free-text search over the index context. Indices built by an indexer
    /// without search support answer nothing.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<ArtifactInfo> {
        if max_results == 0 || !self.indexer.supports_search() {
            return Vec::new();
        }
        let artifacts = self.query(Vec::new(), |generation, _| generation.read_context());
        self.indexer.search(&artifacts, query, max_results)
    }

    /// Run `op` against the active generation. Answers `default` unless the
    /// index is open; a failing `op` triggers broken recovery.
    fn query<R>(
        &self,
        default: R,
        op: impl FnOnce(&mut Generation, &mut ExistenceCaches) -> Result<R, IndexError>,
    ) -> R {
        let mut inner = self.inner.lock();
        if inner.state != IndexState::Open {
            return default;
        }
        let IndexInner {
            generation, caches, ..
        } = &mut *inner;
        let Some(generation) = generation.as_mut() else {
            return default;
        };

        match op(generation, caches) {
            Ok(value) => value,
            Err(err) => {
                self.break_down(inner, &err);
                default
            }
        }
    }

    /// Recover from `err`, then tell the listener outside the lock.
    fn break_down(&self, mut inner: MutexGuard<'_, IndexInner>, err: &IndexError) {
        self.recover(&mut inner, err);
        drop(inner);
        self.listener.index_is_broken(self);
    }

    /// Close the failed generation, delete its directory (and nothing else),
    /// reopen a fresh empty generation and mark the index broken.
    fn recover(&self, inner: &mut IndexInner, err: &IndexError) {
        tracing::warn!(
            target = "strata.index",
            index = %inner.meta.path_or_url,
            error = %err,
            "index storage failed; resetting to an empty generation"
        );
        inner.caches.clear();
        let fresh = next_generation_name(&self.dir);
        if let Some(mut stale) = inner.generation.take() {
            if let Err(err) = stale.sync() {
                tracing::debug!(target = "strata.index", error = %err, "failed to close stale generation");
            }
            remove_dir_best_effort(&stale.dir, "broken index generation");
        }

        inner.meta.last_update = None;
        match Generation::create(&self.dir, fresh) {
            Ok(generation) => {
                inner.meta.data_dir_name = Some(generation.name.clone());
                inner.generation = Some(generation);
            }
            Err(err) => {
                tracing::warn!(
                    target = "strata.index",
                    index = %inner.meta.path_or_url,
                    error = %err,
                    "failed to reopen broken index"
                );
                inner.meta.data_dir_name = None;
            }
        }
        if let Err(err) = inner.meta.write(&self.dir) {
            tracing::warn!(
                target = "strata.index",
                dir = %self.dir.display(),
                error = %err,
                "failed to persist index metadata"
            );
        }
        inner.state = IndexState::Broken;
    }

    /// Rebuild the index into a new generation and switch to it.
    ///
    /// Once an update has succeeded, a non-full rebuild copies the active
    /// generation's artifacts forward without asking the indexer. A full
    /// rebuild, or one with nothing to copy, scans the repository; remote
    /// indices keep their known artifacts across full rebuilds too. Artifacts
    /// added while the rebuild runs are carried into the new generation.
    ///
    /// The active generation keeps answering lookups until the new one is
    /// complete; a failed or cancelled rebuild leaves it in place. Failures
    /// are recorded in [`failure_message`](Self::failure_message),
    /// cancellation is not.
    pub fn update_or_repair(
        &self,
        full: bool,
        settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        let _update = self.update_lock.lock();
        check_cancelled(token)?;

        let (meta, previous) = {
            let mut inner = self.inner.lock();
            if inner.state == IndexState::Closed {
                return Err(IndexError::Closed {
                    path_or_url: inner.meta.path_or_url.clone(),
                });
            }
            if inner.state == IndexState::Broken {
                inner.state = IndexState::Opening;
            }
            let carry = inner.meta.last_update.is_some()
                && (!full || inner.meta.kind == IndexKind::Remote);
            let path_or_url = inner.meta.path_or_url.clone();
            let previous = match inner.generation.as_mut() {
                Some(generation) if carry => match generation.read_context() {
                    Ok(known) => Some(known),
                    Err(err) => {
                        tracing::warn!(
                            target = "strata.index",
                            index = %path_or_url,
                            error = %err,
                            "cannot read known artifacts; rescanning"
                        );
                        None
                    }
                },
                _ => None,
            };
            inner.added_during_rebuild = Some(Vec::new());
            (inner.meta.clone(), previous)
        };
        let scan = full || previous.is_none();

        let name = next_generation_name(&self.dir);
        tracing::debug!(
            target = "strata.index",
            index = %meta.path_or_url,
            generation = %name,
            full,
            scan,
            "rebuilding index"
        );
        let built =
            self.build_generation(name.clone(), previous.as_deref(), scan, &meta, settings, token);
        let result = built.and_then(|generation| self.install(generation));
        self.inner.lock().added_during_rebuild = None;

        if let Err(err) = &result {
            remove_dir_best_effort(&self.dir.join(&name), "abandoned index generation");
            self.record_failure(err);
        }
        result
    }

    fn build_generation(
        &self,
        name: String,
        previous: Option<&[ArtifactInfo]>,
        scan: bool,
        meta: &IndexMetadata,
        settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<Generation, IndexError> {
        let mut generation = Generation::create(&self.dir, name)?;
        for info in previous.unwrap_or_default() {
            check_cancelled(token)?;
            generation.add(info)?;
        }

        if scan {
            let target = IndexTarget {
                kind: meta.kind,
                path_or_url: &meta.path_or_url,
                repository_ids: &meta.repository_ids,
                settings,
            };
            self.indexer.scan(&target, token, &mut |info| {
                generation.add(&info).map(|_| ())
            })?;
        }
        check_cancelled(token)?;
        generation.sync()?;
        Ok(generation)
    }

    /// Point the metadata at `generation`, then drop the previous one.
    fn install(&self, mut generation: Generation) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        if inner.state == IndexState::Closed {
            return Err(IndexError::Closed {
                path_or_url: inner.meta.path_or_url.clone(),
            });
        }
        if let Some(backlog) = inner.added_during_rebuild.take() {
            for info in &backlog {
                generation.add(info)?;
            }
            generation.sync()?;
        }

        let mut meta = inner.meta.clone();
        meta.data_dir_name = Some(generation.name.clone());
        meta.last_update = Some(now_millis());
        meta.failure_message = None;
        meta.write(&self.dir)?;

        let previous = inner.generation.replace(generation);
        inner.meta = meta;
        inner.state = IndexState::Open;
        inner.caches.clear();
        let path_or_url = inner.meta.path_or_url.clone();
        drop(inner);

        if let Some(mut previous) = previous {
            if let Err(err) = previous.sync() {
                tracing::debug!(target = "strata.index", error = %err, "failed to close previous generation");
            }
            remove_dir_best_effort(&previous.dir, "superseded index generation");
        }
        tracing::info!(target = "strata.index", index = %path_or_url, "index updated");
        Ok(())
    }

    fn record_failure(&self, err: &IndexError) {
        let mut inner = self.inner.lock();
        if inner.state == IndexState::Opening {
            inner.state = IndexState::Broken;
        }
        if err.is_cancelled() || inner.state == IndexState::Closed {
            tracing::debug!(target = "strata.index", index = %inner.meta.path_or_url, "index update cancelled");
            return;
        }

        tracing::warn!(
            target = "strata.index",
            index = %inner.meta.path_or_url,
            error = %err,
            "index update failed"
        );
        inner.meta.failure_message = Some(err.to_string());
        if let Err(err) = inner.meta.write(&self.dir) {
            tracing::warn!(
                target = "strata.index",
                dir = %self.dir.display(),
                error = %err,
                "failed to persist index metadata"
            );
        }
    }

    /// Flush and close. The index answers nothing afterwards.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.state = IndexState::Closed;
        inner.caches.clear();
        if let Some(mut generation) = inner.generation.take() {
            if let Err(err) = generation.sync() {
                tracing::warn!(
                    target = "strata.index",
                    index = %inner.meta.path_or_url,
                    error = %err,
                    "failed to flush index on close"
                );
            }
        }
    }
}

impl fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PackageIndex")
            .field("dir", &self.dir)
            .field("path_or_url", &inner.meta.path_or_url)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

fn generation_number(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// `data<N>` with `N` above every generation directory present in `dir`.
fn next_generation_name(dir: &Path) -> String {
    let next = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter_map(|entry| generation_number(entry.file_name().to_str()?))
        .max()
        .map_or(0, |max| max + 1);
    format!("{GENERATION_PREFIX}{next}")
}

/// Delete every generation directory in `dir` except `keep`.
fn remove_generations(dir: &Path, keep: Option<&str>) {
    for entry in std::fs::read_dir(dir).into_iter().flatten().filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if generation_number(name).is_some() && Some(name) != keep && entry.path().is_dir() {
            remove_dir_best_effort(&entry.path(), "stale index generation");
        }
    }
}
