use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use strata_config::StrataConfig;
use strata_core::SettingsProvider;
use strata_index::{
    ArtifactInfo, IndexError, IndexEvent, IndexKind, IndexListener, IndexManager, Indexer,
    LocalRepositoryIndexer, PackageIndex,
};
use strata_project::{
    ExplicitProfiles, LocalRepositoryResolver, ProjectDescriptor, ProjectResolver, ProjectsTree,
};
use strata_scheduler::ProcessorQueues;

use crate::events::{EventHub, WorkspaceEvent};
use crate::pipeline::Pipeline;
use crate::snapshot::{load_tree, save_tree, Autosave};

pub const LOCAL_REPOSITORY_ID: &str = "local";

/// Everything one workspace owns: its project tree, its package indices, the
/// background queues working on both, and the event fan-out.
///
/// Nothing here is global; two contexts never share state.
pub struct WorkspaceContext {
    root: PathBuf,
    config: StrataConfig,
    snapshot_path: PathBuf,
    tree: Arc<ProjectsTree>,
    indices: Arc<IndexManager>,
    queues: Arc<ProcessorQueues>,
    pipeline: Arc<Pipeline>,
    events: Arc<EventHub>,
    dirty: Arc<AtomicBool>,
    autosave: Mutex<Option<Autosave>>,
    closed: AtomicBool,
}

impl WorkspaceContext {
    /// Open the workspace rooted at `root` with its discovered configuration.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let (config, config_path) = strata_config::load_for_workspace(root)
            .with_context(|| format!("failed to load configuration for {}", root.display()))?;
        if let Some(path) = &config_path {
            tracing::debug!(
                target = "strata.workspace",
                path = %path.display(),
                "loaded workspace configuration"
            );
        }
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl AsRef<Path>, config: StrataConfig) -> Result<Self> {
        Self::with_parts(
            root,
            config,
            Arc::new(LocalRepositoryResolver),
            Arc::new(LocalRepositoryIndexer),
        )
    }

    pub fn with_parts(
        root: impl AsRef<Path>,
        config: StrataConfig,
        resolver: Arc<dyn ProjectResolver>,
        indexer: Arc<dyn Indexer>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let settings: Arc<dyn SettingsProvider> = Arc::new(
            config
                .settings()
                .context("failed to determine build tool settings")?,
        );

        let snapshot_path = config.workspace.snapshot_path_for(&root);
        let tree = Arc::new(load_tree(&snapshot_path, Arc::clone(&settings)));
        tree.set_ignored_patterns(config.workspace.ignored_patterns.clone())
            .context("invalid `workspace.ignored_patterns`")?;
        if !config.maven.profiles.is_empty() {
            let mut profiles = tree.explicit_profiles();
            profiles.merge(&ExplicitProfiles::enabled(config.maven.profiles.clone()));
            tree.set_explicit_profiles(profiles);
        }

        let queues = Arc::new(ProcessorQueues::new());
        let indices_dir = config.index.directory_for(&root);
        let indices = Arc::new(
            IndexManager::new(
                &indices_dir,
                indexer,
                Arc::clone(&settings),
                Arc::clone(&queues),
            )
            .with_context(|| format!("failed to open indices in {}", indices_dir.display()))?,
        );
        indices.add_listener(Arc::new(RepairBrokenIndex(Arc::downgrade(&indices))));

        let events = Arc::new(EventHub::default());
        forward_index_events(indices.subscribe(), Arc::clone(&events))
            .context("failed to start the index event thread")?;

        let dirty = Arc::new(AtomicBool::new(false));
        let pipeline = Arc::new(Pipeline {
            tree: Arc::downgrade(&tree),
            indices: Arc::downgrade(&indices),
            queues: Arc::downgrade(&queues),
            resolver,
            events: Arc::clone(&events),
            dirty: Arc::clone(&dirty),
            download_sources: config.workspace.download_sources,
        });
        tree.add_listener(pipeline.clone());

        let autosave = match config.workspace.snapshot_interval_ms {
            0 => None,
            ms => Some(
                Autosave::start(
                    Duration::from_millis(ms),
                    Arc::clone(&tree),
                    snapshot_path.clone(),
                    Arc::clone(&dirty),
                    Arc::clone(&events),
                )
                .context("failed to start the snapshot thread")?,
            ),
        };

        let context = Self {
            root,
            config,
            snapshot_path,
            tree,
            indices,
            queues,
            pipeline,
            events,
            dirty,
            autosave: Mutex::new(autosave),
            closed: AtomicBool::new(false),
        };

        let known = context
            .ensure_indices()
            .context("failed to set up package indices")?;
        if context.config.index.update_on_startup {
            context.indices.schedule_update(&known, false);
        }
        Ok(context)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn tree(&self) -> &Arc<ProjectsTree> {
        &self.tree
    }

    pub fn index_manager(&self) -> &Arc<IndexManager> {
        &self.indices
    }

    pub fn queues(&self) -> &Arc<ProcessorQueues> {
        &self.queues
    }

    pub fn subscribe(&self) -> Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    // --- projects ----------------------------------------------------------

    /// Start tracking `paths` and read them in the background.
    pub fn add_managed_files(&self, paths: &[PathBuf], profiles: &ExplicitProfiles) {
        self.tree.add_managed_files_with_profiles(paths, profiles);
        self.pipeline.schedule_read(paths.to_vec(), Vec::new(), false);
    }

    /// Stop tracking `paths`; their trees are dropped by the next read.
    pub fn remove_managed_files(&self, paths: &[PathBuf]) {
        self.tree.remove_managed_files(paths);
        self.pipeline.schedule_read_all(false);
    }

    /// Files changed or deleted on disk.
    pub fn files_changed(&self, changed: &[PathBuf], deleted: &[PathBuf]) {
        self.pipeline
            .schedule_read(changed.to_vec(), deleted.to_vec(), false);
    }

    pub fn reload_all(&self, force: bool) {
        self.pipeline.schedule_read_all(force);
    }

    /// Re-resolve `projects` regardless of pending reads.
    pub fn schedule_resolve(&self, projects: Vec<ProjectDescriptor>) {
        self.pipeline.schedule_resolve(projects);
    }

    pub fn set_explicit_profiles(&self, profiles: ExplicitProfiles) {
        self.tree.set_explicit_profiles(profiles);
    }

    /// Apply new build tool settings: every project is re-read, and the
    /// local repository gets an index if it moved.
    pub fn settings_changed(&self, settings: Arc<dyn SettingsProvider>) {
        self.tree.set_settings(Arc::clone(&settings));
        self.indices.set_settings(Arc::clone(&settings));

        let repository = settings.local_repository().to_string_lossy().into_owned();
        let known = self.indices.find_index(&repository).is_some();
        match self
            .indices
            .ensure_index(IndexKind::Local, LOCAL_REPOSITORY_ID, &repository)
        {
            Ok(index) if !known => self.indices.schedule_update(&[index], false),
            Ok(_) => {}
            Err(err) => tracing::warn!(
                target = "strata.workspace",
                repository = %repository,
                error = %err,
                "failed to set up the local repository index"
            ),
        }

        self.pipeline.schedule_read_all(true);
    }

    // --- indices -----------------------------------------------------------

    /// The local repository index followed by the configured remote ones.
    pub fn ensure_indices(&self) -> Result<Vec<Arc<PackageIndex>>, IndexError> {
        let settings = self.indices.settings();
        let mut out = vec![self.indices.ensure_index(
            IndexKind::Local,
            LOCAL_REPOSITORY_ID,
            &settings.local_repository().to_string_lossy(),
        )?];
        for remote in &self.config.index.remote {
            out.push(
                self.indices
                    .ensure_index(IndexKind::Remote, &remote.id, &remote.url)?,
            );
        }
        Ok(out)
    }

    pub fn local_index(&self) -> Option<Arc<PackageIndex>> {
        let settings = self.indices.settings();
        self.indices
            .find_index(&settings.local_repository().to_string_lossy())
    }

    pub fn schedule_index_update(&self, full: bool) {
        self.indices.schedule_update(&self.indices.indices(), full);
    }

    /// Matches from every index, sorted and without duplicates.
    pub fn search_artifacts(&self, query: &str, max_results: usize) -> Vec<ArtifactInfo> {
        let mut hits: Vec<ArtifactInfo> = self
            .indices
            .indices()
            .iter()
            .flat_map(|index| index.search(query, max_results))
            .collect();
        hits.sort();
        hits.dedup();
        hits.truncate(max_results);
        hits
    }

    // --- lifecycle ---------------------------------------------------------

    /// Save the tree now. Failures are logged.
    pub fn save_snapshot(&self) -> bool {
        self.dirty.store(false, Ordering::SeqCst);
        let saved = save_tree(&self.tree, &self.snapshot_path, &self.events);
        if !saved {
            self.dirty.store(true, Ordering::SeqCst);
        }
        saved
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Block until all background work, including work scheduled by other
    /// background work, has finished.
    pub fn wait_for_all(&self) {
        self.queues.wait_for_all();
    }

    /// Cancel pending work, save the tree and close the indices. Later calls
    /// do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(autosave) = self.autosave.lock().take() {
            autosave.stop();
        }
        self.queues.cancel_all();
        self.queues.shutdown();
        self.save_snapshot();
        self.indices.close();
        tracing::debug!(
            target = "strata.workspace",
            root = %self.root.display(),
            "workspace closed"
        );
    }
}

impl Drop for WorkspaceContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WorkspaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceContext")
            .field("root", &self.root)
            .field("tree", &self.tree)
            .field("indices", &self.indices)
            .finish_non_exhaustive()
    }
}

/// Schedules a rebuild of every index that reports itself broken.
struct RepairBrokenIndex(Weak<IndexManager>);

impl IndexListener for RepairBrokenIndex {
    fn index_is_broken(&self, index: &PackageIndex) {
        let Some(manager) = self.0.upgrade() else {
            return;
        };
        if let Some(index) = manager.find_index(&index.path_or_url()) {
            tracing::info!(
                target = "strata.workspace",
                index = %index.path_or_url(),
                "index is broken; scheduling a rebuild"
            );
            manager.schedule_update(&[index], false);
        }
    }
}

/// Relay index events to workspace subscribers until the manager is gone.
fn forward_index_events(rx: Receiver<IndexEvent>, events: Arc<EventHub>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("strata-index-events".to_string())
        .spawn(move || {
            for event in rx {
                events.publish(WorkspaceEvent::Index(event));
            }
        })?;
    Ok(())
}
