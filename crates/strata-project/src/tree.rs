//! The tree of project descriptors and its incremental update walk.
//!
//! Two lock domains:
//! - `structure` (`RwLock`) guards the module graph, the lookup maps and the
//!   content timestamps;
//! - `state` (`Mutex`) guards managed files, explicit profiles and ignore
//!   rules.
//!
//! They are never held at the same time, and neither is held across file
//! I/O or listener callbacks.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strata_core::{normalize_path, MavenId, SettingsProvider};
use strata_scheduler::{
    check_cancelled, CancellationToken, Cancelled, DownloadOutcome, DownloadPool,
};

use crate::descriptor::ProjectDescriptor;
use crate::error::ProjectError;
use crate::events::{ListenerId, Listeners, TreeEvent, TreeListener};
use crate::ignore::IgnoreMatcher;
use crate::model::{ProblemKind, ProjectChanges, ProjectState};
use crate::pom::PomReader;
use crate::profiles::ExplicitProfiles;
use crate::resolver::ProjectResolver;
use crate::timestamp::ContentTimestamp;

#[derive(Default)]
pub(crate) struct Structure {
    pub(crate) roots: Vec<ProjectDescriptor>,
    pub(crate) aggregator_to_modules: HashMap<PathBuf, Vec<ProjectDescriptor>>,
    pub(crate) module_to_aggregator: HashMap<PathBuf, ProjectDescriptor>,
    pub(crate) by_path: HashMap<PathBuf, ProjectDescriptor>,
    pub(crate) by_id: HashMap<MavenId, ProjectDescriptor>,
    pub(crate) by_key: HashMap<String, Vec<ProjectDescriptor>>,
    pub(crate) timestamps: HashMap<PathBuf, ContentTimestamp>,
}

impl Structure {
    pub(crate) fn fill_id_maps(&mut self, project: &ProjectDescriptor, state: &ProjectState) {
        if state.id.artifact_id.is_none() {
            return;
        }
        self.by_id.insert(state.id.clone(), project.clone());
        let entry = self.by_key.entry(state.id.key()).or_default();
        if !entry.contains(project) {
            entry.push(project.clone());
        }
    }

    fn clear_id_maps(&mut self, project: &ProjectDescriptor, state: &ProjectState) {
        if self.by_id.get(&state.id) == Some(project) {
            self.by_id.remove(&state.id);
        }
        let key = state.id.key();
        if let Some(entry) = self.by_key.get_mut(&key) {
            entry.retain(|p| p != project);
            if entry.is_empty() {
                self.by_key.remove(&key);
            }
        }
    }

    fn is_placed(&self, project: &ProjectDescriptor) -> bool {
        self.module_to_aggregator.contains_key(project.path()) || self.roots.contains(project)
    }

    /// Whether `candidate` is `project` or one of its transitive modules'
    /// aggregators, i.e. attaching `project` below it would close a cycle.
    fn is_ancestor_or_self(&self, candidate: &ProjectDescriptor, project: &ProjectDescriptor) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(candidate.clone());
        while let Some(node) = current {
            if &node == project {
                return true;
            }
            if !seen.insert(node.path().to_path_buf()) {
                return false;
            }
            current = self.module_to_aggregator.get(node.path()).cloned();
        }
        false
    }

    /// Move `project` below `aggregator` (or to the roots). Returns whether
    /// its position changed.
    fn reconnect(
        &mut self,
        aggregator: Option<&ProjectDescriptor>,
        project: &ProjectDescriptor,
    ) -> bool {
        let current = self.module_to_aggregator.get(project.path()).cloned();
        let placed = self.is_placed(project);
        if placed && current.as_ref() == aggregator {
            return false;
        }

        let mut target = aggregator;
        if let Some(candidate) = aggregator {
            if self.is_ancestor_or_self(candidate, project) {
                tracing::warn!(
                    target = "strata.project",
                    project = %project.path().display(),
                    aggregator = %candidate.path().display(),
                    "refusing to attach module below its own descendant"
                );
                if placed {
                    return false;
                }
                target = None;
            }
        }

        match current {
            Some(old) => {
                if let Some(modules) = self.aggregator_to_modules.get_mut(old.path()) {
                    modules.retain(|m| m != project);
                }
                self.module_to_aggregator.remove(project.path());
            }
            None => self.roots.retain(|r| r != project),
        }

        match target {
            Some(aggregator) => {
                self.aggregator_to_modules
                    .entry(aggregator.path().to_path_buf())
                    .or_default()
                    .push(project.clone());
                self.module_to_aggregator
                    .insert(project.path().to_path_buf(), aggregator.clone());
            }
            None => self.roots.push(project.clone()),
        }
        true
    }

    fn remove(&mut self, project: &ProjectDescriptor, state: &ProjectState) {
        let path = project.path();
        match self.module_to_aggregator.remove(path) {
            Some(aggregator) => {
                if let Some(modules) = self.aggregator_to_modules.get_mut(aggregator.path()) {
                    modules.retain(|m| m != project);
                }
            }
            None => self.roots.retain(|r| r != project),
        }
        self.aggregator_to_modules.remove(path);
        self.by_path.remove(path);
        self.timestamps.remove(path);
        self.clear_id_maps(project, state);
    }
}

pub(crate) struct TreeState {
    pub(crate) managed_files: Vec<PathBuf>,
    pub(crate) explicit_profiles: ExplicitProfiles,
    pub(crate) ignored_files: BTreeSet<PathBuf>,
    pub(crate) ignored_patterns: Vec<String>,
    pub(crate) matcher: IgnoreMatcher,
}

impl Default for TreeState {
    fn default() -> Self {
        Self {
            managed_files: Vec::new(),
            explicit_profiles: ExplicitProfiles::default(),
            ignored_files: BTreeSet::new(),
            ignored_patterns: Vec::new(),
            matcher: IgnoreMatcher::empty(),
        }
    }
}

impl TreeState {
    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored_files.contains(path) || self.matcher.is_match(path)
    }
}

/// Net effect of one update/delete call, in first-touch order.
#[derive(Default)]
struct UpdateContext {
    updated: Vec<Option<(ProjectDescriptor, ProjectChanges)>>,
    positions: HashMap<PathBuf, usize>,
    deleted: Vec<ProjectDescriptor>,
}

impl UpdateContext {
    fn update(&mut self, project: &ProjectDescriptor, changes: ProjectChanges) {
        self.deleted.retain(|p| p != project);
        match self.positions.get(project.path()) {
            Some(&pos) => {
                if let Some((_, existing)) = &mut self.updated[pos] {
                    *existing = existing.merged(changes);
                }
            }
            None => {
                self.positions
                    .insert(project.path().to_path_buf(), self.updated.len());
                self.updated.push(Some((project.clone(), changes)));
            }
        }
    }

    fn delete(&mut self, project: &ProjectDescriptor) {
        if let Some(pos) = self.positions.remove(project.path()) {
            self.updated[pos] = None;
        }
        if !self.deleted.contains(project) {
            self.deleted.push(project.clone());
        }
    }

    fn into_event(self) -> Option<TreeEvent> {
        let updated: Vec<_> = self.updated.into_iter().flatten().collect();
        if updated.is_empty() && self.deleted.is_empty() {
            return None;
        }
        Some(TreeEvent::ProjectsUpdated {
            updated,
            deleted: self.deleted,
        })
    }
}

/// Inputs shared by every frame of one walk.
struct WalkEnv<'a> {
    profiles: &'a ExplicitProfiles,
    settings: &'a dyn SettingsProvider,
    managed: HashSet<PathBuf>,
    token: &'a CancellationToken,
}

enum Phase {
    Start,
    Modules(VecDeque<PathBuf>),
    Inheritors(VecDeque<ProjectDescriptor>),
}

struct Frame {
    project: ProjectDescriptor,
    aggregator: Option<ProjectDescriptor>,
    is_new: bool,
    recursive: bool,
    force: bool,
    is_changed: bool,
    prev_inheritors: Vec<ProjectDescriptor>,
    phase: Phase,
}

impl Frame {
    fn new(
        project: ProjectDescriptor,
        aggregator: Option<ProjectDescriptor>,
        is_new: bool,
        recursive: bool,
        force: bool,
    ) -> Self {
        Self {
            project,
            aggregator,
            is_new,
            recursive,
            force,
            is_changed: false,
            prev_inheritors: Vec::new(),
            phase: Phase::Start,
        }
    }
}

/// All project descriptors of a workspace.
pub struct ProjectsTree {
    pub(crate) structure: RwLock<Structure>,
    pub(crate) state: Mutex<TreeState>,
    listeners: Listeners,
    settings: RwLock<Arc<dyn SettingsProvider>>,
}

impl ProjectsTree {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            structure: RwLock::new(Structure::default()),
            state: Mutex::new(TreeState::default()),
            listeners: Listeners::default(),
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> Arc<dyn SettingsProvider> {
        Arc::clone(&self.settings.read())
    }

    pub fn set_settings(&self, settings: Arc<dyn SettingsProvider>) {
        *self.settings.write() = settings;
    }

    pub fn add_listener(&self, listener: Arc<dyn TreeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // --- managed files -----------------------------------------------------

    pub fn managed_files(&self) -> Vec<PathBuf> {
        self.state.lock().managed_files.clone()
    }

    pub fn existing_managed_files(&self) -> Vec<PathBuf> {
        self.managed_files()
            .into_iter()
            .filter(|path| path.is_file())
            .collect()
    }

    pub fn is_managed_file(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.state.lock().managed_files.contains(&path)
    }

    pub fn set_managed_files(&self, paths: &[PathBuf]) {
        let mut state = self.state.lock();
        state.managed_files.clear();
        for path in paths {
            let path = normalize_path(path);
            if !state.managed_files.contains(&path) {
                state.managed_files.push(path);
            }
        }
    }

    pub fn add_managed_files_with_profiles(&self, paths: &[PathBuf], profiles: &ExplicitProfiles) {
        let mut state = self.state.lock();
        for path in paths {
            let path = normalize_path(path);
            if !state.managed_files.contains(&path) {
                state.managed_files.push(path);
            }
        }
        state.explicit_profiles.merge(profiles);
    }

    pub fn remove_managed_files(&self, paths: &[PathBuf]) {
        let remove: HashSet<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        self.state
            .lock()
            .managed_files
            .retain(|path| !remove.contains(path));
    }

    // --- profiles ------------------------------------------------------------

    pub fn explicit_profiles(&self) -> ExplicitProfiles {
        self.state.lock().explicit_profiles.clone()
    }

    pub fn set_explicit_profiles(&self, profiles: ExplicitProfiles) {
        {
            let mut state = self.state.lock();
            if state.explicit_profiles == profiles {
                return;
            }
            state.explicit_profiles = profiles.clone();
        }
        self.listeners.fire(TreeEvent::ProfilesChanged(profiles));
    }

    /// Union of the profile ids declared by all projects.
    pub fn available_profiles(&self) -> BTreeSet<String> {
        self.projects()
            .iter()
            .flat_map(|p| p.state().declared_profiles.clone())
            .collect()
    }

    // --- ignore rules --------------------------------------------------------

    pub fn ignored_files(&self) -> Vec<PathBuf> {
        self.state.lock().ignored_files.iter().cloned().collect()
    }

    pub fn set_ignored_files(&self, paths: &[PathBuf]) {
        let paths: BTreeSet<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        self.change_ignore_status(false, |state| state.ignored_files = paths);
    }

    pub fn ignored_patterns(&self) -> Vec<String> {
        self.state.lock().ignored_patterns.clone()
    }

    pub fn set_ignored_patterns(&self, patterns: Vec<String>) -> Result<(), ProjectError> {
        let matcher = IgnoreMatcher::compile(&patterns)?;
        self.change_ignore_status(false, |state| {
            state.ignored_patterns = patterns;
            state.matcher = matcher;
        });
        Ok(())
    }

    pub fn is_ignored(&self, project: &ProjectDescriptor) -> bool {
        self.state.lock().is_ignored(project.path())
    }

    pub fn set_ignored(&self, projects: &[ProjectDescriptor], ignored: bool, from_import: bool) {
        self.change_ignore_status(from_import, |state| {
            for project in projects {
                if ignored {
                    state.ignored_files.insert(project.path().to_path_buf());
                } else {
                    state.ignored_files.remove(project.path());
                }
            }
        });
    }

    fn change_ignore_status(&self, from_import: bool, mutate: impl FnOnce(&mut TreeState)) {
        let projects = self.projects();
        let (ignored, unignored) = {
            let mut state = self.state.lock();
            let before: Vec<bool> = projects.iter().map(|p| state.is_ignored(p.path())).collect();
            mutate(&mut *state);
            let mut ignored = Vec::new();
            let mut unignored = Vec::new();
            for (project, was) in projects.iter().zip(before) {
                match (was, state.is_ignored(project.path())) {
                    (false, true) => ignored.push(project.clone()),
                    (true, false) => unignored.push(project.clone()),
                    _ => {}
                }
            }
            (ignored, unignored)
        };
        if ignored.is_empty() && unignored.is_empty() {
            return;
        }
        self.listeners.fire(TreeEvent::IgnoredStateChanged {
            ignored,
            unignored,
            from_import,
        });
    }

    // --- queries -------------------------------------------------------------

    pub fn find_project(&self, path: &Path) -> Option<ProjectDescriptor> {
        let path = normalize_path(path);
        self.structure.read().by_path.get(&path).cloned()
    }

    pub fn find_project_by_id(&self, id: &MavenId) -> Option<ProjectDescriptor> {
        self.structure.read().by_id.get(id).cloned()
    }

    /// Projects with the given `group:artifact`, any version.
    pub fn find_projects_by_key(&self, group_id: &str, artifact_id: &str) -> Vec<ProjectDescriptor> {
        self.structure
            .read()
            .by_key
            .get(&format!("{group_id}:{artifact_id}"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_aggregator(&self, project: &ProjectDescriptor) -> Option<ProjectDescriptor> {
        self.structure
            .read()
            .module_to_aggregator
            .get(project.path())
            .cloned()
    }

    pub fn modules(&self, project: &ProjectDescriptor) -> Vec<ProjectDescriptor> {
        self.structure
            .read()
            .aggregator_to_modules
            .get(project.path())
            .cloned()
            .unwrap_or_default()
    }

    /// Walks aggregators up to the root.
    pub fn find_root_project(&self, project: &ProjectDescriptor) -> ProjectDescriptor {
        let structure = self.structure.read();
        let mut seen = HashSet::new();
        let mut current = project.clone();
        while let Some(aggregator) = structure.module_to_aggregator.get(current.path()) {
            if !seen.insert(current.path().to_path_buf()) {
                break;
            }
            current = aggregator.clone();
        }
        current
    }

    /// Projects whose parent is `project`.
    pub fn find_inheritors(&self, project: &ProjectDescriptor) -> Vec<ProjectDescriptor> {
        let id = project.id();
        if id.artifact_id.is_none() {
            return Vec::new();
        }
        self.projects()
            .into_iter()
            .filter(|p| p != project && p.state().parent_id.as_ref() == Some(&id))
            .collect()
    }

    /// Projects that declare a dependency on `project` or inherit from it.
    pub fn dependent_projects(&self, project: &ProjectDescriptor) -> Vec<ProjectDescriptor> {
        let id = project.id();
        if id.artifact_id.is_none() {
            return Vec::new();
        }
        self.projects()
            .into_iter()
            .filter(|p| p != project)
            .filter(|p| {
                let state = p.state();
                state.parent_id.as_ref() == Some(&id) || !state.find_dependencies(&id).is_empty()
            })
            .collect()
    }

    pub fn root_projects(&self) -> Vec<ProjectDescriptor> {
        self.structure.read().roots.clone()
    }

    /// Every project, aggregators before their modules.
    pub fn projects(&self) -> Vec<ProjectDescriptor> {
        let structure = self.structure.read();
        let mut out = Vec::with_capacity(structure.by_path.len());
        let mut stack: Vec<ProjectDescriptor> = structure.roots.iter().rev().cloned().collect();
        let mut seen = HashSet::new();
        while let Some(project) = stack.pop() {
            if !seen.insert(project.path().to_path_buf()) {
                continue;
            }
            if let Some(modules) = structure.aggregator_to_modules.get(project.path()) {
                stack.extend(modules.iter().rev().cloned());
            }
            out.push(project);
        }
        out
    }

    pub fn non_ignored_projects(&self) -> Vec<ProjectDescriptor> {
        let projects = self.projects();
        let state = self.state.lock();
        projects
            .into_iter()
            .filter(|p| !state.is_ignored(p.path()))
            .collect()
    }

    pub fn project_paths(&self) -> Vec<PathBuf> {
        self.projects()
            .iter()
            .map(|p| p.path().to_path_buf())
            .collect()
    }

    /// Non-ignored projects that, along with their aggregator and parent
    /// chains, were read without errors.
    pub fn candidates_for_resolve(&self) -> Vec<ProjectDescriptor> {
        self.non_ignored_projects()
            .into_iter()
            .filter(|p| !self.chain_has_read_errors(p))
            .collect()
    }

    fn chain_has_read_errors(&self, project: &ProjectDescriptor) -> bool {
        let structure = self.structure.read();
        let mut seen = HashSet::new();
        let mut pending = vec![project.clone()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.path().to_path_buf()) {
                continue;
            }
            let state = current.state();
            if state.has_read_errors() {
                return true;
            }
            if let Some(aggregator) = structure.module_to_aggregator.get(current.path()) {
                pending.push(aggregator.clone());
            }
            if let Some(parent) = find_parent(&structure, &current, &state) {
                pending.push(parent);
            }
        }
        false
    }

    // --- update ----------------------------------------------------------------

    /// Re-read `changed`, drop `deleted`, and fire one
    /// [`TreeEvent::ProjectsUpdated`] with the net effect.
    ///
    /// On cancellation the projects already processed stay installed and
    /// their event is still fired.
    pub fn update(
        &self,
        changed: &[PathBuf],
        deleted: &[PathBuf],
        force: bool,
        profiles: &ExplicitProfiles,
        token: &CancellationToken,
    ) -> Result<(), Cancelled> {
        self.update_with(changed, deleted, force, force, profiles, token)
    }

    pub fn delete(&self, paths: &[PathBuf], token: &CancellationToken) -> Result<(), Cancelled> {
        let profiles = self.explicit_profiles();
        self.update_with(&[], paths, false, false, &profiles, token)
    }

    /// Walk every existing managed file recursively and drop roots that are
    /// no longer managed.
    pub fn update_all(&self, force: bool, token: &CancellationToken) -> Result<(), Cancelled> {
        let managed = self.existing_managed_files();
        let obsolete: Vec<PathBuf> = self
            .root_projects()
            .into_iter()
            .map(|p| p.path().to_path_buf())
            .filter(|path| !managed.contains(path))
            .collect();
        let profiles = self.explicit_profiles();
        self.update_with(&managed, &obsolete, true, force, &profiles, token)
    }

    fn update_with(
        &self,
        changed: &[PathBuf],
        deleted: &[PathBuf],
        recursive: bool,
        force: bool,
        profiles: &ExplicitProfiles,
        token: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let settings = self.settings();
        let env = WalkEnv {
            profiles,
            settings: &*settings,
            managed: self.managed_files().into_iter().collect(),
            token,
        };

        let mut ctx = UpdateContext::default();
        let result = self.apply_update(changed, deleted, recursive, force, &env, &mut ctx);
        if result.is_err() {
            tracing::debug!(target = "strata.project", "project tree update cancelled");
        }
        if let Some(event) = ctx.into_event() {
            self.listeners.fire(event);
        }
        result
    }

    fn apply_update(
        &self,
        changed: &[PathBuf],
        deleted: &[PathBuf],
        recursive: bool,
        force: bool,
        env: &WalkEnv<'_>,
        ctx: &mut UpdateContext,
    ) -> Result<(), Cancelled> {
        let mut inheritors_to_update = Vec::new();
        for path in deleted {
            check_cancelled(env.token)?;
            let Some(project) = self.find_project(path) else {
                continue;
            };
            inheritors_to_update.extend(self.find_inheritors(&project));
            self.delete_subtree(&project, env, ctx);
        }
        for inheritor in inheritors_to_update {
            if self.find_project(inheritor.path()).as_ref() != Some(&inheritor) {
                continue;
            }
            let aggregator = self.find_aggregator(&inheritor);
            self.walk(Frame::new(inheritor, aggregator, false, false, false), env, ctx)?;
        }

        for path in changed {
            let path = normalize_path(path);
            let frame = match self.find_project(&path) {
                Some(project) => {
                    let aggregator = self.find_aggregator(&project);
                    Frame::new(project, aggregator, false, recursive, force)
                }
                None => {
                    let aggregator = self.find_intended_aggregator(&path);
                    Frame::new(ProjectDescriptor::new(path), aggregator, true, recursive, force)
                }
            };
            self.walk(frame, env, ctx)?;
        }
        Ok(())
    }

    /// The project that declares `path` among its modules, if any.
    fn find_intended_aggregator(&self, path: &Path) -> Option<ProjectDescriptor> {
        self.projects()
            .into_iter()
            .find(|p| p.state().module_files.iter().any(|m| m == path))
    }

    fn compute_timestamp(&self, project: &ProjectDescriptor, env: &WalkEnv<'_>) -> ContentTimestamp {
        let parent_stamp = project
            .parent_id()
            .and_then(|id| self.find_project_by_id(&id))
            .filter(|parent| parent != project)
            .map(|parent| parent.state().last_read_stamp)
            .unwrap_or(0);
        ContentTimestamp::compute(project.path(), parent_stamp, env.settings, env.profiles)
    }

    fn walk(&self, root: Frame, env: &WalkEnv<'_>, ctx: &mut UpdateContext) -> Result<(), Cancelled> {
        let mut in_progress: HashSet<PathBuf> = HashSet::new();
        in_progress.insert(root.project.path().to_path_buf());
        let mut stack = vec![root];

        while let Some(frame) = stack.last_mut() {
            match &mut frame.phase {
                Phase::Start => {
                    check_cancelled(env.token)?;
                    let modules = self.start_frame(frame, env, ctx);
                    frame.phase = Phase::Modules(modules);
                }
                Phase::Modules(queue) => {
                    let Some(path) = queue.pop_front() else {
                        let inheritors = if frame.is_changed {
                            let mut all = std::mem::take(&mut frame.prev_inheritors);
                            for inheritor in self.find_inheritors(&frame.project) {
                                if !all.contains(&inheritor) {
                                    all.push(inheritor);
                                }
                            }
                            all.into_iter().collect()
                        } else {
                            VecDeque::new()
                        };
                        frame.phase = Phase::Inheritors(inheritors);
                        continue;
                    };
                    if let Some(child) = self.module_frame(frame, path, &in_progress, ctx) {
                        in_progress.insert(child.project.path().to_path_buf());
                        stack.push(child);
                    }
                }
                Phase::Inheritors(queue) => {
                    let Some(inheritor) = queue.pop_front() else {
                        in_progress.remove(frame.project.path());
                        stack.pop();
                        continue;
                    };
                    if in_progress.contains(inheritor.path()) {
                        continue;
                    }
                    // Deleted or replaced while this frame was running.
                    if self.find_project(inheritor.path()).as_ref() != Some(&inheritor) {
                        continue;
                    }
                    let aggregator = self.find_aggregator(&inheritor);
                    in_progress.insert(inheritor.path().to_path_buf());
                    stack.push(Frame::new(inheritor, aggregator, false, false, false));
                }
            }
        }
        Ok(())
    }

    /// Re-read (when needed), install and reconnect the frame's project.
    /// Returns the module files to visit next.
    fn start_frame(
        &self,
        frame: &mut Frame,
        env: &WalkEnv<'_>,
        ctx: &mut UpdateContext,
    ) -> VecDeque<PathBuf> {
        let project = frame.project.clone();
        let prev_modules = if frame.is_new {
            Vec::new()
        } else {
            self.modules(&project)
        };
        if !frame.is_new {
            frame.prev_inheritors = self.find_inheritors(&project);
        }

        let timestamp = self.compute_timestamp(&project, env);
        let stored = self.structure.read().timestamps.get(project.path()).copied();
        let is_changed = frame.force || stored != Some(timestamp);
        let mut changes = if frame.force {
            ProjectChanges::ALL
        } else {
            ProjectChanges::NONE
        };

        if is_changed {
            let old_state = project.state();
            if !frame.is_new {
                self.structure.write().clear_id_maps(&project, &old_state);
            }

            tracing::debug!(
                target = "strata.project",
                path = %project.path().display(),
                "reading project"
            );
            let new_state = Arc::new(PomReader::read(project.path(), env.profiles, env.settings));
            let parent_changed = old_state.parent_id != new_state.parent_id;
            changes = changes.merged(if frame.is_new {
                ProjectChanges::ALL
            } else {
                ProjectChanges::between(&old_state, &new_state)
            });
            project.replace_state(Arc::clone(&new_state));

            let timestamp = if parent_changed {
                self.compute_timestamp(&project, env)
            } else {
                timestamp
            };

            let mut structure = self.structure.write();
            structure
                .by_path
                .insert(project.path().to_path_buf(), project.clone());
            structure.fill_id_maps(&project, &new_state);
            structure
                .timestamps
                .insert(project.path().to_path_buf(), timestamp);
        }

        let reconnected = self
            .structure
            .write()
            .reconnect(frame.aggregator.as_ref(), &project);
        if reconnected {
            changes = changes.merged(ProjectChanges::STRUCTURE);
        }
        if is_changed || reconnected {
            ctx.update(&project, changes);
        }
        frame.is_changed = is_changed;

        let existing = project.state().existing_module_files();
        for module in prev_modules {
            if existing.iter().any(|path| path == module.path()) {
                continue;
            }
            if env.managed.contains(module.path()) {
                if self.structure.write().reconnect(None, &module) {
                    ctx.update(&module, ProjectChanges::STRUCTURE);
                }
            } else {
                self.delete_subtree(&module, env, ctx);
            }
        }

        existing.into_iter().collect()
    }

    /// Decide what to do with one module of `frame`'s project; returns a frame
    /// when the module must be walked.
    fn module_frame(
        &self,
        frame: &Frame,
        path: PathBuf,
        in_progress: &HashSet<PathBuf>,
        ctx: &mut UpdateContext,
    ) -> Option<Frame> {
        if in_progress.contains(&path) {
            tracing::warn!(
                target = "strata.project",
                module = %path.display(),
                aggregator = %frame.project.path().display(),
                "recursive module reference, skipping"
            );
            return None;
        }

        let (module, is_new) = match self.find_project(&path) {
            Some(module) => {
                if let Some(owner) = self.find_aggregator(&module) {
                    let owner_declares = owner.state().module_files.contains(&path);
                    if owner != frame.project && owner_declares {
                        tracing::info!(
                            target = "strata.project",
                            module = %path.display(),
                            owner = %owner.path().display(),
                            aggregator = %frame.project.path().display(),
                            "module is already included by another aggregator"
                        );
                        return None;
                    }
                }
                (module, false)
            }
            None => (ProjectDescriptor::new(path), true),
        };

        if frame.is_changed || is_new || frame.recursive {
            let force = frame.recursive && frame.force;
            return Some(Frame::new(
                module,
                Some(frame.project.clone()),
                is_new,
                frame.recursive,
                force,
            ));
        }

        if self
            .structure
            .write()
            .reconnect(Some(&frame.project), &module)
        {
            ctx.update(&module, ProjectChanges::STRUCTURE);
        }
        None
    }

    /// Remove `project` and its modules. Managed modules survive as roots.
    fn delete_subtree(&self, project: &ProjectDescriptor, env: &WalkEnv<'_>, ctx: &mut UpdateContext) {
        let mut order = Vec::new();
        let mut survivors = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![project.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.path().to_path_buf()) {
                continue;
            }
            for module in self.modules(&current) {
                if env.managed.contains(module.path()) {
                    survivors.push(module);
                } else {
                    stack.push(module);
                }
            }
            order.push(current);
        }

        for survivor in survivors {
            if self.structure.write().reconnect(None, &survivor) {
                ctx.update(&survivor, ProjectChanges::STRUCTURE);
            }
        }

        for doomed in order.into_iter().rev() {
            let state = doomed.state();
            self.structure.write().remove(&doomed, &state);
            tracing::debug!(
                target = "strata.project",
                path = %doomed.path().display(),
                "project removed from tree"
            );
            ctx.delete(&doomed);
        }
    }

    // --- resolve -----------------------------------------------------------------

    /// Resolve dependencies of `project` and install the result, unless the
    /// project was re-read meanwhile (then nothing changes).
    pub fn resolve(
        &self,
        project: &ProjectDescriptor,
        resolver: &dyn ProjectResolver,
        token: &CancellationToken,
    ) -> Result<ProjectChanges, ProjectError> {
        let old = project.state();
        let settings = self.settings();
        let data = resolver.resolve(&old, &*settings, token)?;
        check_cancelled(token)?;

        let Some(changes) = self.install(project, &old, |next| {
            next.dependencies = data.dependencies.clone();
            next.plugins = data.plugins.clone();
            next.problems.retain(|p| p.kind != ProblemKind::Resolution);
            next.problems.extend(data.problems.iter().cloned());
            next.resolved = true;
        }) else {
            return Ok(ProjectChanges::NONE);
        };
        self.listeners.fire(TreeEvent::ProjectResolved {
            project: project.clone(),
            changes,
            native_handle: data.native_handle,
        });
        Ok(changes)
    }

    pub fn resolve_folders(
        &self,
        project: &ProjectDescriptor,
        resolver: &dyn ProjectResolver,
        token: &CancellationToken,
    ) -> Result<ProjectChanges, ProjectError> {
        let old = project.state();
        let folders = resolver.resolve_folders(&old, token)?;
        check_cancelled(token)?;

        let Some(changes) = self.install(project, &old, |next| {
            next.sources = folders.sources.clone();
            next.test_sources = folders.test_sources.clone();
            next.resources = folders.resources.clone();
            next.test_resources = folders.test_resources.clone();
        }) else {
            return Ok(ProjectChanges::NONE);
        };
        self.listeners.fire(TreeEvent::FoldersResolved {
            project: project.clone(),
            changes,
        });
        Ok(changes)
    }

    pub fn resolve_plugins(
        &self,
        project: &ProjectDescriptor,
        resolver: &dyn ProjectResolver,
        token: &CancellationToken,
    ) -> Result<ProjectChanges, ProjectError> {
        let old = project.state();
        let settings = self.settings();
        let plugins = resolver.resolve_plugins(&old, &*settings, token)?;
        check_cancelled(token)?;

        let Some(changes) = self.install(project, &old, |next| {
            next.plugins = plugins.clone();
        }) else {
            return Ok(ProjectChanges::NONE);
        };
        self.listeners.fire(TreeEvent::PluginsResolved {
            project: project.clone(),
        });
        Ok(changes)
    }

    pub fn download_artifacts(
        &self,
        project: &ProjectDescriptor,
        resolver: &dyn ProjectResolver,
        pool: &DownloadPool,
        token: &CancellationToken,
    ) -> Result<Vec<(MavenId, DownloadOutcome)>, ProjectError> {
        let state = project.state();
        let settings = self.settings();
        let outcomes = resolver.download_artifacts(&state, &*settings, pool, token)?;
        self.listeners.fire(TreeEvent::ArtifactsDownloaded {
            project: project.clone(),
        });
        Ok(outcomes)
    }

    /// Apply `update` on top of the project's current state, as long as that
    /// state comes from the same read as `base`. Other resolution steps may
    /// have installed their results meanwhile; those are kept.
    fn install(
        &self,
        project: &ProjectDescriptor,
        base: &Arc<ProjectState>,
        update: impl Fn(&mut ProjectState),
    ) -> Option<ProjectChanges> {
        loop {
            let current = project.state();
            if current.last_read_stamp != base.last_read_stamp {
                tracing::debug!(
                    target = "strata.project",
                    path = %project.path().display(),
                    "project was re-read during resolution; discarding result"
                );
                return None;
            }
            let mut next = (*current).clone();
            update(&mut next);
            let changes = ProjectChanges::between(&current, &next);
            if project.compare_and_replace(&current, Arc::new(next)) {
                return Some(changes);
            }
        }
    }
}

/// The parent by coordinates, falling back to `<relativePath>` when the
/// parent's coordinates are unknown (e.g. it failed to parse).
fn find_parent(
    structure: &Structure,
    project: &ProjectDescriptor,
    state: &ProjectState,
) -> Option<ProjectDescriptor> {
    let id = state.parent_id.as_ref()?;
    if let Some(parent) = structure.by_id.get(id) {
        return Some(parent.clone());
    }
    let relative = state.parent_relative_path.as_deref()?;
    let mut candidate = normalize_path(&project.directory().join(relative));
    if !relative.ends_with(".xml") {
        candidate.push("pom.xml");
    }
    structure
        .by_path
        .get(&candidate)
        .filter(|parent| *parent != project)
        .cloned()
}

impl std::fmt::Debug for ProjectsTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let structure = self.structure.read();
        f.debug_struct("ProjectsTree")
            .field("roots", &structure.roots.len())
            .field("projects", &structure.by_path.len())
            .finish()
    }
}
