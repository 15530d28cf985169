use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use strata_core::MavenId;

pub const DEFAULT_PACKAGING: &str = "jar";

static READ_STAMP: AtomicU64 = AtomicU64::new(0);

/// Next value of the process-wide, monotonic read stamp.
pub(crate) fn next_read_stamp() -> u64 {
    READ_STAMP.fetch_add(1, Ordering::Relaxed) + 1
}

/// Make sure stamps handed out later are larger than `stamp` (used when
/// states come back from a snapshot).
pub(crate) fn observe_read_stamp(stamp: u64) {
    READ_STAMP.fetch_max(stamp, Ordering::Relaxed);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyState {
    /// Declared but not resolved yet.
    Declared,
    Resolved(PathBuf),
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub id: MavenId,
    pub scope: Option<String>,
    pub classifier: Option<String>,
    pub type_: Option<String>,
    pub optional: bool,
    pub state: DependencyState,
}

impl Dependency {
    pub fn new(id: MavenId) -> Self {
        Self {
            id,
            scope: None,
            classifier: None,
            type_: None,
            optional: false,
            state: DependencyState::Declared,
        }
    }

    pub fn type_or_default(&self) -> &str {
        self.type_.as_deref().unwrap_or("jar")
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, DependencyState::Resolved(_))
    }

    /// Identity inside a declared dependency list; two entries with the same
    /// identity are duplicates.
    fn identity(&self) -> (&MavenId, Option<&str>, &str) {
        (&self.id, self.classifier.as_deref(), self.type_or_default())
    }
}

/// Drop later duplicates, keeping declaration order.
pub(crate) fn dedup_dependencies(deps: &mut Vec<Dependency>) {
    let mut seen = std::collections::HashSet::new();
    deps.retain(|dep| {
        let (id, classifier, type_) = dep.identity();
        seen.insert((id.clone(), classifier.map(str::to_string), type_.to_string()))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plugin {
    pub id: MavenId,
    pub extensions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    /// The declaration file is missing or unreadable.
    Missing,
    /// Malformed XML.
    Syntax,
    /// Well-formed, but not a usable project declaration.
    Structure,
    /// A dependency could not be resolved.
    Dependency,
    /// Reported by the resolver.
    Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadProblem {
    pub path: PathBuf,
    pub kind: ProblemKind,
    pub message: String,
}

impl ReadProblem {
    pub fn new(path: impl Into<PathBuf>, kind: ProblemKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Problems that make the parsed data itself unreliable.
    pub fn is_read_error(&self) -> bool {
        matches!(
            self.kind,
            ProblemKind::Missing | ProblemKind::Syntax | ProblemKind::Structure
        )
    }
}

impl fmt::Display for ReadProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Lookup structures derived from a state's dependency list.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    pub by_id: HashMap<MavenId, Vec<Dependency>>,
    pub by_key: HashMap<String, Vec<Dependency>>,
}

impl DependencyIndex {
    fn build(deps: &[Dependency]) -> Self {
        let mut index = DependencyIndex::default();
        for dep in deps {
            index
                .by_id
                .entry(dep.id.clone())
                .or_default()
                .push(dep.clone());
            index.by_key.entry(dep.id.key()).or_default().push(dep.clone());
        }
        index
    }
}

/// Per-snapshot lazily built cache. Never persisted, never compared; a cloned
/// state starts with an empty cache.
#[derive(Default)]
pub(crate) struct IndexCache(OnceLock<DependencyIndex>);

impl Clone for IndexCache {
    fn clone(&self) -> Self {
        IndexCache::default()
    }
}

impl PartialEq for IndexCache {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for IndexCache {}

impl fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() {
            "IndexCache(built)"
        } else {
            "IndexCache(empty)"
        })
    }
}

/// Immutable data of one project declaration.
///
/// Never mutated once shared: every re-read or resolution produces a new
/// value that replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: MavenId,
    pub parent_id: Option<MavenId>,
    pub parent_relative_path: Option<String>,
    pub name: Option<String>,
    pub packaging: String,

    /// Module paths as written (after placeholder expansion and profile
    /// activation).
    pub declared_modules: Vec<String>,
    /// Declaration files the modules resolve to.
    pub module_files: Vec<PathBuf>,

    pub sources: Vec<PathBuf>,
    pub test_sources: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
    pub test_resources: Vec<PathBuf>,
    pub build_directory: PathBuf,
    pub output_directory: PathBuf,
    pub test_output_directory: PathBuf,

    pub dependencies: Vec<Dependency>,
    pub plugins: Vec<Plugin>,
    pub declared_profiles: Vec<String>,
    pub activated_profiles: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub problems: Vec<ReadProblem>,

    pub resolved: bool,
    pub last_read_stamp: u64,

    #[serde(skip)]
    pub(crate) index: IndexCache,
}

impl ProjectState {
    /// State of a project that has not been read yet.
    pub fn unread(path: &Path) -> Self {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let build = dir.join("target");
        Self {
            id: MavenId::default(),
            parent_id: None,
            parent_relative_path: None,
            name: None,
            packaging: DEFAULT_PACKAGING.to_string(),
            declared_modules: Vec::new(),
            module_files: Vec::new(),
            sources: Vec::new(),
            test_sources: Vec::new(),
            resources: Vec::new(),
            test_resources: Vec::new(),
            output_directory: build.join("classes"),
            test_output_directory: build.join("test-classes"),
            build_directory: build,
            dependencies: Vec::new(),
            plugins: Vec::new(),
            declared_profiles: Vec::new(),
            activated_profiles: BTreeSet::new(),
            properties: BTreeMap::new(),
            problems: Vec::new(),
            resolved: false,
            last_read_stamp: 0,
            index: IndexCache::default(),
        }
    }

    pub fn has_read_errors(&self) -> bool {
        self.problems.iter().any(ReadProblem::is_read_error)
    }

    pub fn is_aggregator(&self) -> bool {
        self.packaging == "pom" || !self.declared_modules.is_empty()
    }

    /// Dependency lookups, built on first use.
    pub fn dependency_index(&self) -> &DependencyIndex {
        self.index
            .0
            .get_or_init(|| DependencyIndex::build(&self.dependencies))
    }

    pub fn find_dependencies(&self, id: &MavenId) -> &[Dependency] {
        self.dependency_index()
            .by_id
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find_dependencies_by_key(&self, group_id: &str, artifact_id: &str) -> &[Dependency] {
        self.dependency_index()
            .by_key
            .get(&format!("{group_id}:{artifact_id}"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unresolved_dependencies(&self) -> Vec<&Dependency> {
        self.dependencies
            .iter()
            .filter(|dep| dep.state == DependencyState::Unresolved)
            .collect()
    }

    /// Module files that currently exist on disk.
    pub fn existing_module_files(&self) -> Vec<PathBuf> {
        self.module_files
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect()
    }
}

/// Which aspects differ between two states of one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProjectChanges {
    pub packaging: bool,
    pub output: bool,
    pub sources: bool,
    pub dependencies: bool,
    pub plugins: bool,
    pub properties: bool,
    /// Coordinates, modules or the project's place in the tree changed.
    pub structure: bool,
}

impl ProjectChanges {
    pub const NONE: ProjectChanges = ProjectChanges {
        packaging: false,
        output: false,
        sources: false,
        dependencies: false,
        plugins: false,
        properties: false,
        structure: false,
    };

    pub const ALL: ProjectChanges = ProjectChanges {
        packaging: true,
        output: true,
        sources: true,
        dependencies: true,
        plugins: true,
        properties: true,
        structure: true,
    };

    pub const STRUCTURE: ProjectChanges = ProjectChanges {
        structure: true,
        ..ProjectChanges::NONE
    };

    pub fn between(old: &ProjectState, new: &ProjectState) -> Self {
        Self {
            packaging: old.packaging != new.packaging,
            output: old.build_directory != new.build_directory
                || old.output_directory != new.output_directory
                || old.test_output_directory != new.test_output_directory,
            sources: old.sources != new.sources
                || old.test_sources != new.test_sources
                || old.resources != new.resources
                || old.test_resources != new.test_resources,
            dependencies: old.dependencies != new.dependencies,
            plugins: old.plugins != new.plugins,
            properties: old.properties != new.properties,
            structure: old.id != new.id
                || old.parent_id != new.parent_id
                || old.module_files != new.module_files,
        }
    }

    pub fn has_changes(&self) -> bool {
        *self != ProjectChanges::NONE
    }

    pub fn merged(self, other: ProjectChanges) -> Self {
        Self {
            packaging: self.packaging || other.packaging,
            output: self.output || other.output,
            sources: self.sources || other.sources,
            dependencies: self.dependencies || other.dependencies,
            plugins: self.plugins || other.plugins,
            properties: self.properties || other.properties,
            structure: self.structure || other.structure,
        }
    }
}
