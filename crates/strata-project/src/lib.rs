//! Project model and incremental update engine.
//!
//! A [`ProjectsTree`] holds one [`ProjectDescriptor`] per declaration file
//! (`pom.xml`). Descriptors carry an immutable [`ProjectState`] that is
//! replaced wholesale on every re-read or resolution, so readers never observe
//! a half-updated project.

mod descriptor;
mod error;
mod events;
mod ignore;
mod model;
mod pom;
mod profiles;
mod resolver;
mod snapshot;
mod timestamp;
mod tree;

pub use descriptor::ProjectDescriptor;
pub use error::{ProjectError, SnapshotError};
pub use events::{ListenerId, NativeHandle, TreeEvent, TreeListener};
pub use model::{
    Dependency, DependencyIndex, DependencyState, Plugin, ProblemKind, ProjectChanges,
    ProjectState, ReadProblem, DEFAULT_PACKAGING,
};
pub use pom::PomReader;
pub use profiles::ExplicitProfiles;
pub use resolver::{LocalRepositoryResolver, ProjectResolver, ResolvedData, ResolvedFolders};
pub use snapshot::SNAPSHOT_FORMAT;
pub use timestamp::{ContentTimestamp, PROFILES_XML};
pub use tree::ProjectsTree;
