//! Local package index for Strata.
//!
//! A [`PackageIndex`] keeps persistent `group -> artifacts` and
//! `group:artifact -> versions` maps for one repository. Each rebuild writes a
//! complete new generation directory and only then points `index.properties`
//! at it, so a failed or interrupted rebuild never loses the previous data.
//! Storage failures during lookups reset the index to an empty generation and
//! report it broken instead of surfacing errors.
//!
//! [`IndexManager`] owns the indices of a workspace, schedules their updates
//! on the post-processing queue and keeps the user archetype catalog.

mod archetype;
mod artifact;
mod error;
mod index;
mod indexer;
mod manager;
mod metadata;
mod storage;

pub use archetype::{Archetype, USER_ARCHETYPES_XML};
pub use artifact::ArtifactInfo;
pub use error::IndexError;
pub use index::{IndexListener, IndexState, PackageIndex};
pub use indexer::{IndexTarget, Indexer, LocalRepositoryIndexer, NotNexusIndexer};
pub use manager::{IndexEvent, IndexManager, UpdatingState};
pub use metadata::{IndexKind, IndexMetadata, INDEX_FORMAT_VERSION, INDEX_PROPERTIES};
