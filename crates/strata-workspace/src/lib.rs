//! Per-workspace wiring of the project tree and the package indices.
//!
//! A [`WorkspaceContext`] is created explicitly for one workspace root. It
//! reacts to tree events by scheduling resolution work on the processor
//! queues, feeds resolved artifacts into the local repository index, rebuilds
//! broken indices and keeps the tree snapshot on disk up to date.

mod context;
mod events;
mod pipeline;
mod snapshot;

pub use context::{WorkspaceContext, LOCAL_REPOSITORY_ID};
pub use events::WorkspaceEvent;
