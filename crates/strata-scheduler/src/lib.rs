//! Background execution for Strata: serialized per-category queues, progress
//! reporting, cooperative cancellation and the shared download pool.

mod download;
mod progress;
mod queue;

pub use download::{DownloadOutcome, DownloadPool};
pub use progress::{ProgressEvent, ProgressId, ProgressIndicator, ProgressReceiver, ProgressSender};
pub use queue::{ProcessorQueues, QueueStats, SerialQueue, TaskCategory};

pub use tokio_util::sync::CancellationToken;

/// Cooperative cancellation signal.
///
/// Returned (never logged as an error) by long operations whose
/// [`CancellationToken`] was triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
    #[error("task failed: {0}")]
    Failed(String),
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

impl TaskError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        TaskError::Failed(err.to_string())
    }
}

/// `Err(Cancelled)` once `token` has been cancelled.
pub fn check_cancelled(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}
