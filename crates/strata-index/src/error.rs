use std::path::PathBuf;

use strata_scheduler::Cancelled;

/// Errors produced by index storage, metadata and updates.
///
/// Lookups never surface these: a failing lookup turns the index broken and
/// answers "not found" instead.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("corrupt record log {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("invalid index metadata {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("index {path_or_url} is closed")]
    Closed { path_or_url: String },

    #[error("failed to scan {path_or_url}: {message}")]
    Scan { path_or_url: String, message: String },
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled(_))
    }
}
