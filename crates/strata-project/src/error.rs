use std::path::PathBuf;

use strata_scheduler::Cancelled;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("project {path} is not part of the tree")]
    UnknownProject { path: PathBuf },

    #[error("failed to resolve {path}: {message}")]
    Resolve { path: PathBuf, message: String },

    #[error("invalid ignore pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl ProjectError {
    pub fn resolve(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        ProjectError::Resolve {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProjectError::Cancelled(_))
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot: {0}")]
    Decode(#[from] bincode::Error),

    #[error("corrupt snapshot: {0}")]
    Malformed(String),
}
