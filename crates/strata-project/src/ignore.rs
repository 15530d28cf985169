use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use strata_core::to_system_independent;

use crate::error::ProjectError;

/// Compiled form of the user's ignored-path patterns.
#[derive(Debug, Clone)]
pub(crate) struct IgnoreMatcher {
    set: GlobSet,
}

impl IgnoreMatcher {
    pub(crate) fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub(crate) fn compile(patterns: &[String]) -> Result<Self, ProjectError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| ProjectError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|source| ProjectError::InvalidPattern {
                pattern: patterns.join(", "),
                source,
            })?;
        Ok(Self { set })
    }

    pub(crate) fn is_match(&self, path: &Path) -> bool {
        !self.set.is_empty() && self.set.is_match(to_system_independent(&path.to_string_lossy()))
    }
}
