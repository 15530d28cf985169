//! Binary persistence of a [`ProjectsTree`].
//!
//! The file is a sequence of `bincode` records: the format marker, the state
//! lock contents, the root count, then every project in pre-order (path,
//! state, content timestamp, module count).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_core::{atomic_write, SettingsProvider};

use crate::descriptor::ProjectDescriptor;
use crate::error::SnapshotError;
use crate::ignore::IgnoreMatcher;
use crate::model::{observe_read_stamp, ProjectState};
use crate::profiles::ExplicitProfiles;
use crate::timestamp::ContentTimestamp;
use crate::tree::{ProjectsTree, Structure, TreeState};

pub const SNAPSHOT_FORMAT: &str = "STRATA-TREE-v3";

/// Upper bound for a snapshot file; anything larger is treated as corrupt.
const SNAPSHOT_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

fn bincode_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn bincode_options_limited() -> impl Options + Copy {
    bincode_options().with_limit(SNAPSHOT_LIMIT_BYTES)
}

#[derive(Serialize)]
struct NodeRef<'a> {
    path: &'a Path,
    state: &'a ProjectState,
    timestamp: [u64; 6],
    module_count: u64,
}

#[derive(Deserialize)]
struct NodeRecord {
    path: PathBuf,
    state: ProjectState,
    timestamp: [u64; 6],
    module_count: u64,
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SnapshotError> {
        bincode_options().serialize_into(&mut self.buf, value)?;
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl Reader<'_> {
    fn read<T: DeserializeOwned>(&mut self) -> Result<T, SnapshotError> {
        Ok(bincode_options_limited().deserialize_from(&mut self.bytes)?)
    }
}

impl ProjectsTree {
    /// Write the whole tree to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut out = Writer { buf: Vec::new() };
        out.write(SNAPSHOT_FORMAT)?;
        {
            let state = self.state.lock();
            out.write(&state.managed_files)?;
            out.write(&state.ignored_files)?;
            out.write(&state.ignored_patterns)?;
            out.write(&state.explicit_profiles.enabled)?;
            out.write(&state.explicit_profiles.disabled)?;
        }

        let mut count = 0usize;
        {
            let structure = self.structure.read();
            out.write(&(structure.roots.len() as u64))?;
            let mut stack: Vec<ProjectDescriptor> = structure.roots.iter().rev().cloned().collect();
            while let Some(project) = stack.pop() {
                let modules = structure
                    .aggregator_to_modules
                    .get(project.path())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let timestamp = structure
                    .timestamps
                    .get(project.path())
                    .copied()
                    .unwrap_or(ContentTimestamp::NULL);
                let state = project.state();
                out.write(&NodeRef {
                    path: project.path(),
                    state: &state,
                    timestamp: timestamp.to_array(),
                    module_count: modules.len() as u64,
                })?;
                stack.extend(modules.iter().rev().cloned());
                count += 1;
            }
        }

        atomic_write(path, &out.buf).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            target = "strata.project",
            path = %path.display(),
            projects = count,
            bytes = out.buf.len(),
            "saved project tree snapshot"
        );
        Ok(())
    }

    /// Read a tree saved by [`ProjectsTree::save`].
    ///
    /// A missing file or a file written in another format yields `Ok(None)`;
    /// a file in the current format that cannot be decoded is an error.
    pub fn load(
        path: &Path,
        settings: Arc<dyn SettingsProvider>,
    ) -> Result<Option<ProjectsTree>, SnapshotError> {
        let io_err = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(err)),
        };
        if meta.len() > SNAPSHOT_LIMIT_BYTES {
            return Err(SnapshotError::Malformed(format!(
                "snapshot is {} bytes, limit is {SNAPSHOT_LIMIT_BYTES}",
                meta.len()
            )));
        }
        let bytes = std::fs::read(path).map_err(io_err)?;

        let mut input = Reader { bytes: &bytes };
        match input.read::<String>() {
            Ok(format) if format == SNAPSHOT_FORMAT => {}
            Ok(format) => {
                tracing::info!(
                    target = "strata.project",
                    path = %path.display(),
                    found = %format,
                    expected = SNAPSHOT_FORMAT,
                    "ignoring project tree snapshot written in another format"
                );
                return Ok(None);
            }
            Err(err) => {
                tracing::info!(
                    target = "strata.project",
                    path = %path.display(),
                    error = %err,
                    "ignoring unrecognized project tree snapshot"
                );
                return Ok(None);
            }
        }

        let managed_files: Vec<PathBuf> = input.read()?;
        let ignored_files: BTreeSet<PathBuf> = input.read()?;
        let ignored_patterns: Vec<String> = input.read()?;
        let enabled: BTreeSet<String> = input.read()?;
        let disabled: BTreeSet<String> = input.read()?;

        let matcher = match IgnoreMatcher::compile(&ignored_patterns) {
            Ok(matcher) => matcher,
            Err(err) => {
                tracing::warn!(
                    target = "strata.project",
                    error = %err,
                    "dropping invalid ignore patterns from snapshot"
                );
                IgnoreMatcher::empty()
            }
        };

        let structure = read_structure(&mut input)?;

        let tree = ProjectsTree::new(settings);
        *tree.state.lock() = TreeState {
            managed_files,
            explicit_profiles: ExplicitProfiles { enabled, disabled },
            ignored_files,
            ignored_patterns,
            matcher,
        };
        *tree.structure.write() = structure;
        Ok(Some(tree))
    }
}

fn read_structure(input: &mut Reader<'_>) -> Result<Structure, SnapshotError> {
    let mut structure = Structure::default();
    let roots: u64 = input.read()?;

    // (aggregator, modules still to read)
    let mut pending: Vec<(Option<ProjectDescriptor>, u64)> = vec![(None, roots)];
    while let Some((aggregator, remaining)) = pending.last_mut() {
        if *remaining == 0 {
            pending.pop();
            continue;
        }
        *remaining -= 1;
        let aggregator = aggregator.clone();

        let node: NodeRecord = input.read()?;
        if structure.by_path.contains_key(&node.path) {
            return Err(SnapshotError::Malformed(format!(
                "project {} appears twice",
                node.path.display()
            )));
        }
        observe_read_stamp(node.state.last_read_stamp);
        let state = Arc::new(node.state);
        let project = ProjectDescriptor::with_state(node.path.clone(), Arc::clone(&state));

        structure.by_path.insert(node.path.clone(), project.clone());
        structure.fill_id_maps(&project, &state);
        structure.timestamps.insert(
            node.path.clone(),
            ContentTimestamp::from_array(node.timestamp),
        );
        match aggregator {
            Some(aggregator) => {
                structure
                    .aggregator_to_modules
                    .entry(aggregator.path().to_path_buf())
                    .or_default()
                    .push(project.clone());
                structure
                    .module_to_aggregator
                    .insert(node.path, aggregator);
            }
            None => structure.roots.push(project.clone()),
        }

        if node.module_count > 0 {
            pending.push((Some(project), node.module_count));
        }
    }
    Ok(structure)
}
