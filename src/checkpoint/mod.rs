// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Named snapshots of a dataset's calibration state (flags and applied
//! tables).
//!
//! There is at most one live snapshot per label; saving under an existing
//! label replaces it. Every save gets a new, larger [`CheckpointId`], so
//! snapshots are strictly ordered.

mod dir;
mod error;

pub use dir::DirCheckpointStore;
pub use error::CheckpointError;

use std::fmt;

use indexmap::IndexMap;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, DatasetState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub u64);

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

pub trait CheckpointStore {
    /// Capture the current state of `dataset` under `label`, discarding any
    /// snapshot already under that label.
    fn save(&mut self, dataset: &Dataset, label: &str) -> Result<CheckpointId, CheckpointError>;

    /// Revert `dataset` to exactly the state saved under `label`.
    fn restore(&mut self, dataset: &mut Dataset, label: &str) -> Result<(), CheckpointError>;

    /// Remove the snapshot under `label`. Removing something that isn't there
    /// is not an error.
    fn delete(&mut self, label: &str) -> Result<(), CheckpointError>;

    /// The live labels, oldest first.
    fn labels(&self) -> Vec<String>;

    fn id_of(&self, label: &str) -> Option<CheckpointId>;

    fn contains(&self, label: &str) -> bool {
        self.id_of(label).is_some()
    }

    fn len(&self) -> usize {
        self.labels().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Put `state` into `dataset`, as long as it fits.
fn restore_state(
    dataset: &mut Dataset,
    state: DatasetState,
    label: &str,
) -> Result<(), CheckpointError> {
    let expected = dataset.flags().dim();
    let actual = state.flags.dim();
    if expected != actual {
        return Err(CheckpointError::ShapeMismatch {
            label: label.to_string(),
            expected,
            actual,
        });
    }
    dataset.restore_snapshot(state);
    Ok(())
}

#[derive(Debug, Clone)]
struct Snapshot {
    id: CheckpointId,
    state: DatasetState,
}

/// Keeps snapshots in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    next_id: u64,
    snapshots: IndexMap<String, Snapshot>,
}

impl MemoryCheckpointStore {
    pub fn new() -> MemoryCheckpointStore {
        MemoryCheckpointStore::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, dataset: &Dataset, label: &str) -> Result<CheckpointId, CheckpointError> {
        let id = CheckpointId(self.next_id);
        self.next_id += 1;
        // Removing first keeps the map ordered by ID.
        if self.snapshots.shift_remove(label).is_some() {
            trace!("Overwriting checkpoint '{label}'");
        }
        self.snapshots.insert(
            label.to_string(),
            Snapshot {
                id,
                state: dataset.snapshot(),
            },
        );
        trace!("Saved checkpoint '{label}' ({id})");
        Ok(id)
    }

    fn restore(&mut self, dataset: &mut Dataset, label: &str) -> Result<(), CheckpointError> {
        let snapshot = self
            .snapshots
            .get(label)
            .ok_or_else(|| CheckpointError::NotFound(label.to_string()))?;
        restore_state(dataset, snapshot.state.clone(), label)?;
        trace!("Restored checkpoint '{label}' ({})", snapshot.id);
        Ok(())
    }

    fn delete(&mut self, label: &str) -> Result<(), CheckpointError> {
        if self.snapshots.shift_remove(label).is_some() {
            trace!("Deleted checkpoint '{label}'");
        }
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        self.snapshots.keys().cloned().collect()
    }

    fn id_of(&self, label: &str) -> Option<CheckpointId> {
        self.snapshots.get(label).map(|s| s.id)
    }
}
