// Snapshot history for stepping back through a session

use super::diff::{diff_snapshots, DiffEvent};
use super::Snapshot;
use crate::engine::config::EngineConfig;
use crate::engine::errors::{MemoryError, Result};

/// Ordered snapshots under a memory budget
#[derive(Debug)]
pub struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
    max_memory: usize,
    current_memory: usize,
}

impl SnapshotHistory {
    pub fn new(max_memory: usize) -> Self {
        SnapshotHistory {
            snapshots: Vec::new(),
            max_memory,
            current_memory: 0,
        }
    }

    /// History bounded by the configured `snapshot_budget`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.snapshot_budget)
    }

    /// Add a snapshot to history; over budget leaves the history unchanged
    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        let snapshot_size = snapshot.estimated_size();

        if self.current_memory + snapshot_size > self.max_memory {
            return Err(MemoryError::SnapshotLimitExceeded {
                current: self.current_memory,
                requested: snapshot_size,
                limit: self.max_memory,
            });
        }

        self.current_memory += snapshot_size;
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.max_memory
    }

    /// Events leading into snapshot `index` (`None` for 0 or out of range)
    pub fn diff_at(&self, index: usize) -> Option<Vec<DiffEvent>> {
        let before = self.snapshots.get(index.checked_sub(1)?)?;
        let after = self.snapshots.get(index)?;
        Some(diff_snapshots(before, after))
    }
}
