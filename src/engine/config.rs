//! Engine configuration
//!
//! All address-space parameters are carried explicitly in [`EngineConfig`] rather
//! than in process-wide state. A config can be built in code or deserialized from
//! JSON; missing fields fall back to the defaults in [`super::constants`].

use super::constants::{
    DEFAULT_BYTES_PER_ROW, DEFAULT_CAPACITY, DEFAULT_PREVIEW_LIMIT, DEFAULT_SNAPSHOT_BUDGET,
    NULL_GUARD_SIZE,
};
use super::errors::{MemoryError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total size of the byte store
    pub capacity: u32,
    /// Bytes reserved at address 0
    pub null_guard: u32,
    /// Max characters / elements / fields shown in a preview before truncating
    pub preview_limit: usize,
    /// Width of one row in the snapshot RAM view
    pub bytes_per_row: u32,
    /// Memory budget for [`crate::snapshot::SnapshotHistory`]
    pub snapshot_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            capacity: DEFAULT_CAPACITY,
            null_guard: NULL_GUARD_SIZE,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            bytes_per_row: DEFAULT_BYTES_PER_ROW,
            snapshot_budget: DEFAULT_SNAPSHOT_BUDGET,
        }
    }
}

impl EngineConfig {
    /// Default config with a different capacity
    pub fn with_capacity(capacity: u32) -> Self {
        EngineConfig {
            capacity,
            ..Self::default()
        }
    }

    /// Parse a JSON config
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| MemoryError::InvalidConfig {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.null_guard == 0 {
            return Err(MemoryError::InvalidConfig {
                message: "null guard must reserve at least one byte".to_string(),
            });
        }
        if self.capacity <= self.null_guard {
            return Err(MemoryError::InvalidConfig {
                message: format!(
                    "capacity {} leaves no room past the {}-byte null guard",
                    self.capacity, self.null_guard
                ),
            });
        }
        if self.bytes_per_row == 0 {
            return Err(MemoryError::InvalidConfig {
                message: "bytes_per_row must be positive".to_string(),
            });
        }
        Ok(())
    }
}
