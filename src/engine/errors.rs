//! Error types for the memory engine
//!
//! This module defines [`MemoryError`], which represents every failure the engine,
//! its stores and the snapshot history can report.
//!
//! # Error Classes
//!
//! - **User-facing** (recoverable at the command boundary): [`MemoryError::CapacityExceeded`],
//!   [`MemoryError::NameCollision`], [`MemoryError::UnknownVariable`],
//!   [`MemoryError::SlotKindMismatch`]
//! - **Programming errors** (an engine bug or a caller that skipped validation):
//!   everything else, most importantly [`MemoryError::OutOfBounds`] and
//!   [`MemoryError::CorruptLayout`]
//!
//! The engine never retries. Failed operations leave memory unchanged; the host is
//! responsible for turning these into messages.

use crate::memory::value::MemType;
use crate::memory::Address;
use thiserror::Error;

/// Errors reported by the memory engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The bump allocator has no room for the requested bytes
    #[error("capacity exceeded: requested {requested} bytes with {used} of {capacity} in use")]
    CapacityExceeded {
        requested: u32,
        used: u32,
        capacity: u32,
    },

    /// A read or write touched bytes outside `[0, used)`
    #[error("out of bounds: {len} bytes at 0x{address:08x} (used = 0x{used:08x})")]
    OutOfBounds { address: Address, len: u32, used: u32 },

    /// A variable with this name already exists in the frame
    #[error("variable '{name}' is already declared in frame '{frame}'")]
    NameCollision { frame: String, name: String },

    /// Schema and bytes disagree
    #[error("corrupt layout: {message}")]
    CorruptLayout { message: String },

    /// No frame with the given id
    #[error("no stack frame with id {id}")]
    UnknownFrame { id: u32 },

    /// No variable with the given name in the frame
    #[error("variable '{name}' is not declared")]
    UnknownVariable { name: String },

    /// A primitive operation was applied to a reference slot or the other way around
    #[error("variable '{name}' is {actual}, expected {expected}")]
    SlotKindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A pointer names an address that is not a registered heap object
    #[error("no heap object at 0x{address:08x}")]
    UnknownObject { address: Address },

    /// Engine configuration is unusable
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Snapshot history budget exhausted
    #[error("snapshot memory limit exceeded: {current} + {requested} > {limit} bytes")]
    SnapshotLimitExceeded {
        current: usize,
        requested: usize,
        limit: usize,
    },
}

impl MemoryError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        MemoryError::CorruptLayout {
            message: message.into(),
        }
    }

    pub(crate) fn shape_mismatch(ty: &MemType, got: impl std::fmt::Display) -> Self {
        MemoryError::corrupt(format!("value {} does not conform to {}", got, ty))
    }

    /// Whether the condition can be triggered by a user command (as opposed to an engine bug)
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MemoryError::CapacityExceeded { .. }
                | MemoryError::NameCollision { .. }
                | MemoryError::UnknownVariable { .. }
                | MemoryError::SlotKindMismatch { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MemoryError>;
