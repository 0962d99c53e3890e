//! Memory engine orchestration
//!
//! This module provides the composition root and its ambient pieces:
//! - [`memory_engine`]: [`MemoryEngine`], which owns the byte store, stack and heap
//! - [`request`]: Validated declarations consumed from the command interpreter
//! - [`config`]: Address-space and display parameters
//! - [`errors`]: The [`MemoryError`] taxonomy
//! - [`constants`]: Layout constants and defaults
//!
//! # Execution Model
//!
//! Single-threaded and synchronous. Each operation runs to completion before
//! returning and is not reentrant. The engine validates sizes before writing, so
//! a failed operation leaves memory exactly as it was.

pub mod config;
pub mod constants;
pub mod errors;
pub mod memory_engine;
pub mod request;

pub use config::EngineConfig;
pub use errors::{MemoryError, Result};
pub use memory_engine::MemoryEngine;
pub use request::{Declaration, RefTarget};
