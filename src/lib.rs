//! # Introduction
//!
//! memviz models the memory of a small Java-like program as one flat,
//! byte-addressed buffer so a renderer can show exactly which bytes each
//! variable and heap object occupies.  Every declaration is laid out
//! byte-exactly, and the state can be projected into serializable snapshots and
//! compared step by step.
//!
//! ## Pipeline
//!
//! ```text
//! Declaration → MemoryEngine → Snapshot → DiffEvents → renderer
//! ```
//!
//! 1. [`memory`]: the byte store, stack frames, heap registry and the layout
//!    codec that turns values into bytes and back.
//! 2. [`engine`]: the [`engine::MemoryEngine`] composition root, its
//!    configuration and error type.
//! 3. [`snapshot`]: immutable projections with a byte-range index, typed diff
//!    events, a bounded history and plain-text dumps.
//! 4. [`script`]: JSON command scripts driving an engine, used by the binary.
//!
//! ## Layout summary
//!
//! Addresses are `u32`; address `0` starts the null guard and is never
//! allocated.  Integers are little-endian, `long` is stored low word first.
//! Strings and arrays have an 8-byte `{length, dataPtr}` header; compact
//! objects have a 4-byte field count followed by their fields inline.

pub mod engine;
pub mod memory;
pub mod script;
pub mod snapshot;
