//! Memory model for the engine
//!
//! This module provides the core memory abstractions:
//! - [`store`]: The linear byte store with bump allocation and typed accessors
//! - [`value`]: Type shapes ([`value::MemType`]) and tagged values ([`value::Value`])
//! - [`layout`]: The codec shared by everything that reads or writes memory
//! - [`stack`]: Frames of named primitive and reference slots
//! - [`heap`]: The registry of strings, arrays and compact objects
//!
//! # Type Sizes
//!
//! Sizes are fixed and platform-independent:
//! - pointers (reference slots, `ref32` cells, reference fields): 4 bytes
//! - primitives: see [`layout::prim_size`]
//! - objects: count word plus the sum of field sizes (no padding or alignment)
//!
//! # Addresses
//!
//! An [`Address`] is a `u32` offset into the store. The first few bytes form the
//! null guard, so [`NULL`] is never a valid object address.

pub mod heap;
pub mod layout;
pub mod stack;
pub mod store;
pub mod value;

use value::MemType;

/// Memory address type (32-bit offset into the byte store)
pub type Address = u32;

/// The null reference
pub const NULL: Address = 0;

/// Bytes a value of `ty` occupies where it is stored inline
pub fn sizeof_type(ty: &MemType) -> u32 {
    layout::slot_size(ty)
}

/// Render an address in the `0x%08x` form used throughout snapshots and dumps
pub fn format_address(addr: Address) -> String {
    format!("0x{:08x}", addr)
}
