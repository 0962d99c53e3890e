//! Linear byte store with bump allocation
//!
//! [`ByteStore`] is the single backing buffer for every stack slot and heap object.
//! It never frees individual allocations: `used` only grows until the engine resets
//! the whole store back to the null guard.
//!
//! # Encoding
//!
//! All multi-byte values are little-endian. 64-bit integers are stored as two
//! `u32` words, low word first; reading them back sign-extends from bit 63.
//!
//! # Bounds
//!
//! Typed reads must lie within `[0, used)` and typed writes within
//! `[null_guard, used)`. Anything else is [`MemoryError::OutOfBounds`]. Only
//! [`ByteStore::dump_range`] tolerates arbitrary ranges, zero-padding what lies
//! past `used`.

use super::Address;
use crate::engine::errors::{MemoryError, Result};

/// A region handed out by the allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub from: Address,
    pub to: Address,
    pub label: Option<String>,
}

impl Allocation {
    pub fn size(&self) -> u32 {
        self.to - self.from
    }

    fn overlaps(&self, from: Address, to: Address) -> bool {
        self.from < to && from < self.to
    }
}

/// Read-only view over a range of the store, for display
#[derive(Debug, Clone)]
pub struct RamDump<'a> {
    pub from: Address,
    pub to: Address,
    pub bytes: Vec<u8>,
    pub allocations: Vec<&'a Allocation>,
}

/// Fixed-capacity, byte-addressable memory
#[derive(Debug, Clone)]
pub struct ByteStore {
    data: Vec<u8>,
    used: u32,
    null_guard: u32,
    allocations: Vec<Allocation>,
}

impl ByteStore {
    /// Create a zeroed store whose first `null_guard` bytes are reserved
    pub fn new(capacity: u32, null_guard: u32) -> Self {
        let null_guard = null_guard.min(capacity);
        ByteStore {
            data: vec![0; capacity as usize],
            used: null_guard,
            null_guard,
            allocations: vec![Allocation {
                from: 0,
                to: null_guard,
                label: Some("null guard".to_string()),
            }],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    /// Next free address
    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn null_guard(&self) -> u32 {
        self.null_guard
    }

    pub fn remaining(&self) -> u32 {
        self.capacity() - self.used
    }

    /// All allocation records in address order (the null guard comes first)
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Bump-allocate `size` bytes and return their start address
    pub fn allocate(&mut self, size: u32) -> Result<Address> {
        self.allocate_region(size, None)
    }

    /// Bump-allocate and record a display label for the region
    pub fn allocate_labeled(&mut self, size: u32, label: impl Into<String>) -> Result<Address> {
        self.allocate_region(size, Some(label.into()))
    }

    fn allocate_region(&mut self, size: u32, label: Option<String>) -> Result<Address> {
        let end = self
            .used
            .checked_add(size)
            .filter(|&end| end <= self.capacity())
            .ok_or(MemoryError::CapacityExceeded {
                requested: size,
                used: self.used,
                capacity: self.capacity(),
            })?;

        let addr = self.used;
        self.used = end;
        self.allocations.push(Allocation {
            from: addr,
            to: end,
            label,
        });
        log::trace!("allocated {} bytes at 0x{:08x}", size, addr);
        Ok(addr)
    }

    /// Zero everything past the null guard and rewind the allocator to it
    pub fn reset(&mut self) {
        let guard = self.null_guard as usize;
        let used = self.used as usize;
        self.data[guard..used].fill(0);
        self.used = self.null_guard;
        self.allocations.truncate(1);
    }

    fn check(&self, addr: Address, len: u32) -> Result<std::ops::Range<usize>> {
        let end = addr as u64 + len as u64;
        if end > self.used as u64 {
            return Err(MemoryError::OutOfBounds {
                address: addr,
                len,
                used: self.used,
            });
        }
        Ok(addr as usize..end as usize)
    }

    fn check_write(&self, addr: Address, len: u32) -> Result<std::ops::Range<usize>> {
        if addr < self.null_guard && len > 0 {
            return Err(MemoryError::OutOfBounds {
                address: addr,
                len,
                used: self.used,
            });
        }
        self.check(addr, len)
    }

    /// Borrow `len` raw bytes starting at `addr`
    pub fn read_bytes(&self, addr: Address, len: u32) -> Result<&[u8]> {
        let range = self.check(addr, len)?;
        Ok(&self.data[range])
    }

    /// Overwrite raw bytes starting at `addr`
    pub fn write_bytes(&mut self, addr: Address, bytes: &[u8]) -> Result<()> {
        let range = self.check_write(addr, bytes.len() as u32)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read_array<const N: usize>(&self, addr: Address) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(addr, N as u32)?);
        Ok(out)
    }

    pub fn read_u8(&self, addr: Address) -> Result<u8> {
        Ok(self.read_array::<1>(addr)?[0])
    }

    pub fn read_u16(&self, addr: Address) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array(addr)?))
    }

    pub fn read_u32(&self, addr: Address) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(addr)?))
    }

    pub fn read_i32(&self, addr: Address) -> Result<i32> {
        Ok(self.read_u32(addr)? as i32)
    }

    /// Read two words (low first) and sign-extend from bit 63
    pub fn read_i64(&self, addr: Address) -> Result<i64> {
        self.check(addr, 8)?;
        let low = self.read_u32(addr)? as u64;
        let high = self.read_u32(addr + 4)? as u64;
        Ok(((high << 32) | low) as i64)
    }

    pub fn read_f32(&self, addr: Address) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(addr)?))
    }

    pub fn read_f64(&self, addr: Address) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64(addr)? as u64))
    }

    pub fn write_u8(&mut self, addr: Address, value: u8) -> Result<()> {
        self.write_bytes(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: Address, value: u16) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: Address, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, addr: Address, value: i32) -> Result<()> {
        self.write_u32(addr, value as u32)
    }

    /// Write as two words, low first
    pub fn write_i64(&mut self, addr: Address, value: i64) -> Result<()> {
        self.check_write(addr, 8)?;
        let bits = value as u64;
        self.write_u32(addr, bits as u32)?;
        self.write_u32(addr + 4, (bits >> 32) as u32)
    }

    pub fn write_f32(&mut self, addr: Address, value: f32) -> Result<()> {
        self.write_u32(addr, value.to_bits())
    }

    pub fn write_f64(&mut self, addr: Address, value: f64) -> Result<()> {
        self.write_i64(addr, value.to_bits() as i64)
    }

    /// Copy `[from, to)` for display
    ///
    /// Never fails: a reversed range is empty, the end is clipped to capacity and
    /// bytes at or past `used` read as zero.
    pub fn dump_range(&self, from: Address, to: Address) -> RamDump<'_> {
        let to = to.min(self.capacity());
        let from = from.min(to);

        let mut bytes = vec![0u8; (to - from) as usize];
        let live_end = to.min(self.used);
        if from < live_end {
            bytes[..(live_end - from) as usize]
                .copy_from_slice(&self.data[from as usize..live_end as usize]);
        }

        let allocations = self
            .allocations
            .iter()
            .filter(|a| a.overlaps(from, to))
            .collect();

        RamDump {
            from,
            to,
            bytes,
            allocations,
        }
    }
}
