//! Immutable views of engine state for renderers
//!
//! - [`builder`]: Projects the byte store, stack and heap into a [`Snapshot`]
//! - [`ram`]: The byte-range index and its overlap resolution
//! - [`diff`]: Typed change events between two snapshots
//! - [`history`]: A memory-bounded list of snapshots
//! - [`dump`]: Plain-text dumps for debugging
//!
//! # Address Format
//!
//! Every address in a serialized snapshot is a `0x`-prefixed, zero-padded,
//! 8-hex-digit string (`"0x0000001c"`), and every byte range is a half-open
//! `{ from, to }` pair of such strings.

pub mod builder;
pub mod diff;
pub mod dump;
pub mod history;
pub mod ram;

pub use builder::{build_snapshot, SnapshotOptions};
pub use diff::{diff_snapshots, DiffEvent};
pub use history::SnapshotHistory;
pub use ram::{RamIndex, RamItem, Tone};

use crate::memory::value::{ArrayMode, Value};
use crate::memory::{format_address, Address};
use serde::{Serialize, Serializer};
use std::fmt;

/// An address that serializes as `"0x%08x"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexAddr(pub Address);

impl fmt::Display for HexAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_address(self.0))
    }
}

impl Serialize for HexAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<Address> for HexAddr {
    fn from(addr: Address) -> Self {
        HexAddr(addr)
    }
}

/// Half-open byte range `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteRange {
    pub from: HexAddr,
    pub to: HexAddr,
}

impl ByteRange {
    pub fn new(from: Address, to: Address) -> Self {
        ByteRange {
            from: HexAddr(from),
            to: HexAddr(to),
        }
    }

    pub fn size(&self) -> u32 {
        self.to.0 - self.from.0
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.from.0 <= addr && addr < self.to.0
    }
}

impl From<(Address, Address)> for ByteRange {
    fn from((from, to): (Address, Address)) -> Self {
        ByteRange::new(from, to)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// Bounded rendering of a heap object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    /// One-line summary, ending in `…` when truncated
    pub text: String,
    /// Rendered elements or fields (empty for strings)
    pub items: Vec<String>,
    /// Characters / elements / fields shown
    pub shown: usize,
    /// Characters / elements / fields present
    pub total: usize,
    pub truncated: bool,
}

/// One stack slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotView {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub kind: SlotViewKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotViewKind {
    Prim {
        addr: HexAddr,
        range: ByteRange,
        bytes: Vec<u8>,
        value: Value,
        display: String,
    },
    Ref {
        cell: HexAddr,
        range: ByteRange,
        /// `None` for null
        target: Option<HexAddr>,
        preview: Option<Preview>,
    },
}

impl SlotView {
    /// Address of the slot's own bytes
    pub fn addr(&self) -> Address {
        match &self.kind {
            SlotViewKind::Prim { addr, .. } => addr.0,
            SlotViewKind::Ref { cell, .. } => cell.0,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SlotViewKind::Prim { .. } => "prim",
            SlotViewKind::Ref { .. } => "ref",
        }
    }

    /// Pointer target of a reference slot (`None` for primitives and null)
    pub fn target(&self) -> Option<Address> {
        match &self.kind {
            SlotViewKind::Ref { target, .. } => target.map(|t| t.0),
            SlotViewKind::Prim { .. } => None,
        }
    }

    /// The slot's own bytes: the inline value, or the pointer cell (`0` for null)
    pub fn raw_bytes(&self) -> Vec<u8> {
        match &self.kind {
            SlotViewKind::Prim { bytes, .. } => bytes.clone(),
            SlotViewKind::Ref { target, .. } => target.map_or(0, |t| t.0).to_le_bytes().to_vec(),
        }
    }

    /// Decoded value of a primitive slot
    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            SlotViewKind::Prim { value, .. } => Some(value),
            SlotViewKind::Ref { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameView {
    pub id: u32,
    pub name: String,
    pub slots: Vec<SlotView>,
}

/// One heap object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeapEntry {
    pub addr: HexAddr,
    pub kind: &'static str,
    #[serde(rename = "type")]
    pub type_name: String,
    pub length: u32,
    pub mode: Option<ArrayMode>,
    #[serde(rename = "refCount")]
    pub ref_count: u32,
    pub header: ByteRange,
    pub data: Option<ByteRange>,
    #[serde(rename = "headerBytes")]
    pub header_bytes: Vec<u8>,
    #[serde(rename = "dataBytes")]
    pub data_bytes: Vec<u8>,
    pub preview: Preview,
}

/// One byte of the RAM view; `item` indexes [`Snapshot::ram_index`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RamCell {
    pub byte: u8,
    pub item: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RamRow {
    pub addr: HexAddr,
    pub cells: Vec<RamCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RamView {
    pub from: HexAddr,
    pub to: HexAddr,
    pub rows: Vec<RamRow>,
}

/// Projection of the whole engine at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub stack: Vec<FrameView>,
    pub heap: Vec<HeapEntry>,
    pub ram: RamView,
    #[serde(rename = "ramIndex")]
    pub ram_index: Vec<RamItem>,
    pub used: HexAddr,
    pub capacity: u32,
}

impl Snapshot {
    /// Innermost-first lookup of a slot by name
    pub fn slot(&self, name: &str) -> Option<&SlotView> {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.slots.iter().find(|s| s.name == name))
    }

    pub fn heap_entry(&self, addr: Address) -> Option<&HeapEntry> {
        self.heap.iter().find(|e| e.addr.0 == addr)
    }

    /// The owning range that wins display of `addr`
    pub fn resolve(&self, addr: Address) -> Option<&RamItem> {
        ram::resolve(&self.ram_index, addr)
    }

    /// Bytes `[0, ram.to)` as captured by the RAM view (zero before `ram.from`)
    pub fn memory_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; self.ram.to.0 as usize];
        for row in &self.ram.rows {
            let start = row.addr.0 as usize;
            for (i, cell) in row.cells.iter().enumerate() {
                image[start + i] = cell.byte;
            }
        }
        image
    }

    /// Serialize for the renderer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Rough size in bytes, used by [`SnapshotHistory`] budgeting
    pub fn estimated_size(&self) -> usize {
        // Assume ~64 bytes of bookkeeping per slot / entry / index item
        let slots: usize = self.stack.iter().map(|f| f.slots.len()).sum();
        let heap_bytes: usize = self
            .heap
            .iter()
            .map(|e| e.header_bytes.len() + e.data_bytes.len())
            .sum();
        let ram_bytes: usize = self.ram.rows.iter().map(|r| r.cells.len() * 16).sum();

        (slots + self.heap.len() + self.ram_index.len()) * 64 + heap_bytes + ram_bytes
    }
}
