//! Byte-range index and overlap resolution
//!
//! Every byte a slot or heap object owns is covered by at least one [`RamItem`].
//! Ranges nest: a compact object's header range spans all of its inline fields,
//! and each field also has its own item. When several items cover one address the
//! winner is chosen by [`display_priority`]:
//!
//! 1. an emphasized (selected) item beats one that is not
//! 2. the smaller range beats the larger one
//! 3. a non-header tone beats a header tone
//! 4. the lower start address wins
//!
//! Items that tie on all four keep their insertion order (the sort is stable).

use super::{ByteRange, HexAddr};
use crate::memory::Address;
use serde::Serialize;
use std::cmp::Ordering;

/// Semantic category of a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Header,
    Data,
    Prim,
    Slot,
}

/// Who owns a range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Owner {
    Slot { frame: u32, name: String },
    Heap { addr: HexAddr },
}

/// One labelled, owned byte range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RamItem {
    pub range: ByteRange,
    pub tone: Tone,
    pub label: String,
    pub owner: Owner,
    pub emphasized: bool,
}

impl RamItem {
    pub fn new(range: ByteRange, tone: Tone, label: impl Into<String>, owner: Owner) -> Self {
        RamItem {
            range,
            tone,
            label: label.into(),
            owner,
            emphasized: false,
        }
    }

    pub fn size(&self) -> u32 {
        self.range.size()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.range.contains(addr)
    }
}

/// Comparator deciding which of two overlapping items is displayed (`Less` wins)
pub fn display_priority(a: &RamItem, b: &RamItem) -> Ordering {
    b.emphasized
        .cmp(&a.emphasized)
        .then_with(|| a.size().cmp(&b.size()))
        .then_with(|| (a.tone == Tone::Header).cmp(&(b.tone == Tone::Header)))
        .then_with(|| a.range.from.cmp(&b.range.from))
}

/// Resolve `addr` against an unsorted item list
pub fn resolve(items: &[RamItem], addr: Address) -> Option<&RamItem> {
    let mut hits: Vec<&RamItem> = items.iter().filter(|item| item.contains(addr)).collect();
    hits.sort_by(|a, b| display_priority(a, b));
    hits.into_iter().next()
}

/// Items pre-sorted by display priority, for resolving many addresses at once
#[derive(Debug, Clone)]
pub struct RamIndex<'a> {
    items: &'a [RamItem],
    order: Vec<usize>,
}

impl<'a> RamIndex<'a> {
    pub fn new(items: &'a [RamItem]) -> Self {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| display_priority(&items[a], &items[b]));
        RamIndex { items, order }
    }

    /// Position (in the original list) of the item displayed at `addr`
    ///
    /// The comparator never looks at `addr`, so the first covering item in priority
    /// order is the same winner [`resolve`] picks.
    pub fn resolve_index(&self, addr: Address) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .find(|&i| self.items[i].contains(addr))
    }

    pub fn resolve(&self, addr: Address) -> Option<&'a RamItem> {
        self.resolve_index(addr).map(|i| &self.items[i])
    }
}
