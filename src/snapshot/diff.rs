//! Typed change events between two snapshots
//!
//! Slots are matched by `(frame id, name)` and heap objects by header address.
//! Events come out in a fixed order so the same pair of snapshots always yields
//! the same list:
//!
//! 1. `slot-removed`, in the old snapshot's frame and declaration order
//! 2. `slot-added` / `slot-kind-changed` / `slot-ref-move` / `slot-prim-write`,
//!    in the new snapshot's order
//! 3. `heap-removed`, by ascending address
//! 4. `heap-added` / `heap-ref-count` / `heap-bytes-changed`, by ascending address
//! 5. `alloc-discovered` or `memory-reclaimed`

use super::{ByteRange, HeapEntry, HexAddr, SlotView, SlotViewKind, Snapshot};
use crate::memory::value::Value;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Which part of a heap object changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Header,
    Data,
}

/// One change between two snapshots
///
/// Every event that touches memory carries the new bytes of the region it
/// describes, so [`replay`] can rebuild the later memory image from the earlier
/// one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DiffEvent {
    SlotAdded {
        frame: u32,
        name: String,
        kind: &'static str,
        #[serde(rename = "typeName")]
        type_name: String,
        addr: HexAddr,
        bytes: Vec<u8>,
        target: Option<HexAddr>,
    },
    SlotRemoved {
        frame: u32,
        name: String,
        addr: HexAddr,
    },
    SlotKindChanged {
        frame: u32,
        name: String,
        from: &'static str,
        to: &'static str,
        #[serde(rename = "typeName")]
        type_name: String,
        addr: HexAddr,
        bytes: Vec<u8>,
        target: Option<HexAddr>,
    },
    SlotRefMove {
        frame: u32,
        name: String,
        cell: HexAddr,
        from: Option<HexAddr>,
        to: Option<HexAddr>,
    },
    SlotPrimWrite {
        frame: u32,
        name: String,
        addr: HexAddr,
        before: Vec<u8>,
        after: Vec<u8>,
        #[serde(rename = "oldValue")]
        old_value: Value,
        #[serde(rename = "newValue")]
        new_value: Value,
    },
    HeapAdded {
        addr: HexAddr,
        kind: &'static str,
        #[serde(rename = "typeName")]
        type_name: String,
        header: ByteRange,
        data: Option<ByteRange>,
        #[serde(rename = "headerBytes")]
        header_bytes: Vec<u8>,
        #[serde(rename = "dataBytes")]
        data_bytes: Vec<u8>,
    },
    HeapRemoved {
        addr: HexAddr,
    },
    HeapRefCount {
        addr: HexAddr,
        from: u32,
        to: u32,
    },
    HeapBytesChanged {
        addr: HexAddr,
        region: Region,
        /// Where the new bytes live
        range: ByteRange,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    AllocDiscovered {
        range: ByteRange,
    },
    MemoryReclaimed {
        range: ByteRange,
    },
}

impl DiffEvent {
    /// The serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            DiffEvent::SlotAdded { .. } => "slot-added",
            DiffEvent::SlotRemoved { .. } => "slot-removed",
            DiffEvent::SlotKindChanged { .. } => "slot-kind-changed",
            DiffEvent::SlotRefMove { .. } => "slot-ref-move",
            DiffEvent::SlotPrimWrite { .. } => "slot-prim-write",
            DiffEvent::HeapAdded { .. } => "heap-added",
            DiffEvent::HeapRemoved { .. } => "heap-removed",
            DiffEvent::HeapRefCount { .. } => "heap-ref-count",
            DiffEvent::HeapBytesChanged { .. } => "heap-bytes-changed",
            DiffEvent::AllocDiscovered { .. } => "alloc-discovered",
            DiffEvent::MemoryReclaimed { .. } => "memory-reclaimed",
        }
    }

    /// Write this event's bytes into a memory image indexed by address
    ///
    /// Removals and count changes move no bytes; `memory-reclaimed` zeroes its range.
    pub fn apply(&self, image: &mut Vec<u8>) {
        match self {
            DiffEvent::SlotAdded { addr, bytes, .. }
            | DiffEvent::SlotKindChanged { addr, bytes, .. } => write_at(image, addr.0, bytes),
            DiffEvent::SlotRefMove { cell, to, .. } => {
                write_at(image, cell.0, &to.map_or(0, |t| t.0).to_le_bytes())
            }
            DiffEvent::SlotPrimWrite { addr, after, .. } => write_at(image, addr.0, after),
            DiffEvent::HeapAdded {
                header,
                data,
                header_bytes,
                data_bytes,
                ..
            } => {
                write_at(image, header.from.0, header_bytes);
                if let Some(data) = data {
                    write_at(image, data.from.0, data_bytes);
                }
            }
            DiffEvent::HeapBytesChanged { range, after, .. } => {
                write_at(image, range.from.0, after)
            }
            DiffEvent::MemoryReclaimed { range } => {
                write_at(image, range.from.0, &vec![0; range.size() as usize])
            }
            DiffEvent::SlotRemoved { .. }
            | DiffEvent::HeapRemoved { .. }
            | DiffEvent::HeapRefCount { .. }
            | DiffEvent::AllocDiscovered { .. } => {}
        }
    }
}

fn write_at(image: &mut Vec<u8>, addr: u32, bytes: &[u8]) {
    let start = addr as usize;
    let end = start + bytes.len();
    if image.len() < end {
        image.resize(end, 0);
    }
    image[start..end].copy_from_slice(bytes);
}

/// Apply `events` in order to the memory image of the snapshot they start from
pub fn replay(image: &mut Vec<u8>, events: &[DiffEvent]) {
    for event in events {
        event.apply(image);
    }
}

type SlotKey<'a> = (u32, &'a str);

fn index_slots(snapshot: &Snapshot) -> FxHashMap<SlotKey<'_>, &SlotView> {
    snapshot
        .stack
        .iter()
        .flat_map(|frame| {
            frame
                .slots
                .iter()
                .map(move |slot| ((frame.id, slot.name.as_str()), slot))
        })
        .collect()
}

fn index_heap(snapshot: &Snapshot) -> FxHashMap<u32, &HeapEntry> {
    snapshot.heap.iter().map(|e| (e.addr.0, e)).collect()
}

fn slot_added(frame: u32, slot: &SlotView) -> DiffEvent {
    DiffEvent::SlotAdded {
        frame,
        name: slot.name.clone(),
        kind: slot.kind_name(),
        type_name: slot.type_name.clone(),
        addr: HexAddr(slot.addr()),
        bytes: slot.raw_bytes(),
        target: slot.target().map(HexAddr),
    }
}

fn slot_removed(frame: u32, slot: &SlotView) -> DiffEvent {
    DiffEvent::SlotRemoved {
        frame,
        name: slot.name.clone(),
        addr: HexAddr(slot.addr()),
    }
}

fn heap_added(entry: &HeapEntry) -> DiffEvent {
    DiffEvent::HeapAdded {
        addr: entry.addr,
        kind: entry.kind,
        type_name: entry.type_name.clone(),
        header: entry.header,
        data: entry.data,
        header_bytes: entry.header_bytes.clone(),
        data_bytes: entry.data_bytes.clone(),
    }
}

fn diff_slot(frame: u32, before: &SlotView, after: &SlotView, events: &mut Vec<DiffEvent>) {
    if before.kind_name() != after.kind_name() {
        events.push(DiffEvent::SlotKindChanged {
            frame,
            name: after.name.clone(),
            from: before.kind_name(),
            to: after.kind_name(),
            type_name: after.type_name.clone(),
            addr: HexAddr(after.addr()),
            bytes: after.raw_bytes(),
            target: after.target().map(HexAddr),
        });
        return;
    }
    if before.addr() != after.addr() || before.type_name != after.type_name {
        events.push(slot_removed(frame, before));
        events.push(slot_added(frame, after));
        return;
    }

    match (&before.kind, &after.kind) {
        (
            SlotViewKind::Prim {
                bytes: old_bytes,
                value: old_value,
                ..
            },
            SlotViewKind::Prim {
                bytes: new_bytes,
                value: new_value,
                addr,
                ..
            },
        ) => {
            if old_bytes != new_bytes {
                events.push(DiffEvent::SlotPrimWrite {
                    frame,
                    name: after.name.clone(),
                    addr: *addr,
                    before: old_bytes.clone(),
                    after: new_bytes.clone(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                });
            }
        }
        (
            SlotViewKind::Ref { target: from, .. },
            SlotViewKind::Ref {
                target: to, cell, ..
            },
        ) => {
            if from != to {
                events.push(DiffEvent::SlotRefMove {
                    frame,
                    name: after.name.clone(),
                    cell: *cell,
                    from: *from,
                    to: *to,
                });
            }
        }
        // Kind mismatch handled above
        _ => {}
    }
}

fn diff_heap(before: &HeapEntry, after: &HeapEntry, events: &mut Vec<DiffEvent>) {
    if before.kind != after.kind || before.type_name != after.type_name {
        events.push(DiffEvent::HeapRemoved { addr: before.addr });
        events.push(heap_added(after));
        return;
    }
    if before.ref_count != after.ref_count {
        events.push(DiffEvent::HeapRefCount {
            addr: after.addr,
            from: before.ref_count,
            to: after.ref_count,
        });
    }
    if before.header_bytes != after.header_bytes {
        events.push(DiffEvent::HeapBytesChanged {
            addr: after.addr,
            region: Region::Header,
            range: after.header,
            before: before.header_bytes.clone(),
            after: after.header_bytes.clone(),
        });
    }
    if before.data_bytes != after.data_bytes {
        if let Some(range) = after.data {
            events.push(DiffEvent::HeapBytesChanged {
                addr: after.addr,
                region: Region::Data,
                range,
                before: before.data_bytes.clone(),
                after: after.data_bytes.clone(),
            });
        }
    }
}

/// Compare two snapshots; identical snapshots produce no events
pub fn diff_snapshots(before: &Snapshot, after: &Snapshot) -> Vec<DiffEvent> {
    let mut events = Vec::new();

    let old_slots = index_slots(before);
    let new_slots = index_slots(after);

    for frame in &before.stack {
        for slot in &frame.slots {
            if !new_slots.contains_key(&(frame.id, slot.name.as_str())) {
                events.push(slot_removed(frame.id, slot));
            }
        }
    }
    for frame in &after.stack {
        for slot in &frame.slots {
            match old_slots.get(&(frame.id, slot.name.as_str())) {
                Some(old) => diff_slot(frame.id, old, slot, &mut events),
                None => events.push(slot_added(frame.id, slot)),
            }
        }
    }

    // Heap entries are already in ascending address order
    let old_heap = index_heap(before);
    let new_heap = index_heap(after);

    for entry in &before.heap {
        if !new_heap.contains_key(&entry.addr.0) {
            events.push(DiffEvent::HeapRemoved { addr: entry.addr });
        }
    }
    for entry in &after.heap {
        match old_heap.get(&entry.addr.0) {
            Some(old) => diff_heap(old, entry, &mut events),
            None => events.push(heap_added(entry)),
        }
    }

    let (old_used, new_used) = (before.used.0, after.used.0);
    if new_used > old_used {
        events.push(DiffEvent::AllocDiscovered {
            range: ByteRange::new(old_used, new_used),
        });
    } else if new_used < old_used {
        events.push(DiffEvent::MemoryReclaimed {
            range: ByteRange::new(new_used, old_used),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Declaration, MemoryEngine, RefTarget};
    use crate::memory::value::{PrimType, Value};

    fn names(events: &[DiffEvent]) -> Vec<&'static str> {
        events.iter().map(DiffEvent::name).collect()
    }

    #[test]
    fn test_identical_snapshots_are_quiet() {
        let mut engine = MemoryEngine::default();
        engine.declare(&Declaration::string("s", "hi")).unwrap();
        let a = engine.snapshot().unwrap();
        let b = engine.snapshot().unwrap();
        assert!(diff_snapshots(&a, &b).is_empty());
    }

    #[test]
    fn test_declare_string() {
        let mut engine = MemoryEngine::default();
        let a = engine.snapshot().unwrap();
        engine.declare(&Declaration::string("s", "hi")).unwrap();
        let b = engine.snapshot().unwrap();
        assert_eq!(
            names(&diff_snapshots(&a, &b)),
            vec!["slot-added", "heap-added", "alloc-discovered"]
        );
    }

    #[test]
    fn test_negative_zero_is_a_write() {
        let mut engine = MemoryEngine::default();
        engine
            .declare(&Declaration::prim("d", PrimType::Double, Value::Double(0.0)))
            .unwrap();
        let a = engine.snapshot().unwrap();
        engine.assign_primitive("d", &Value::Double(-0.0)).unwrap();
        let b = engine.snapshot().unwrap();

        let events = diff_snapshots(&a, &b);
        assert_eq!(names(&events), vec!["slot-prim-write"]);
    }

    #[test]
    fn test_prim_write_carries_raw_bytes() {
        let quiet = f64::from_bits(0x7ff8_0000_0000_0001);
        let other = f64::from_bits(0x7ff8_0000_0000_0002);
        let mut engine = MemoryEngine::default();
        engine
            .declare(&Declaration::prim("d", PrimType::Double, Value::Double(quiet)))
            .unwrap();
        let a = engine.snapshot().unwrap();
        engine.assign_primitive("d", &Value::Double(other)).unwrap();
        let b = engine.snapshot().unwrap();

        match &diff_snapshots(&a, &b)[..] {
            [DiffEvent::SlotPrimWrite { before, after, .. }] => {
                assert_eq!(before, &0x7ff8_0000_0000_0001u64.to_le_bytes().to_vec());
                assert_eq!(after, &0x7ff8_0000_0000_0002u64.to_le_bytes().to_vec());
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_slot_added_carries_bytes() {
        let mut engine = MemoryEngine::default();
        let a = engine.snapshot().unwrap();
        engine
            .declare(&Declaration::prim("x", PrimType::Int, Value::Int(7)))
            .unwrap();
        let b = engine.snapshot().unwrap();

        let events = diff_snapshots(&a, &b);
        assert_eq!(
            events[0],
            DiffEvent::SlotAdded {
                frame: 0,
                name: "x".to_string(),
                kind: "prim",
                type_name: "int".to_string(),
                addr: HexAddr(8),
                bytes: vec![7, 0, 0, 0],
                target: None,
            }
        );

        let mut image = a.memory_image();
        replay(&mut image, &events);
        image.resize(b.memory_image().len(), 0);
        assert_eq!(image, b.memory_image());
    }

    #[test]
    fn test_null_out_reference() {
        let mut engine = MemoryEngine::default();
        engine.declare(&Declaration::string("s", "hi")).unwrap();
        let a = engine.snapshot().unwrap();
        let slot = a.slot("s").unwrap();
        let (cell, target) = (slot.addr(), slot.target());
        engine.assign_reference("s", &RefTarget::Null).unwrap();
        let b = engine.snapshot().unwrap();

        let events = diff_snapshots(&a, &b);
        assert_eq!(
            events[0],
            DiffEvent::SlotRefMove {
                frame: 0,
                name: "s".to_string(),
                cell: HexAddr(cell),
                from: target.map(HexAddr),
                to: None,
            }
        );
        assert_eq!(names(&events), vec!["slot-ref-move", "heap-ref-count"]);
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = DiffEvent::HeapRefCount {
            addr: HexAddr(0x1c),
            from: 1,
            to: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"heap-ref-count","addr":"0x0000001c","from":1,"to":0}"#
        );
    }
}
