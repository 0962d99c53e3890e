//! Snapshot construction
//!
//! [`build_snapshot`] is a pure projection: it only takes shared borrows of the
//! store, stack and heap and never mutates them. Previews are bounded by
//! [`SnapshotOptions::preview_limit`]; anything cut off is flagged in
//! [`Preview::truncated`], never silently dropped.

use super::ram::{Owner, RamIndex, RamItem, Tone};
use super::{
    ByteRange, FrameView, HeapEntry, HexAddr, Preview, RamCell, RamRow, RamView, SlotView,
    SlotViewKind, Snapshot,
};
use crate::engine::config::EngineConfig;
use crate::engine::errors::{MemoryError, Result};
use crate::memory::heap::{Cell, Heap, HeapKind, HeapObject};
use crate::memory::layout::{decode_prim, prim_size, utf16_len};
use crate::memory::stack::{Slot, SlotKind, Stack};
use crate::memory::store::ByteStore;
use crate::memory::{format_address, Address, NULL};

/// What to include in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub preview_limit: usize,
    pub bytes_per_row: u32,
    /// Start of the RAM view (defaults to 0)
    pub ram_from: Option<Address>,
    /// End of the RAM view (defaults to `used` rounded up to a full row)
    pub ram_to: Option<Address>,
    /// Ranges the renderer has selected; matching items win overlap resolution
    pub emphasized: Vec<(Address, Address)>,
}

impl SnapshotOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        SnapshotOptions {
            preview_limit: config.preview_limit,
            bytes_per_row: config.bytes_per_row,
            ram_from: None,
            ram_to: None,
            emphasized: Vec::new(),
        }
    }

    /// Mark `[from, to)` as selected
    pub fn emphasize(mut self, from: Address, to: Address) -> Self {
        self.emphasized.push((from, to));
        self
    }
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Project the current memory state into a [`Snapshot`]
pub fn build_snapshot(
    store: &ByteStore,
    stack: &Stack,
    heap: &Heap,
    options: &SnapshotOptions,
) -> Result<Snapshot> {
    let mut ram_index = Vec::new();

    let mut frames = Vec::with_capacity(stack.depth());
    for frame in stack.frames() {
        let mut slots = Vec::with_capacity(frame.len());
        for slot in frame.slots() {
            let view = slot_view(store, heap, slot, options.preview_limit)?;
            ram_index.push(slot_item(frame.id, &view));
            slots.push(view);
        }
        frames.push(FrameView {
            id: frame.id,
            name: frame.name.clone(),
            slots,
        });
    }

    let mut entries = Vec::with_capacity(heap.len());
    for obj in heap.objects() {
        entries.push(heap_entry(store, heap, obj, options.preview_limit)?);
        heap_items(store, heap, obj, &mut ram_index)?;
    }

    for item in ram_index.iter_mut() {
        let range = (item.range.from.0, item.range.to.0);
        item.emphasized = options.emphasized.contains(&range);
    }

    let ram = ram_view(store, &ram_index, options);

    Ok(Snapshot {
        stack: frames,
        heap: entries,
        ram,
        ram_index,
        used: HexAddr(store.used()),
        capacity: store.capacity(),
    })
}

fn slot_view(store: &ByteStore, heap: &Heap, slot: &Slot, limit: usize) -> Result<SlotView> {
    let range = ByteRange::new(slot.address(), slot.address() + slot.size());
    let kind = match &slot.kind {
        SlotKind::Primitive { ty, value_addr } => {
            let bytes = store.read_bytes(*value_addr, prim_size(*ty))?.to_vec();
            let value = decode_prim(*ty, &bytes)?;
            SlotViewKind::Prim {
                addr: HexAddr(*value_addr),
                range,
                display: value.to_string(),
                bytes,
                value,
            }
        }
        SlotKind::Reference { cell_addr, .. } => {
            let target = store.read_u32(*cell_addr)?;
            let preview = if target == NULL {
                None
            } else {
                Some(preview(store, heap, target, limit)?)
            };
            SlotViewKind::Ref {
                cell: HexAddr(*cell_addr),
                range,
                target: (target != NULL).then_some(HexAddr(target)),
                preview,
            }
        }
    };
    Ok(SlotView {
        name: slot.name.clone(),
        type_name: slot.type_name(),
        kind,
    })
}

fn slot_item(frame: u32, view: &SlotView) -> RamItem {
    let owner = Owner::Slot {
        frame,
        name: view.name.clone(),
    };
    match &view.kind {
        SlotViewKind::Prim { range, display, .. } => RamItem::new(
            *range,
            Tone::Prim,
            format!("{} {} = {}", view.type_name, view.name, display),
            owner,
        ),
        SlotViewKind::Ref { range, target, .. } => RamItem::new(
            *range,
            Tone::Slot,
            format!(
                "{} {} -> {}",
                view.type_name,
                view.name,
                target.map_or_else(|| "null".to_string(), |t| t.to_string())
            ),
            owner,
        ),
    }
}

fn lookup<'h>(heap: &'h Heap, addr: Address) -> Result<&'h HeapObject> {
    heap.get(addr)
        .ok_or(MemoryError::UnknownObject { address: addr })
}

/// Short text for a pointer found inside a container
fn ref_summary(store: &ByteStore, heap: &Heap, target: Address, limit: usize) -> Result<String> {
    if target == NULL {
        return Ok("null".to_string());
    }
    let obj = lookup(heap, target)?;
    match obj.kind {
        HeapKind::Str => {
            let text = heap.read_string(store, target, Some(limit))?;
            let ellipsis = if obj.length as usize > limit { "…" } else { "" };
            Ok(format!("{:?}{}", text, ellipsis))
        }
        _ => Ok(format!("{}@{}", obj.type_name(), format_address(target))),
    }
}

fn cell_text(store: &ByteStore, heap: &Heap, cell: Cell, limit: usize) -> Result<String> {
    match cell {
        Cell::Prim(value) => Ok(value.to_string()),
        Cell::Ref(target) => ref_summary(store, heap, target, limit),
    }
}

/// Bounded preview of the object at `addr`
pub fn preview(store: &ByteStore, heap: &Heap, addr: Address, limit: usize) -> Result<Preview> {
    let obj = lookup(heap, addr)?;
    let total = obj.length as usize;

    let items = match obj.kind {
        HeapKind::Str => {
            // May stop one unit short of the limit to keep a surrogate pair whole
            let text = heap.read_string(store, addr, Some(limit))?;
            let shown = utf16_len(&text) as usize;
            let truncated = total > shown;
            return Ok(Preview {
                text: format!("{:?}{}", text, if truncated { "…" } else { "" }),
                items: Vec::new(),
                shown,
                total,
                truncated,
            });
        }
        HeapKind::Array { .. } => (0..total.min(limit) as u32)
            .map(|i| cell_text(store, heap, heap.read_element(store, addr, i)?, limit))
            .collect::<Result<Vec<String>>>()?,
        HeapKind::Object { .. } => obj
            .field_layout()
            .iter()
            .take(limit)
            .map(|field| -> Result<String> {
                let cell = heap.read_field(store, addr, field)?;
                Ok(format!("{}: {}", field.key, cell_text(store, heap, cell, limit)?))
            })
            .collect::<Result<Vec<String>>>()?,
    };

    let shown = items.len();
    let truncated = total > shown;
    let mut parts = items.clone();
    if truncated {
        parts.push("…".to_string());
    }

    Ok(Preview {
        text: format!("{{{}}}", parts.join(", ")),
        items,
        shown,
        total,
        truncated,
    })
}

fn heap_entry(
    store: &ByteStore,
    heap: &Heap,
    obj: &HeapObject,
    limit: usize,
) -> Result<HeapEntry> {
    let (header_from, header_to) = obj.header_range();
    let header_bytes = store
        .read_bytes(header_from, header_to - header_from)?
        .to_vec();
    let data_bytes = match obj.data_range() {
        Some((from, to)) => store.read_bytes(from, to - from)?.to_vec(),
        None => Vec::new(),
    };

    Ok(HeapEntry {
        addr: HexAddr(obj.address),
        kind: obj.kind_name(),
        type_name: obj.type_name(),
        length: obj.length,
        mode: obj.mode(),
        ref_count: obj.ref_count,
        header: obj.header_range().into(),
        data: obj.data_range().map(ByteRange::from),
        header_bytes,
        data_bytes,
        preview: preview(store, heap, obj.address, limit)?,
    })
}

fn heap_items(
    store: &ByteStore,
    heap: &Heap,
    obj: &HeapObject,
    items: &mut Vec<RamItem>,
) -> Result<()> {
    let owner = Owner::Heap {
        addr: HexAddr(obj.address),
    };
    let type_name = obj.type_name();

    items.push(RamItem::new(
        obj.header_range().into(),
        Tone::Header,
        format!("{} header (length {})", type_name, obj.length),
        owner.clone(),
    ));

    if let Some(range) = obj.data_range() {
        let label = match obj.mode() {
            Some(mode) => format!("{} data ({})", type_name, mode.name()),
            None => format!("{} data", type_name),
        };
        items.push(RamItem::new(range.into(), Tone::Data, label, owner.clone()));
    }

    for field in obj.field_layout() {
        let from = obj.address + field.offset;
        let cell = heap.read_field(store, obj.address, &field)?;
        let (tone, label) = match cell {
            Cell::Prim(value) => (
                Tone::Prim,
                format!("field {}: {} = {}", field.key, field.ty, value),
            ),
            Cell::Ref(target) => (
                Tone::Slot,
                format!(
                    "field {}: {} -> {}",
                    field.key,
                    field.ty,
                    if target == NULL {
                        "null".to_string()
                    } else {
                        format_address(target)
                    }
                ),
            ),
        };
        items.push(RamItem::new(
            ByteRange::new(from, from + field.size),
            tone,
            label,
            owner.clone(),
        ));
    }
    Ok(())
}

fn ram_view(store: &ByteStore, items: &[RamItem], options: &SnapshotOptions) -> RamView {
    let row = options.bytes_per_row.max(1);
    let default_to = store.used().div_ceil(row).saturating_mul(row);
    let dump = store.dump_range(
        options.ram_from.unwrap_or(0),
        options.ram_to.unwrap_or(default_to),
    );
    let index = RamIndex::new(items);

    let rows = dump
        .bytes
        .chunks(row as usize)
        .enumerate()
        .map(|(i, chunk)| {
            let start = dump.from + i as u32 * row;
            RamRow {
                addr: HexAddr(start),
                cells: chunk
                    .iter()
                    .enumerate()
                    .map(|(j, &byte)| RamCell {
                        byte,
                        item: index.resolve_index(start + j as u32),
                    })
                    .collect(),
            }
        })
        .collect();

    RamView {
        from: HexAddr(dump.from),
        to: HexAddr(dump.to),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Declaration, MemoryEngine};
    use crate::memory::value::{FieldDef, MemType, PrimType, Value};

    #[test]
    fn test_string_preview_truncation() {
        let mut engine = MemoryEngine::default();
        engine.declare(&Declaration::string("s", "abcdef")).unwrap();
        let options = SnapshotOptions {
            preview_limit: 3,
            ..SnapshotOptions::default()
        };
        let snap = engine.snapshot_with(&options).unwrap();
        let entry = &snap.heap[0];
        assert_eq!(entry.preview.text, "\"abc\"…");
        assert!(entry.preview.truncated);
        assert_eq!(entry.preview.shown, 3);
        assert_eq!(entry.preview.total, 6);
    }

    #[test]
    fn test_string_preview_does_not_split_surrogate_pair() {
        let mut engine = MemoryEngine::default();
        engine
            .declare(&Declaration::string("s", "ab\u{1F600}"))
            .unwrap();
        let options = SnapshotOptions {
            preview_limit: 3,
            ..SnapshotOptions::default()
        };
        let snap = engine.snapshot_with(&options).unwrap();
        let preview = &snap.heap[0].preview;
        assert_eq!(preview.text, "\"ab\"…");
        assert!(!preview.text.contains('\u{FFFD}'));
        assert_eq!(preview.shown, 2);
        assert_eq!(preview.total, 4);
        assert!(preview.truncated);
    }

    #[test]
    fn test_array_preview_not_truncated_at_limit() {
        let mut engine = MemoryEngine::default();
        let shape = MemType::array_of(MemType::prim(PrimType::Int));
        let value = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        engine.declare(&Declaration::new("a", shape, value)).unwrap();
        let options = SnapshotOptions {
            preview_limit: 2,
            ..SnapshotOptions::default()
        };
        let snap = engine.snapshot_with(&options).unwrap();
        assert_eq!(snap.heap[0].preview.text, "{1, 2}");
        assert!(!snap.heap[0].preview.truncated);
    }

    #[test]
    fn test_object_field_wins_over_header() {
        let mut engine = MemoryEngine::default();
        let shape = MemType::object(vec![
            FieldDef::new("x", MemType::prim(PrimType::Int)),
            FieldDef::new("y", MemType::prim(PrimType::Int)),
        ]);
        let value = Value::Object(vec![
            ("x".to_string(), Value::Int(3)),
            ("y".to_string(), Value::Int(4)),
        ]);
        engine.declare(&Declaration::new("p", shape, value)).unwrap();
        let snap = engine.snapshot().unwrap();

        let obj = snap.heap[0].addr.0;
        assert_eq!(snap.resolve(obj).unwrap().tone, Tone::Header);
        assert_eq!(snap.resolve(obj + 4).unwrap().label, "field x: int = 3");
        assert_eq!(snap.resolve(obj + 9).unwrap().label, "field y: int = 4");

        let emphasized = SnapshotOptions::default().emphasize(obj, obj + 12);
        let snap = engine.snapshot_with(&emphasized).unwrap();
        assert_eq!(snap.resolve(obj + 4).unwrap().tone, Tone::Header);
    }

    #[test]
    fn test_ram_rows_cover_used() {
        let mut engine = MemoryEngine::default();
        engine
            .declare(&Declaration::prim("x", PrimType::Int, Value::Int(0x0102_0304)))
            .unwrap();
        let snap = engine.snapshot().unwrap();
        assert_eq!(snap.ram.from, HexAddr(0));
        assert_eq!(snap.ram.to, HexAddr(16));
        assert_eq!(snap.ram.rows.len(), 1);

        let cells = &snap.ram.rows[0].cells;
        assert_eq!(cells[8].byte, 0x04);
        assert_eq!(cells[11].byte, 0x01);
        let item = cells[8].item.unwrap();
        assert_eq!(snap.ram_index[item].label, "int x = 16909060");
        assert_eq!(cells[0].item, None);
        assert_eq!(cells[12].item, None);
    }
}
