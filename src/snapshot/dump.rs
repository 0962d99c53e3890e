// Plain-text dumps of a snapshot, for debugging and the command-line harness

use super::{SlotViewKind, Snapshot};
use std::fmt::Write;

/// One line per slot, grouped by frame (outermost first)
pub fn dump_stack(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for frame in &snapshot.stack {
        let _ = writeln!(out, "frame {} ({})", frame.id, frame.name);
        if frame.slots.is_empty() {
            let _ = writeln!(out, "  <empty>");
        }
        for slot in &frame.slots {
            match &slot.kind {
                SlotViewKind::Prim { addr, display, .. } => {
                    let _ = writeln!(
                        out,
                        "  {} {} @ {} = {}",
                        slot.type_name, slot.name, addr, display
                    );
                }
                SlotViewKind::Ref {
                    cell,
                    target,
                    preview,
                    ..
                } => {
                    let target = target.map_or_else(|| "null".to_string(), |t| t.to_string());
                    let _ = write!(
                        out,
                        "  {} {} @ {} -> {}",
                        slot.type_name, slot.name, cell, target
                    );
                    if let Some(preview) = preview {
                        let _ = write!(out, " {}", preview.text);
                    }
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// One line per heap object, by ascending address
pub fn dump_heap(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    if snapshot.heap.is_empty() {
        out.push_str("<empty heap>\n");
    }
    for entry in &snapshot.heap {
        let _ = write!(
            out,
            "{} {} len={} refs={} header={}",
            entry.addr, entry.type_name, entry.length, entry.ref_count, entry.header
        );
        if let Some(data) = entry.data {
            let _ = write!(out, " data={}", data);
        }
        if let Some(mode) = entry.mode {
            let _ = write!(out, " mode={}", mode.name());
        }
        let _ = writeln!(out, " {}", entry.preview.text);
    }
    out
}

/// Hex rows of the RAM view; bytes not owned by any item are shown as `..`
pub fn dump_ram(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for row in &snapshot.ram.rows {
        let _ = write!(out, "{}:", row.addr);
        for cell in &row.cells {
            match cell.item {
                Some(_) => {
                    let _ = write!(out, " {:02x}", cell.byte);
                }
                None => out.push_str(" .."),
            }
        }
        out.push('\n');
    }
    let _ = writeln!(out, "used {} of {} bytes", snapshot.used.0, snapshot.capacity);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Declaration, MemoryEngine};
    use crate::memory::value::{PrimType, Value};

    #[test]
    fn test_dumps() {
        let mut engine = MemoryEngine::default();
        engine
            .declare(&Declaration::prim("x", PrimType::Int, Value::Int(7)))
            .unwrap();
        engine.declare(&Declaration::string("s", "hi")).unwrap();
        let snap = engine.snapshot().unwrap();

        let stack = dump_stack(&snap);
        assert!(stack.starts_with("frame 0 (global)\n"));
        assert!(stack.contains("  int x @ 0x00000008 = 7\n"));
        assert!(stack.contains("-> 0x"));
        assert!(stack.contains("\"hi\""));

        let heap = dump_heap(&snap);
        assert!(heap.contains("String len=2 refs=1"));

        let ram = dump_ram(&snap);
        assert!(ram.starts_with("0x00000000: .. .. .. .. .. .. .. .. 07 00 00 00"));
    }
}
