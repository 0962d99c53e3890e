// Diff engine tests over multi-step sessions

use memviz::engine::{Declaration, MemoryEngine, RefTarget};
use memviz::memory::value::FieldDef;
use memviz::memory::value::{MemType, PrimType, Value};
use memviz::script::{parse_script, run_script};
use memviz::snapshot::diff::replay;
use memviz::snapshot::{diff_snapshots, DiffEvent, Snapshot};

fn slot_mentioned(events: &[DiffEvent], frame_id: u32, slot: &str) -> bool {
    events.iter().any(|e| match e {
        DiffEvent::SlotAdded { frame, name, .. }
        | DiffEvent::SlotRemoved { frame, name, .. }
        | DiffEvent::SlotKindChanged { frame, name, .. }
        | DiffEvent::SlotRefMove { frame, name, .. }
        | DiffEvent::SlotPrimWrite { frame, name, .. } => *frame == frame_id && name == slot,
        _ => false,
    })
}

fn heap_mentioned(events: &[DiffEvent], target: u32) -> bool {
    events.iter().any(|e| match e {
        DiffEvent::HeapAdded { addr, .. }
        | DiffEvent::HeapRemoved { addr }
        | DiffEvent::HeapRefCount { addr, .. }
        | DiffEvent::HeapBytesChanged { addr, .. } => addr.0 == target,
        _ => false,
    })
}

/// Every slot or heap entry that differs between the snapshots has an event
fn assert_complete(before: &Snapshot, after: &Snapshot) {
    let events = diff_snapshots(before, after);
    for frame in &after.stack {
        for slot in &frame.slots {
            let old = before
                .stack
                .iter()
                .find(|f| f.id == frame.id)
                .and_then(|f| f.slots.iter().find(|s| s.name == slot.name));
            let same = old.is_some_and(|old| {
                old.kind == slot.kind && old.type_name == slot.type_name
            });
            if !same {
                assert!(slot_mentioned(&events, frame.id, &slot.name), "{}", slot.name);
            }
        }
    }
    for entry in &after.heap {
        let old = before.heap_entry(entry.addr.0);
        let same = old.is_some_and(|old| {
            old.ref_count == entry.ref_count
                && old.header_bytes == entry.header_bytes
                && old.data_bytes == entry.data_bytes
        });
        if !same {
            assert!(heap_mentioned(&events, entry.addr.0), "{}", entry.addr);
        }
    }
    for entry in &before.heap {
        if after.heap_entry(entry.addr.0).is_none() {
            assert!(heap_mentioned(&events, entry.addr.0), "{}", entry.addr);
        }
    }
    if before == after {
        assert!(events.is_empty());
    }
}

#[test]
fn test_completeness_across_session() {
    let mut engine = MemoryEngine::default();
    let mut snapshots = vec![engine.snapshot().unwrap()];

    engine
        .declare(&Declaration::prim("n", PrimType::Long, Value::Long(5)))
        .unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.declare(&Declaration::string("s", "one")).unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine
        .declare(&Declaration::new(
            "xs",
            MemType::array_of(MemType::prim(PrimType::String)),
            Value::Array(vec![Value::Str("a".to_string())]),
        ))
        .unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.enter_frame("f");
    engine.declare(&Declaration::string("s", "inner")).unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.assign_reference("s", &RefTarget::Null).unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.leave_frame().unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.assign_value("n", &Value::Long(-5)).unwrap();
    snapshots.push(engine.snapshot().unwrap());
    engine.reset();
    snapshots.push(engine.snapshot().unwrap());

    for pair in snapshots.windows(2) {
        assert_complete(&pair[0], &pair[1]);
        assert_complete(&pair[1], &pair[0]);
    }
    for snapshot in &snapshots {
        assert!(diff_snapshots(snapshot, snapshot).is_empty());
    }
}

#[test]
fn test_positive_and_negative_zero_differ() {
    let mut engine = MemoryEngine::default();
    engine
        .declare(&Declaration::prim("f", PrimType::Float, Value::Float(0.0)))
        .unwrap();
    let before = engine.snapshot().unwrap();
    engine.assign_primitive("f", &Value::Float(-0.0)).unwrap();
    let after = engine.snapshot().unwrap();

    let events = diff_snapshots(&before, &after);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DiffEvent::SlotPrimWrite {
            name,
            before,
            after,
            old_value,
            new_value,
            ..
        } => {
            assert_eq!(name, "f");
            assert_eq!(before, &vec![0, 0, 0, 0]);
            assert_eq!(after, &vec![0, 0, 0, 0x80]);
            assert!(old_value.same_bits(&Value::Float(0.0)));
            assert!(new_value.same_bits(&Value::Float(-0.0)));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_same_value_write_is_quiet() {
    let mut engine = MemoryEngine::default();
    engine
        .declare(&Declaration::prim("x", PrimType::Int, Value::Int(3)))
        .unwrap();
    let before = engine.snapshot().unwrap();
    engine.assign_primitive("x", &Value::Int(3)).unwrap();
    let after = engine.snapshot().unwrap();
    assert!(diff_snapshots(&before, &after).is_empty());
}

#[test]
fn test_reset_reports_removal() {
    let mut engine = MemoryEngine::default();
    engine.declare(&Declaration::string("s", "gone")).unwrap();
    let before = engine.snapshot().unwrap();
    engine.reset();
    let after = engine.snapshot().unwrap();

    let names: Vec<&str> = diff_snapshots(&before, &after)
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(names, vec!["slot-removed", "heap-removed", "memory-reclaimed"]);
}

#[test]
fn test_script_steps_carry_ref_moves() {
    let script = r#"[
        {"op": "declare", "name": "a",
         "shape": {"kind": "prim", "of": "string"}, "value": {"string": "x"}},
        {"op": "declare", "name": "b",
         "shape": {"kind": "prim", "of": "string"}, "value": {"string": "y"}},
        {"op": "point", "name": "b", "target": {"slot": "a"}},
        {"op": "assign", "name": "a", "value": {"string": "z"}}
    ]"#;
    let commands = parse_script(script).unwrap();
    let mut engine = MemoryEngine::default();
    let (steps, history) = run_script(&mut engine, &commands).unwrap();

    assert_eq!(history.len(), 5);
    assert!(steps.iter().all(|s| s.error.is_none()));
    let moves: Vec<&str> = steps[2].events.iter().map(|e| e.name()).collect();
    assert_eq!(moves, vec!["slot-ref-move", "heap-ref-count", "heap-ref-count"]);
    assert!(steps[3]
        .events
        .iter()
        .any(|e| matches!(e, DiffEvent::HeapAdded { .. })));
    assert_eq!(
        engine.read_variable("b").unwrap(),
        Value::Str("x".to_string())
    );
}

/// Replaying the events onto the earlier memory image rebuilds the later one
fn assert_replays(before: &Snapshot, after: &Snapshot) {
    let events = diff_snapshots(before, after);
    let mut image = before.memory_image();
    replay(&mut image, &events);

    let mut expected = after.memory_image();
    let len = image.len().max(expected.len());
    image.resize(len, 0);
    expected.resize(len, 0);
    assert_eq!(image, expected, "events: {:?}", events);
}

#[test]
fn test_replay_rebuilds_memory() {
    let mut engine = MemoryEngine::default();
    let mut snapshots = vec![engine.snapshot().unwrap()];

    let nan = f64::from_bits(0x7ff8_0000_0000_0001);
    engine
        .declare(&Declaration::prim("d", PrimType::Double, Value::Double(nan)))
        .unwrap();
    engine
        .declare(&Declaration::prim("v", PrimType::Int, Value::Int(-1)))
        .unwrap();
    snapshots.push(engine.snapshot().unwrap());

    // Same NaN class, different payload
    let other_nan = f64::from_bits(0x7ff8_0000_0000_0002);
    engine
        .assign_primitive("d", &Value::Double(other_nan))
        .unwrap();
    snapshots.push(engine.snapshot().unwrap());

    let shape = MemType::object(vec![
        FieldDef::new("id", MemType::prim(PrimType::Short)),
        FieldDef::new("tags", MemType::array_of(MemType::prim(PrimType::String))),
    ]);
    let value = Value::Object(vec![
        ("id".to_string(), Value::Short(3)),
        (
            "tags".to_string(),
            Value::Array(vec![Value::Str("p".to_string()), Value::Null]),
        ),
    ]);
    engine.declare(&Declaration::new("obj", shape, value)).unwrap();
    engine.declare(&Declaration::string("s", "first")).unwrap();
    snapshots.push(engine.snapshot().unwrap());

    engine
        .assign_value("s", &Value::Str("second".to_string()))
        .unwrap();
    engine.assign_reference("s", &RefTarget::Null).unwrap();
    snapshots.push(engine.snapshot().unwrap());

    // `v` comes back as a reference at a different address after the reset
    engine.reset();
    engine.declare(&Declaration::string("v", "ref now")).unwrap();
    engine
        .declare(&Declaration::prim("d", PrimType::Double, Value::Double(0.5)))
        .unwrap();
    snapshots.push(engine.snapshot().unwrap());

    engine.reset();
    snapshots.push(engine.snapshot().unwrap());

    let kind_change = diff_snapshots(&snapshots[4], &snapshots[5]);
    assert!(kind_change.iter().any(|e| matches!(
        e,
        DiffEvent::SlotKindChanged { name, from: "prim", to: "ref", .. } if name == "v"
    )));

    for before in &snapshots {
        for after in &snapshots {
            assert_replays(before, after);
        }
    }
}

#[test]
fn test_nan_payload_survives_serialization_as_bytes() {
    let mut engine = MemoryEngine::default();
    let first = f64::from_bits(0x7ff8_0000_0000_0001);
    engine
        .declare(&Declaration::prim("d", PrimType::Double, Value::Double(first)))
        .unwrap();
    let before = engine.snapshot().unwrap();
    let second = f64::from_bits(0x7ff8_0000_0000_0002);
    engine
        .assign_primitive("d", &Value::Double(second))
        .unwrap();
    let after = engine.snapshot().unwrap();

    let events = diff_snapshots(&before, &after);
    let json: serde_json::Value = serde_json::to_value(&events).unwrap();
    assert_eq!(json[0]["type"], "slot-prim-write");
    assert_eq!(json[0]["before"][0], 1);
    assert_eq!(json[0]["after"][0], 2);
}
