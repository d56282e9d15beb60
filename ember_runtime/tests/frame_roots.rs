//! End-to-end: the JIT's packed reference maps drive GC root discovery
//! for a suspended compiled frame.
//!
//! The pipeline under test is the full compile-time-to-GC-time chain:
//! stops are recorded and packed, the reference-map editor computes the
//! flow-sensitive bits, a frame anchored on those maps feeds its live
//! slots to the collector, and the collector moves exactly the objects
//! the maps call live, updating the frame's slots in place.

mod common;

use std::sync::Arc;

use common::{alloc_object, RuntimeObjectModel};
use ember_gc::{GcConfig, GenerationalHeap};
use ember_jit::bytecode::{CallReturn, Instr, MethodCode};
use ember_jit::frame_layout::BaselineFrameLayout;
use ember_jit::refmap::RefMapEditor;
use ember_jit::stops::{MethodId, Stop, StopsBuilder};
use ember_runtime::{CompiledFrameScanner, FrameAnchor};

/// Compile-time half: a method with two reference locals live across a
/// call, packed and edited.
fn build_stops() -> Arc<ember_jit::stops::Stops> {
    // Locals: 0 = ref parameter, 1 = word parameter, 2 = ref scratch.
    // 0: load local 0
    // 1: store local 2
    // 2: call(args=0)        <- the frame suspends here
    // 3: return
    let code = MethodCode {
        code: vec![
            Instr::LoadLocal(0),
            Instr::StoreLocal(2),
            Instr::Call {
                args: 0,
                returns: CallReturn::Void,
            },
            Instr::Return,
        ],
        max_locals: 3,
        max_stack: 1,
        param_refs: vec![true, false],
    };
    let layout = BaselineFrameLayout::new(3, 1, 0);

    let mut builder = StopsBuilder::new(code.code.len());
    builder.add(Stop::BytecodeDirectCall {
        position: 0x20,
        bytecode_position: 2,
        callee: MethodId(17),
    });
    let mut stops = builder.pack(
        layout.frame_reference_map_size(),
        0,
        layout.first_template_slot(),
    );
    RefMapEditor::new(&mut stops, &code, &layout, None).fill_in_maps();
    Arc::new(stops)
}

#[test]
fn test_reference_maps_feed_root_scanning() {
    let stops = build_stops();

    let mut heap = GenerationalHeap::new(GcConfig::small(), Box::new(RuntimeObjectModel));

    // Runtime half: a frame suspended at the call, its slot array laid
    // out as [local0, local1, local2, stack0].
    let object_a = alloc_object(&heap, &[], 1);
    let object_b = alloc_object(&heap, &[], 2);
    let garbage = alloc_object(&heap, &[], 3);

    let mut frame_slots = [object_a, 0xDEAD_BEEF, object_b, 0];
    let mut scanner = CompiledFrameScanner::new();
    scanner.push_frame(FrameAnchor {
        stops: stops.clone(),
        stop_index: 0,
        slot_base: frame_slots.as_mut_ptr() as usize,
    });
    assert_eq!(scanner.frame_count(), 1);
    heap.set_root_scanner(Box::new(scanner));

    heap.collect(0).expect("collect");

    // The two reference locals were treated as roots: their objects
    // moved and the frame slots now hold the new addresses.
    assert!(heap.to_space().contains(frame_slots[0]));
    assert!(heap.to_space().contains(frame_slots[2]));
    assert_ne!(frame_slots[0], object_a);
    assert_ne!(frame_slots[2], object_b);

    // The word local was not interpreted as a reference, and the
    // unreferenced object was not kept alive.
    assert_eq!(frame_slots[1], 0xDEAD_BEEF);
    assert_eq!(heap.stats().objects_copied, 2);
    assert!(!heap.eden().contains(garbage));
}
