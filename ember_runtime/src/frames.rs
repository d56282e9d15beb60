//! Compiled-frame root scanning.
//!
//! A suspended compiled method is described by its packed [`Stops`] and
//! the stop index where it parked; the stop's frame reference map says
//! exactly which slots of the frame hold live references. This scanner
//! turns those bits into root slots for the collector: the bridge
//! between the JIT's compile-time bookkeeping and GC-time root
//! discovery.
//!
//! Walking actual native stacks (locating frame bases, return
//! addresses) belongs to the platform stack walker; this module only
//! needs each frame's slot base and stop index from it.

use std::sync::Arc;

use ember_gc::{RootScanner, SlotVisitor};
use ember_jit::bits;
use ember_jit::stops::Stops;

const WORD: usize = std::mem::size_of::<usize>();

/// One suspended compiled frame.
pub struct FrameAnchor {
    /// The stop metadata of the frame's method.
    pub stops: Arc<Stops>,
    /// The stop the method is suspended at.
    pub stop_index: usize,
    /// Address of the frame slot that reference-map bit 0 describes.
    pub slot_base: usize,
}

impl FrameAnchor {
    /// Addresses of the frame's live reference slots.
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        bits::iter_set(self.stops.frame_reference_map(self.stop_index))
            .map(|bit| self.slot_base + bit * WORD)
    }
}

/// Root scanner over a set of suspended compiled frames.
///
/// All mutator threads are parked at safepoints before the collector
/// runs, so the anchors are stable for the duration of a scan.
#[derive(Default)]
pub struct CompiledFrameScanner {
    frames: Vec<FrameAnchor>,
}

impl CompiledFrameScanner {
    /// An empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a suspended frame.
    pub fn push_frame(&mut self, anchor: FrameAnchor) {
        assert!(anchor.stop_index < anchor.stops.len());
        self.frames.push(anchor);
    }

    /// Number of recorded frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl RootScanner for CompiledFrameScanner {
    fn scan(&mut self, visitor: &mut dyn SlotVisitor) {
        for frame in &self.frames {
            for slot in frame.live_slots() {
                visitor.visit_slot(slot);
            }
        }
    }
}
