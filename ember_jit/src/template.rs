//! Precompiled template methods.
//!
//! The baseline compiler translates each bytecode by copying a precompiled
//! template into the output buffer. A template carries its own stop records
//! and precomputed reference maps over its private frame slots; when the
//! template is copied, those stops are re-based onto the enclosing method
//! (see [`crate::stops::StopsBuilder::add_template`]).
//!
//! Templates are built once at VM bootstrap and outlive every compilation
//! that references them, so stop records hold plain borrows.

use crate::bits;
use crate::stops::MethodId;

/// A compiled code template with its stop and reference-map metadata.
///
/// Stop ordering within a template is fixed: direct calls first, then
/// indirect calls, then safepoints. `reference_maps` holds one frame map
/// per stop (in stop order) followed by one register map per safepoint.
#[derive(Debug)]
pub struct TemplateMethod {
    /// Code offsets of each stop, in partition order.
    stop_positions: Vec<u32>,
    num_direct_calls: usize,
    num_indirect_calls: usize,
    num_safepoints: usize,
    /// Callee of each direct-call stop.
    direct_callees: Vec<MethodId>,
    /// Which direct calls target the runtime rather than compiled code.
    runtime_calls: Vec<bool>,
    /// Bytes per frame reference map.
    frame_ref_map_size: usize,
    /// Bytes per register reference map.
    register_ref_map_size: usize,
    /// Frame maps for all stops, then register maps for safepoints.
    reference_maps: Vec<u8>,
}

impl TemplateMethod {
    /// Create a template from its stop metadata.
    ///
    /// # Panics
    ///
    /// Panics if the partition counts, callee list, or map sizes are
    /// inconsistent with one another.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stop_positions: Vec<u32>,
        num_direct_calls: usize,
        num_indirect_calls: usize,
        num_safepoints: usize,
        direct_callees: Vec<MethodId>,
        runtime_calls: Vec<bool>,
        frame_ref_map_size: usize,
        register_ref_map_size: usize,
        reference_maps: Vec<u8>,
    ) -> Self {
        let total = num_direct_calls + num_indirect_calls + num_safepoints;
        assert_eq!(stop_positions.len(), total);
        assert_eq!(direct_callees.len(), num_direct_calls);
        assert_eq!(runtime_calls.len(), num_direct_calls);
        let expected = total * frame_ref_map_size + num_safepoints * register_ref_map_size;
        assert_eq!(reference_maps.len(), expected);

        Self {
            stop_positions,
            num_direct_calls,
            num_indirect_calls,
            num_safepoints,
            direct_callees,
            runtime_calls,
            frame_ref_map_size,
            register_ref_map_size,
            reference_maps,
        }
    }

    /// A template with no stops at all (pure arithmetic templates).
    pub fn without_stops() -> Self {
        Self::new(Vec::new(), 0, 0, 0, Vec::new(), Vec::new(), 0, 0, Vec::new())
    }

    /// Number of direct-call stops.
    #[inline]
    pub fn num_direct_calls(&self) -> usize {
        self.num_direct_calls
    }

    /// Number of indirect-call stops.
    #[inline]
    pub fn num_indirect_calls(&self) -> usize {
        self.num_indirect_calls
    }

    /// Number of safepoint stops.
    #[inline]
    pub fn num_safepoints(&self) -> usize {
        self.num_safepoints
    }

    /// Total number of stops.
    #[inline]
    pub fn num_stops(&self) -> usize {
        self.stop_positions.len()
    }

    /// Code offset of the stop at `index` (partition order).
    #[inline]
    pub fn stop_position(&self, index: usize) -> u32 {
        self.stop_positions[index]
    }

    /// Callee of the direct-call stop with the given rank.
    #[inline]
    pub fn direct_callee(&self, direct_rank: usize) -> MethodId {
        self.direct_callees[direct_rank]
    }

    /// Whether the direct-call stop with the given rank calls the runtime.
    #[inline]
    pub fn is_runtime_call(&self, direct_rank: usize) -> bool {
        self.runtime_calls[direct_rank]
    }

    /// Frame reference map of the stop at `index`, or `None` if the
    /// template carries no maps.
    pub fn frame_reference_map(&self, index: usize) -> Option<&[u8]> {
        if self.frame_ref_map_size == 0 {
            return None;
        }
        let offset = index * self.frame_ref_map_size;
        Some(&self.reference_maps[offset..offset + self.frame_ref_map_size])
    }

    /// Register reference map of the safepoint with the given rank.
    pub fn register_reference_map(&self, safepoint_rank: usize) -> Option<&[u8]> {
        if self.register_ref_map_size == 0 {
            return None;
        }
        let base = self.num_stops() * self.frame_ref_map_size;
        let offset = base + safepoint_rank * self.register_ref_map_size;
        Some(&self.reference_maps[offset..offset + self.register_ref_map_size])
    }

    /// True if every reference-map byte is zero.
    pub fn reference_maps_are_clear(&self) -> bool {
        bits::are_clear(&self.reference_maps)
    }
}
