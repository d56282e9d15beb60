//! Stop records and packed per-method reference maps.
//!
//! A *stop* is a position in compiled code at which the set of live object
//! references is precisely known: direct calls, indirect calls, and
//! safepoints. The compiler appends stops to a [`StopsBuilder`] as it
//! translates each bytecode, then finalizes them once with
//! [`StopsBuilder::pack`], producing an immutable [`Stops`] owned by the
//! compiled method.
//!
//! # Index assignment
//!
//! Packing assigns every stop a stable index, partitioned by kind: direct
//! calls occupy `[0, d)`, indirect calls `[d, d + i)`, safepoints the rest.
//! Within a partition, stops keep their insertion order. The partitioning
//! makes reference-map addressing uniform:
//!
//! ```text
//! frame map of stop s      = reference_maps[s * frame_map_size ..]
//! register map of safepoint r
//!                          = reference_maps[n * frame_map_size
//!                                           + r * register_map_size ..]
//! ```
//!
//! # Construction lineages
//!
//! Template-copied stops inherit their maps from the template's
//! precomputed maps (frame bits shifted to the template slot area of the
//! enclosing frame). Bytecode-inserted stops (direct calls for invokes,
//! safepoints for backward branches) start with all-zero maps; the
//! flow-sensitive bits are filled in afterwards by
//! [`crate::refmap::RefMapEditor`].

use crate::bits;
use crate::template::TemplateMethod;

/// Identifies a callee method in the compilation unit's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// The three kinds of stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// A call whose target is known at compile time.
    DirectCall,
    /// A call through a dispatch table or function pointer.
    IndirectCall,
    /// A point where a mutator can be suspended (backward branches).
    Safepoint,
}

/// A raw stop recorded during translation.
///
/// Template-sourced variants borrow the template they were expanded from;
/// templates are owned by the VM bootstrap and outlive every compilation.
#[derive(Debug, Clone, Copy)]
pub enum Stop<'t> {
    /// Direct call copied from a template.
    TemplateDirectCall {
        /// Offset of the call in the method's code buffer.
        position: u32,
        /// Position of the originating bytecode.
        bytecode_position: u32,
        /// The template this stop was expanded from.
        template: &'t TemplateMethod,
        /// Rank of this call among the template's direct calls.
        rank: usize,
    },
    /// Indirect call copied from a template.
    TemplateIndirectCall {
        /// Offset of the call in the method's code buffer.
        position: u32,
        /// Position of the originating bytecode.
        bytecode_position: u32,
        /// The template this stop was expanded from.
        template: &'t TemplateMethod,
        /// Rank of this call among the template's indirect calls.
        rank: usize,
    },
    /// Safepoint copied from a template.
    TemplateSafepoint {
        /// Offset of the safepoint in the method's code buffer.
        position: u32,
        /// Position of the originating bytecode.
        bytecode_position: u32,
        /// The template this stop was expanded from.
        template: &'t TemplateMethod,
        /// Rank of this safepoint among the template's safepoints.
        rank: usize,
    },
    /// Direct call emitted for an invoke bytecode, not via a template.
    BytecodeDirectCall {
        /// Offset of the call in the method's code buffer.
        position: u32,
        /// Position of the invoke bytecode.
        bytecode_position: u32,
        /// The resolved callee.
        callee: MethodId,
    },
    /// Safepoint emitted for a backward branch.
    BytecodeSafepoint {
        /// Offset of the safepoint in the method's code buffer.
        position: u32,
        /// Position of the branch bytecode.
        bytecode_position: u32,
    },
}

impl<'t> Stop<'t> {
    /// The stop's kind.
    #[inline]
    pub fn kind(&self) -> StopKind {
        match self {
            Stop::TemplateDirectCall { .. } | Stop::BytecodeDirectCall { .. } => {
                StopKind::DirectCall
            }
            Stop::TemplateIndirectCall { .. } => StopKind::IndirectCall,
            Stop::TemplateSafepoint { .. } | Stop::BytecodeSafepoint { .. } => StopKind::Safepoint,
        }
    }

    /// Offset of the stop in the method's code buffer.
    #[inline]
    pub fn position(&self) -> u32 {
        match *self {
            Stop::TemplateDirectCall { position, .. }
            | Stop::TemplateIndirectCall { position, .. }
            | Stop::TemplateSafepoint { position, .. }
            | Stop::BytecodeDirectCall { position, .. }
            | Stop::BytecodeSafepoint { position, .. } => position,
        }
    }

    /// Position of the bytecode this stop belongs to.
    #[inline]
    pub fn bytecode_position(&self) -> u32 {
        match *self {
            Stop::TemplateDirectCall {
                bytecode_position, ..
            }
            | Stop::TemplateIndirectCall {
                bytecode_position, ..
            }
            | Stop::TemplateSafepoint {
                bytecode_position, ..
            }
            | Stop::BytecodeDirectCall {
                bytecode_position, ..
            }
            | Stop::BytecodeSafepoint {
                bytecode_position, ..
            } => bytecode_position,
        }
    }

    /// Whether this is a direct call into the runtime.
    ///
    /// Runtime calls pop their own parameters before the stop's logical
    /// position, which changes how operand-stack reference bits are
    /// assigned (see [`crate::refmap`]).
    #[inline]
    pub fn is_direct_runtime_call(&self) -> bool {
        match *self {
            Stop::TemplateDirectCall { template, rank, .. } => template.is_runtime_call(rank),
            _ => false,
        }
    }

    /// The callee, for direct-call stops.
    #[inline]
    pub fn callee(&self) -> Option<MethodId> {
        match *self {
            Stop::TemplateDirectCall { template, rank, .. } => Some(template.direct_callee(rank)),
            Stop::BytecodeDirectCall { callee, .. } => Some(callee),
            _ => None,
        }
    }
}

// =============================================================================
// StopsBuilder
// =============================================================================

/// Accumulates stops during translation of a single method.
#[derive(Default)]
pub struct StopsBuilder<'t> {
    stops: Vec<Stop<'t>>,
    num_direct_calls: usize,
    num_indirect_calls: usize,
    num_safepoints: usize,
    last_bytecode_position: u32,
}

impl<'t> StopsBuilder<'t> {
    /// Create a builder, sized for a method with `code_length` bytecodes.
    pub fn new(code_length: usize) -> Self {
        Self {
            // Most methods average well under one stop per four bytecodes.
            stops: Vec::with_capacity(code_length / 4 + 1),
            num_direct_calls: 0,
            num_indirect_calls: 0,
            num_safepoints: 0,
            last_bytecode_position: 0,
        }
    }

    /// Append one stop.
    ///
    /// # Panics
    ///
    /// Panics if `stop`'s bytecode position is less than that of the
    /// previously added stop; the translator visits bytecodes in order, so
    /// out-of-order stops indicate a compiler bug.
    pub fn add(&mut self, stop: Stop<'t>) {
        assert!(
            stop.bytecode_position() >= self.last_bytecode_position,
            "stops must be added in bytecode order: {} after {}",
            stop.bytecode_position(),
            self.last_bytecode_position,
        );
        self.last_bytecode_position = stop.bytecode_position();
        match stop.kind() {
            StopKind::DirectCall => self.num_direct_calls += 1,
            StopKind::IndirectCall => self.num_indirect_calls += 1,
            StopKind::Safepoint => self.num_safepoints += 1,
        }
        self.stops.push(stop);
    }

    /// Expand a copied template into its constituent stops.
    ///
    /// Each of the template's stops is re-based by `target_code_position`
    /// (where the template was copied into the code buffer) and recorded
    /// against `bytecode_position`. Expansion order is fixed: direct
    /// calls, then indirect calls, then safepoints.
    pub fn add_template(
        &mut self,
        template: &'t TemplateMethod,
        target_code_position: u32,
        bytecode_position: u32,
    ) {
        let d = template.num_direct_calls();
        let i = template.num_indirect_calls();
        for rank in 0..d {
            self.add(Stop::TemplateDirectCall {
                position: target_code_position + template.stop_position(rank),
                bytecode_position,
                template,
                rank,
            });
        }
        for rank in 0..i {
            self.add(Stop::TemplateIndirectCall {
                position: target_code_position + template.stop_position(d + rank),
                bytecode_position,
                template,
                rank,
            });
        }
        for rank in 0..template.num_safepoints() {
            self.add(Stop::TemplateSafepoint {
                position: target_code_position + template.stop_position(d + i + rank),
                bytecode_position,
                template,
                rank,
            });
        }
    }

    /// Number of stops added so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.stops.len()
    }

    /// Check if no stops have been added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Finalize into an immutable [`Stops`].
    ///
    /// * `frame_ref_map_size`: bytes per frame reference map.
    /// * `register_ref_map_size`: bytes per register reference map.
    /// * `first_template_slot`: bit index in the enclosing frame map where
    ///   the template slot area begins; template frame-map bits are shifted
    ///   by this amount when copied.
    pub fn pack(
        self,
        frame_ref_map_size: usize,
        register_ref_map_size: usize,
        first_template_slot: usize,
    ) -> Stops {
        let n = self.stops.len();
        let n_direct = self.num_direct_calls;
        let n_indirect = self.num_indirect_calls;
        let n_safepoints = self.num_safepoints;

        let mut stop_positions = vec![0u32; n];
        let mut direct_callees = vec![MethodId(0); n_direct];
        let mut runtime_call_flags = vec![0u8; bits::byte_length(n_direct)];
        let mut reference_maps =
            vec![0u8; n * frame_ref_map_size + n_safepoints * register_ref_map_size];
        let mut table = Vec::with_capacity(n + 16);

        let mut direct_seen = 0;
        let mut indirect_seen = 0;
        let mut safepoints_seen = 0;
        let mut current_bytecode_position = None;

        for stop in &self.stops {
            // Partitioned, stable index assignment.
            let (index, safepoint_rank) = match stop.kind() {
                StopKind::DirectCall => {
                    let index = direct_seen;
                    direct_seen += 1;
                    (index, None)
                }
                StopKind::IndirectCall => {
                    let index = n_direct + indirect_seen;
                    indirect_seen += 1;
                    (index, None)
                }
                StopKind::Safepoint => {
                    let index = n_direct + n_indirect + safepoints_seen;
                    safepoints_seen += 1;
                    (index, Some(safepoints_seen - 1))
                }
            };

            stop_positions[index] = stop.position();

            if let Some(callee) = stop.callee() {
                direct_callees[index] = callee;
                if stop.is_direct_runtime_call() {
                    bits::set(&mut runtime_call_flags, index);
                }
            }

            // Initialize this stop's slice of the shared reference maps.
            Self::initialize_maps(
                stop,
                index,
                safepoint_rank,
                n,
                frame_ref_map_size,
                register_ref_map_size,
                first_template_slot,
                &mut reference_maps,
            );

            // Extend the bytecode→stops table in the same pass; stops
            // arrive in non-decreasing bytecode order.
            if current_bytecode_position != Some(stop.bytecode_position()) {
                current_bytecode_position = Some(stop.bytecode_position());
                table.push(stop.bytecode_position() | BYTECODE_POSITION_MARKER);
            }
            let mut entry = index as u32;
            if stop.is_direct_runtime_call() {
                entry |= DIRECT_RUNTIME_CALL_FLAG;
            }
            table.push(entry);
        }

        assert_eq!(direct_seen, n_direct, "direct-call partition mismatch");
        assert_eq!(indirect_seen, n_indirect, "indirect-call partition mismatch");
        assert_eq!(safepoints_seen, n_safepoints, "safepoint partition mismatch");

        Stops {
            stop_positions,
            direct_callees,
            runtime_call_flags,
            num_indirect_calls: n_indirect,
            num_safepoints: n_safepoints,
            frame_ref_map_size,
            register_ref_map_size,
            reference_maps,
            table,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn initialize_maps(
        stop: &Stop<'_>,
        index: usize,
        safepoint_rank: Option<usize>,
        num_stops: usize,
        frame_ref_map_size: usize,
        register_ref_map_size: usize,
        first_template_slot: usize,
        reference_maps: &mut [u8],
    ) {
        match *stop {
            Stop::TemplateDirectCall { template, rank, .. } => {
                copy_template_frame_map(
                    template,
                    rank,
                    index,
                    frame_ref_map_size,
                    first_template_slot,
                    reference_maps,
                );
            }
            Stop::TemplateIndirectCall { template, rank, .. } => {
                copy_template_frame_map(
                    template,
                    template.num_direct_calls() + rank,
                    index,
                    frame_ref_map_size,
                    first_template_slot,
                    reference_maps,
                );
            }
            Stop::TemplateSafepoint { template, rank, .. } => {
                let template_index =
                    template.num_direct_calls() + template.num_indirect_calls() + rank;
                copy_template_frame_map(
                    template,
                    template_index,
                    index,
                    frame_ref_map_size,
                    first_template_slot,
                    reference_maps,
                );
                // Registers are not re-based; copy the map verbatim.
                if let Some(source) = template.register_reference_map(rank) {
                    let base = num_stops * frame_ref_map_size
                        + safepoint_rank.expect("safepoint without rank") * register_ref_map_size;
                    let len = source.len().min(register_ref_map_size);
                    reference_maps[base..base + len].copy_from_slice(&source[..len]);
                }
            }
            // Bytecode-inserted stops start all-zero: template operand
            // slots are dead past a call or branch, and the live local and
            // operand bits are computed later by the reference-map editor.
            Stop::BytecodeDirectCall { .. } | Stop::BytecodeSafepoint { .. } => {}
        }
    }
}

/// Copy a template's frame map bits into a stop's frame-map slice,
/// shifted into the template slot area of the enclosing frame.
fn copy_template_frame_map(
    template: &TemplateMethod,
    template_stop_index: usize,
    stop_index: usize,
    frame_ref_map_size: usize,
    first_template_slot: usize,
    reference_maps: &mut [u8],
) {
    let Some(source) = template.frame_reference_map(template_stop_index) else {
        return;
    };
    let offset = stop_index * frame_ref_map_size;
    let target = &mut reference_maps[offset..offset + frame_ref_map_size];
    for bit in bits::iter_set(source) {
        bits::set(target, first_template_slot + bit);
    }
}

// =============================================================================
// Stops
// =============================================================================

/// High bit of a table entry: this entry is a bytecode-position marker.
pub const BYTECODE_POSITION_MARKER: u32 = 1 << 31;

/// Flag bit on a stop-index entry: the stop is a direct runtime call.
pub const DIRECT_RUNTIME_CALL_FLAG: u32 = 1 << 30;

/// The packed, immutable stop data of a compiled method.
///
/// Built once by [`StopsBuilder::pack`]; optionally post-processed by the
/// reference-map editor during compilation; read-only and safely shared
/// across threads thereafter.
#[derive(Debug)]
pub struct Stops {
    stop_positions: Vec<u32>,
    direct_callees: Vec<MethodId>,
    runtime_call_flags: Vec<u8>,
    num_indirect_calls: usize,
    num_safepoints: usize,
    frame_ref_map_size: usize,
    register_ref_map_size: usize,
    reference_maps: Vec<u8>,
    /// Bytecode-position markers interleaved with stop indices; see
    /// [`BytecodeStopsIterator`].
    table: Vec<u32>,
}

impl Stops {
    /// Total number of stops.
    #[inline]
    pub fn len(&self) -> usize {
        self.stop_positions.len()
    }

    /// Check if the method has no stops.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stop_positions.is_empty()
    }

    /// Number of direct-call stops.
    #[inline]
    pub fn num_direct_calls(&self) -> usize {
        self.direct_callees.len()
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

    /// Code offset of the stop at `index`.
    #[inline]
    pub fn stop_position(&self, index: usize) -> u32 {
        self.stop_positions[index]
    }

    /// Callees of the direct-call stops, indexed by stop index.
    #[inline]
    pub fn direct_callees(&self) -> &[MethodId] {
        &self.direct_callees
    }

    /// Whether the direct-call stop at `index` calls into the runtime.
    #[inline]
    pub fn is_direct_call_to_runtime(&self, index: usize) -> bool {
        index < self.direct_callees.len() && bits::is_set(&self.runtime_call_flags, index)
    }

    /// Bytes per frame reference map.
    #[inline]
    pub fn frame_reference_map_size(&self) -> usize {
        self.frame_ref_map_size
    }

    /// Bytes per register reference map.
    #[inline]
    pub fn register_reference_map_size(&self) -> usize {
        self.register_ref_map_size
    }

    /// The whole packed reference-map array (frame maps, then register
    /// maps). This is what the stack walker hands to the root scanner.
    #[inline]
    pub fn reference_maps(&self) -> &[u8] {
        &self.reference_maps
    }

    /// Frame reference map of the stop at `index`.
    pub fn frame_reference_map(&self, index: usize) -> &[u8] {
        let offset = index * self.frame_ref_map_size;
        &self.reference_maps[offset..offset + self.frame_ref_map_size]
    }

    /// Mutable frame map slice; only the reference-map editor uses this,
    /// during compilation, before the method is published.
    pub(crate) fn frame_reference_map_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = index * self.frame_ref_map_size;
        &mut self.reference_maps[offset..offset + self.frame_ref_map_size]
    }

    /// Register reference map of the safepoint with the given rank.
    pub fn register_reference_map(&self, safepoint_rank: usize) -> &[u8] {
        let base = self.stop_positions.len() * self.frame_ref_map_size;
        let offset = base + safepoint_rank * self.register_ref_map_size;
        &self.reference_maps[offset..offset + self.register_ref_map_size]
    }

    /// Cursor over stops grouped by bytecode position.
    #[inline]
    pub fn bytecode_stops(&self) -> BytecodeStopsIterator<'_> {
        BytecodeStopsIterator::new(&self.table)
    }
}

// =============================================================================
// BytecodeStopsIterator
// =============================================================================

/// A stop index paired with its direct-runtime-call flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopAtPosition {
    /// The stop's packed index.
    pub index: usize,
    /// True if the stop is a direct call into the runtime.
    pub direct_runtime_call: bool,
}

/// Resettable cursor over the packed bytecode→stops table.
///
/// The table is a flat `u32` sequence: an entry with the high bit set
/// marks a distinct bytecode position; the entries that follow it (until
/// the next marker) are the stop indices active at that position, each
/// optionally tagged with [`DIRECT_RUNTIME_CALL_FLAG`].
///
/// Outer iteration advances position to position; inner iteration walks
/// the stop indices of the current position and can be replayed with
/// [`BytecodeStopsIterator::rewind_stops`].
#[derive(Debug, Clone)]
pub struct BytecodeStopsIterator<'a> {
    table: &'a [u32],
    /// Index of the current position marker, or `table.len()` when done.
    marker: usize,
    /// Cursor over the stop entries following the current marker.
    cursor: usize,
}

impl<'a> BytecodeStopsIterator<'a> {
    fn new(table: &'a [u32]) -> Self {
        debug_assert!(
            table.is_empty() || table[0] & BYTECODE_POSITION_MARKER != 0,
            "table must begin with a position marker"
        );
        Self {
            table,
            marker: usize::MAX, // before the first position
            cursor: 0,
        }
    }

    /// Reset to before the first bytecode position.
    pub fn reset(&mut self) {
        self.marker = usize::MAX;
        self.cursor = 0;
    }

    /// The current bytecode position, if any.
    pub fn bytecode_position(&self) -> Option<u32> {
        if self.marker == usize::MAX || self.marker >= self.table.len() {
            return None;
        }
        Some(self.table[self.marker] & !BYTECODE_POSITION_MARKER)
    }

    /// Advance to the next distinct bytecode position.
    pub fn next_position(&mut self) -> Option<u32> {
        let mut i = if self.marker == usize::MAX {
            0
        } else {
            self.marker + 1
        };
        while i < self.table.len() && self.table[i] & BYTECODE_POSITION_MARKER == 0 {
            i += 1;
        }
        self.marker = i;
        self.cursor = i + 1;
        self.bytecode_position()
    }

    /// Next stop index at the current position.
    pub fn next_stop(&mut self) -> Option<StopAtPosition> {
        if self.marker == usize::MAX || self.cursor >= self.table.len() {
            return None;
        }
        let entry = self.table[self.cursor];
        if entry & BYTECODE_POSITION_MARKER != 0 {
            return None;
        }
        self.cursor += 1;
        Some(StopAtPosition {
            index: (entry & !DIRECT_RUNTIME_CALL_FLAG) as usize,
            direct_runtime_call: entry & DIRECT_RUNTIME_CALL_FLAG != 0,
        })
    }

    /// Rewind the inner cursor so the current position's stops can be
    /// walked again.
    pub fn rewind_stops(&mut self) {
        if self.marker != usize::MAX {
            self.cursor = self.marker + 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
