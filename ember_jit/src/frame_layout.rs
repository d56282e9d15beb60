//! Frame-slot to reference-map-bit addressing.
//!
//! The reference-map editor is layout-agnostic: it computes *which* locals
//! and operand-stack slots hold references, and asks the frame layout
//! *where* the corresponding bit lives in a frame reference map. Concrete
//! layouts differ per compiler tier; the baseline layout below places
//! locals first, then operand-stack slots, then the template slot area.

use crate::bits;

/// Maps frame slots to bit indices in a frame reference map.
pub trait JitFrameLayout {
    /// Bit index of local variable `local`.
    fn local_variable_ref_map_index(&self, local: usize) -> usize;

    /// Bit index of operand-stack slot `slot` (0 = bottom of stack).
    fn operand_stack_ref_map_index(&self, slot: usize) -> usize;

    /// Size in bytes of one frame reference map under this layout.
    fn frame_reference_map_size(&self) -> usize;
}

/// The baseline compiler's frame layout.
///
/// ```text
/// bit 0 ..                     locals
/// bit num_locals ..            operand stack slots
/// bit num_locals+num_stack ..  template scratch slots
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BaselineFrameLayout {
    num_locals: usize,
    num_stack: usize,
    num_template_slots: usize,
}

impl BaselineFrameLayout {
    /// Create a layout for a method with the given slot counts.
    pub fn new(num_locals: usize, num_stack: usize, num_template_slots: usize) -> Self {
        Self {
            num_locals,
            num_stack,
            num_template_slots,
        }
    }

    /// Bit index where the template slot area begins.
    #[inline]
    pub fn first_template_slot(&self) -> usize {
        self.num_locals + self.num_stack
    }
}

impl JitFrameLayout for BaselineFrameLayout {
    #[inline]
    fn local_variable_ref_map_index(&self, local: usize) -> usize {
        debug_assert!(local < self.num_locals);
        local
    }

    #[inline]
    fn operand_stack_ref_map_index(&self, slot: usize) -> usize {
        debug_assert!(slot < self.num_stack);
        self.num_locals + slot
    }

    #[inline]
    fn frame_reference_map_size(&self) -> usize {
        bits::byte_length(self.num_locals + self.num_stack + self.num_template_slots)
    }
}
