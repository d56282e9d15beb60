//! Flow-sensitive reference-map construction.
//!
//! Template copying fills in the reference-map bits a template can know
//! about (its own scratch slots). What it cannot know is which of the
//! enclosing method's locals and operand-stack slots hold references at
//! each stop; that depends on control flow. This module computes those
//! bits after packing:
//!
//! 1. [`RefMapInterpreter`] replays the verifier-level type state (which
//!    slots hold references) block by block, either seeded from a decoded
//!    `StackMapTable` or by running its own merge fixpoint.
//! 2. [`RefMapEditor`] walks every stop position, asks the interpreter for
//!    the live reference slots there, and sets the corresponding bits in
//!    each stop's slice of the packed reference maps.
//!
//! Everything here runs at compile time. Inconsistencies (a stop in an
//! unreachable block, mismatched stack depths at a merge) are compiler
//! bugs and panic immediately rather than producing a map the collector
//! would trust.

mod editor;
mod interpreter;

pub use editor::RefMapEditor;
pub use interpreter::RefMapInterpreter;

/// Callbacks invoked by the interpreter for each live reference slot at a
/// stop position.
pub trait ReferenceSlotVisitor {
    /// The interpreter reached a new stop position; subsequent visits
    /// refer to this position until the next call.
    fn at_stop_position(&mut self, bytecode_position: u32);

    /// Local variable `local_index` holds a reference at the current stop
    /// position.
    fn visit_reference_in_local_variable(&mut self, local_index: usize);

    /// Operand-stack slot `operand_stack_index` holds a reference at the
    /// current stop position.
    ///
    /// At a call, slots are reported twice: once with `parameters_popped`
    /// false (arguments still on the stack) and once with it true
    /// (arguments removed). Which report applies to a given stop depends
    /// on whether that stop is a direct runtime call, because runtime calls pop
    /// their own parameters before the stop's logical position.
    fn visit_reference_on_operand_stack(&mut self, operand_stack_index: usize, parameters_popped: bool);
}

/// Index of the basic block containing `bytecode_position`.
///
/// `block_starts` is sorted. An exact hit returns that block; otherwise
/// the block whose start is the greatest value below the query.
///
/// # Panics
///
/// Panics if `bytecode_position` precedes the first block.
pub fn block_index_for(block_starts: &[u32], bytecode_position: u32) -> usize {
    match block_starts.binary_search(&bytecode_position) {
        Ok(index) => index,
        Err(insertion) => {
            assert!(insertion > 0, "bytecode position before the first block");
            insertion - 1
        }
    }
}
