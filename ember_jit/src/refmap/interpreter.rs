//! Block-level abstract interpretation of reference-ness.
//!
//! The interpreter tracks exactly one bit per frame slot: does this local
//! or operand-stack slot currently hold an object reference? Per-block
//! entry states are kept as compact bitsets; running a block forward from
//! its entry state yields the state at any position inside it.
//!
//! Entry states come from one of two places:
//!
//! - a decoded `StackMapTable`, applied delta by delta through the
//!   [`FrameModel`] trait ([`RefMapInterpreter::seed_from_stack_maps`]), or
//! - a merge fixpoint over the control-flow graph
//!   ([`RefMapInterpreter::finalize_frames`]): a slot is a reference at a
//!   block entry only if it is a reference on every incoming path.
//!
//! Both can be combined: seeding first makes the fixpoint converge in one
//! pass for reducible control flow.

use smallvec::{smallvec, SmallVec};

use super::{block_index_for, ReferenceSlotVisitor};
use crate::bytecode::{CallReturn, Instr, MethodCode};
use crate::stackmap::{FrameModel, StackMapFrame, VerificationType};

// =============================================================================
// SlotBits
// =============================================================================

/// Fixed-width bitset over frame slots (locals, then operand stack).
#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotBits {
    words: SmallVec<[u64; 2]>,
}

impl SlotBits {
    fn new(bits: usize) -> Self {
        Self {
            words: smallvec![0u64; (bits + 63) / 64],
        }
    }

    #[inline]
    fn get(&self, index: usize) -> bool {
        self.words[index >> 6] & (1 << (index & 63)) != 0
    }

    #[inline]
    fn set(&mut self, index: usize, value: bool) {
        if value {
            self.words[index >> 6] |= 1 << (index & 63);
        } else {
            self.words[index >> 6] &= !(1 << (index & 63));
        }
    }

    /// Intersect with `other`; returns true if any bit changed.
    fn intersect(&mut self, other: &SlotBits) -> bool {
        let mut changed = false;
        for (word, &other_word) in self.words.iter_mut().zip(other.words.iter()) {
            let merged = *word & other_word;
            changed |= merged != *word;
            *word = merged;
        }
        changed
    }
}

/// Type state at a block entry: slot reference bits plus stack depth.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    slots: SlotBits,
    sp: usize,
}

// =============================================================================
// RefMapInterpreter
// =============================================================================

/// Abstract interpreter over a method's reference-ness.
pub struct RefMapInterpreter<'c> {
    code: &'c MethodCode,
    block_starts: &'c [u32],
    /// Entry state per block; `None` until the block is reached.
    frames: Vec<Option<Frame>>,
}

impl<'c> RefMapInterpreter<'c> {
    /// Create an interpreter; the method entry block is seeded from the
    /// parameter reference-ness in `code`.
    pub fn new(code: &'c MethodCode, block_starts: &'c [u32]) -> Self {
        assert!(!block_starts.is_empty() && block_starts[0] == 0);
        let mut frames = vec![None; block_starts.len()];

        let mut entry = Frame {
            slots: SlotBits::new(code.max_locals + code.max_stack),
            sp: 0,
        };
        for (local, &is_ref) in code.param_refs.iter().enumerate() {
            entry.slots.set(local, is_ref);
        }
        frames[0] = Some(entry);

        Self {
            code,
            block_starts,
            frames,
        }
    }

    /// Seed block entry states from a decoded `StackMapTable` sequence.
    ///
    /// Each frame's absolute position must be a block start; the state
    /// obtained by applying the frame delta becomes that block's entry
    /// state.
    pub fn seed_from_stack_maps(&mut self, stack_map_frames: &[StackMapFrame]) {
        let mut init = FramesInit::new(self.code);
        let mut previous = None;
        for stack_map_frame in stack_map_frames {
            let position = stack_map_frame.position(previous);
            previous = Some(position);
            stack_map_frame.apply_to(&mut init);

            let block = block_index_for(self.block_starts, position);
            assert_eq!(
                self.block_starts[block], position,
                "stack map frame not at a block start"
            );
            self.frames[block] = Some(init.snapshot(self.code.max_locals, self.code.max_stack));
        }
    }

    /// Run the merge fixpoint until every reachable block's entry state is
    /// stable.
    pub fn finalize_frames(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for block in 0..self.block_starts.len() {
                if self.frames[block].is_some() {
                    changed |= self.flow_block(block);
                }
            }
        }
    }

    /// True if the block containing `bytecode_position` was reached.
    pub fn is_reachable(&self, bytecode_position: u32) -> bool {
        self.frames[block_index_for(self.block_starts, bytecode_position)].is_some()
    }

    /// Replay blocks and report every live reference slot at each of the
    /// given stop positions, which must be sorted ascending.
    ///
    /// # Panics
    ///
    /// Panics if a stop position lies in a block never reached by
    /// [`finalize_frames`]; a stop in unreachable code is a compiler bug.
    pub fn interpret_reference_slots<V: ReferenceSlotVisitor>(
        &self,
        visitor: &mut V,
        stop_positions: &[u32],
    ) {
        let mut current_block = usize::MAX;
        let mut frame = None;
        let mut pc = 0usize;

        for &position in stop_positions {
            let block = block_index_for(self.block_starts, position);
            if block != current_block {
                current_block = block;
                frame = Some(
                    self.frames[block]
                        .clone()
                        .unwrap_or_else(|| panic!("stop at {} in unreachable block", position)),
                );
                pc = self.block_starts[block] as usize;
            }
            let frame = frame.as_mut().expect("frame loaded above");

            while pc < position as usize {
                self.apply(frame, &self.code.code[pc]);
                pc += 1;
            }

            self.visit_stop(visitor, frame, position);

            self.apply(frame, &self.code.code[pc]);
            pc += 1;
        }
    }

    /// Invoke visitor callbacks for the state at `position`, before the
    /// instruction there executes.
    fn visit_stop<V: ReferenceSlotVisitor>(&self, visitor: &mut V, frame: &Frame, position: u32) {
        visitor.at_stop_position(position);

        for local in 0..self.code.max_locals {
            if frame.slots.get(local) {
                visitor.visit_reference_in_local_variable(local);
            }
        }

        let stack_base = self.code.max_locals;
        match self.code.code[position as usize] {
            Instr::Call { args, .. } => {
                // Arguments still on the stack: the state a regular call
                // stop observes.
                for slot in 0..frame.sp {
                    if frame.slots.get(stack_base + slot) {
                        visitor.visit_reference_on_operand_stack(slot, false);
                    }
                }
                // Arguments popped: the state a direct runtime call stop
                // observes.
                let surviving = frame.sp - args as usize;
                for slot in 0..surviving {
                    if frame.slots.get(stack_base + slot) {
                        visitor.visit_reference_on_operand_stack(slot, true);
                    }
                }
            }
            _ => {
                for slot in 0..frame.sp {
                    if frame.slots.get(stack_base + slot) {
                        visitor.visit_reference_on_operand_stack(slot, false);
                    }
                }
            }
        }
    }

    /// Run one block forward from its entry state, merging the outgoing
    /// state into every successor. Returns true if any successor's entry
    /// state changed.
    fn flow_block(&mut self, block: usize) -> bool {
        let mut frame = self.frames[block].clone().expect("block has no entry state");
        let start = self.block_starts[block] as usize;
        let end = self
            .block_starts
            .get(block + 1)
            .map(|&s| s as usize)
            .unwrap_or(self.code.code.len());

        let mut changed = false;
        for pc in start..end {
            let instr = self.code.code[pc];
            match instr {
                Instr::Branch { target } => {
                    return changed | self.merge_into(target, &frame);
                }
                Instr::BranchIfZero { target } => {
                    self.apply(&mut frame, &instr);
                    changed |= self.merge_into(target, &frame);
                    // Fall through to the next block below.
                }
                Instr::Return => return changed,
                _ => self.apply(&mut frame, &instr),
            }
        }

        if end < self.code.code.len() {
            changed |= self.merge_into(end as u32, &frame);
        }
        changed
    }

    /// Merge `frame` into the entry state of the block starting at
    /// `target_position`.
    fn merge_into(&mut self, target_position: u32, frame: &Frame) -> bool {
        let target = block_index_for(self.block_starts, target_position);
        debug_assert_eq!(self.block_starts[target], target_position);
        match &mut self.frames[target] {
            None => {
                self.frames[target] = Some(frame.clone());
                true
            }
            Some(existing) => {
                assert_eq!(
                    existing.sp, frame.sp,
                    "stack depth mismatch merging into block {}",
                    target
                );
                existing.slots.intersect(&frame.slots)
            }
        }
    }

    /// Apply one instruction's effect on locals and operand stack.
    ///
    /// Control transfer is the caller's concern; this only moves
    /// reference-ness between slots.
    fn apply(&self, frame: &mut Frame, instr: &Instr) {
        let stack_base = self.code.max_locals;
        match *instr {
            Instr::LoadLocal(local) => {
                let is_ref = frame.slots.get(local as usize);
                frame.slots.set(stack_base + frame.sp, is_ref);
                frame.sp += 1;
            }
            Instr::StoreLocal(local) => {
                frame.sp -= 1;
                let is_ref = frame.slots.get(stack_base + frame.sp);
                frame.slots.set(local as usize, is_ref);
            }
            Instr::PushRef | Instr::PushNull => {
                frame.slots.set(stack_base + frame.sp, true);
                frame.sp += 1;
            }
            Instr::PushWord => {
                frame.slots.set(stack_base + frame.sp, false);
                frame.sp += 1;
            }
            Instr::Pop => frame.sp -= 1,
            Instr::Dup => {
                let top = frame.slots.get(stack_base + frame.sp - 1);
                frame.slots.set(stack_base + frame.sp, top);
                frame.sp += 1;
            }
            Instr::GetField { is_ref } => {
                frame.slots.set(stack_base + frame.sp - 1, is_ref);
            }
            Instr::PutField => frame.sp -= 2,
            Instr::Call { args, returns } => {
                frame.sp -= args as usize;
                match returns {
                    CallReturn::Void => {}
                    CallReturn::Word => {
                        frame.slots.set(stack_base + frame.sp, false);
                        frame.sp += 1;
                    }
                    CallReturn::Ref => {
                        frame.slots.set(stack_base + frame.sp, true);
                        frame.sp += 1;
                    }
                }
            }
            Instr::BranchIfZero { .. } => frame.sp -= 1,
            Instr::Branch { .. } | Instr::Return => {}
        }
    }
}

// =============================================================================
// FramesInit
// =============================================================================

/// [`FrameModel`] implementation used while applying stack-map deltas.
///
/// Keeps the full verification types (the deltas are expressed in terms of
/// them) and snapshots down to reference bits per block.
struct FramesInit {
    /// Verification type per local slot; `Top` where undefined.
    local_slots: Vec<VerificationType>,
    /// Definition-order list of (slot, category) for chopping.
    local_entries: Vec<(usize, usize)>,
    /// Operand stack, bottom first.
    stack: Vec<VerificationType>,
}

impl FramesInit {
    fn new(code: &MethodCode) -> Self {
        let mut init = Self {
            local_slots: vec![VerificationType::Top; code.max_locals],
            local_entries: Vec::new(),
            stack: Vec::new(),
        };
        for (slot, &is_ref) in code.param_refs.iter().enumerate() {
            let ty = if is_ref {
                VerificationType::Object(0)
            } else {
                VerificationType::Integer
            };
            init.store(&ty, slot);
        }
        init
    }

    fn snapshot(&self, max_locals: usize, max_stack: usize) -> Frame {
        let mut slots = SlotBits::new(max_locals + max_stack);
        for (slot, ty) in self.local_slots.iter().enumerate() {
            slots.set(slot, ty.is_reference());
        }
        for (depth, ty) in self.stack.iter().enumerate() {
            slots.set(max_locals + depth, ty.is_reference());
        }
        Frame {
            slots,
            sp: self.stack.len(),
        }
    }
}

impl FrameModel for FramesInit {
    fn active_locals(&self) -> usize {
        self.local_entries
            .last()
            .map(|&(slot, category)| slot + category)
            .unwrap_or(0)
    }

    fn chop_locals(&mut self, n: usize) {
        for _ in 0..n {
            let (slot, category) = self
                .local_entries
                .pop()
                .expect("chop below zero active locals");
            for cleared in slot..slot + category {
                self.local_slots[cleared] = VerificationType::Top;
            }
        }
    }

    fn clear(&mut self) {
        self.local_slots.fill(VerificationType::Top);
        self.local_entries.clear();
        self.stack.clear();
    }

    fn clear_stack(&mut self) {
        self.stack.clear();
    }

    fn push(&mut self, ty: &VerificationType) {
        self.stack.push(*ty);
    }

    fn store(&mut self, ty: &VerificationType, index: usize) {
        let category = ty.category();
        self.local_slots[index] = *ty;
        if category == 2 {
            self.local_slots[index + 1] = VerificationType::Top;
        }
        self.local_entries.push((index, category));
    }
}

// =============================================================================
// Tests
// =============================================================================
