//! Fills flow-sensitive reference-map bits into packed stops.

use smallvec::SmallVec;

use super::{RefMapInterpreter, ReferenceSlotVisitor};
use crate::bits;
use crate::bytecode::MethodCode;
use crate::frame_layout::JitFrameLayout;
use crate::stackmap::StackMapFrame;
use crate::stops::{StopAtPosition, Stops};

/// Per-method driver that finalizes the packed reference maps.
///
/// Constructed once per compiled method after [`pack`]; [`fill_in_maps`]
/// consumes it. A method with no stops gets the sentinel value, so
/// downstream code holds an editor unconditionally instead of an optional
/// one.
///
/// [`pack`]: crate::stops::StopsBuilder::pack
/// [`fill_in_maps`]: RefMapEditor::fill_in_maps
pub struct RefMapEditor<'m> {
    inner: Option<EditorInner<'m>>,
}

struct EditorInner<'m> {
    stops: &'m mut Stops,
    code: &'m MethodCode,
    block_starts: Vec<u32>,
    layout: &'m dyn JitFrameLayout,
    stack_map_frames: Option<Vec<StackMapFrame>>,
}

impl<'m> RefMapEditor<'m> {
    /// The "no reference-map editing needed" value.
    pub fn sentinel() -> Self {
        Self { inner: None }
    }

    /// Create an editor for a compiled method.
    ///
    /// Returns the sentinel if the method has no stops. When
    /// `stack_map_frames` is given, block entry states are seeded from it
    /// before the merge fixpoint runs.
    pub fn new(
        stops: &'m mut Stops,
        code: &'m MethodCode,
        layout: &'m dyn JitFrameLayout,
        stack_map_frames: Option<Vec<StackMapFrame>>,
    ) -> Self {
        if stops.is_empty() {
            return Self::sentinel();
        }
        let block_starts = code.block_starts();
        Self {
            inner: Some(EditorInner {
                stops,
                code,
                block_starts,
                layout,
                stack_map_frames,
            }),
        }
    }

    /// True if this is the sentinel.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.inner.is_none()
    }

    /// Compute and set the flow-sensitive local and operand-stack bits in
    /// every stop's frame reference map. A sentinel editor does nothing.
    pub fn fill_in_maps(self) {
        let Some(inner) = self.inner else {
            return;
        };

        let mut interpreter = RefMapInterpreter::new(inner.code, &inner.block_starts);
        if let Some(frames) = &inner.stack_map_frames {
            interpreter.seed_from_stack_maps(frames);
        }
        interpreter.finalize_frames();

        // Pull the per-position stop groups out of the packed table up
        // front; the marker below needs exclusive access to the maps.
        let mut schedule: Vec<(u32, SmallVec<[StopAtPosition; 2]>)> = Vec::new();
        let mut positions = Vec::new();
        {
            let mut iter = inner.stops.bytecode_stops();
            while let Some(position) = iter.next_position() {
                let mut group = SmallVec::new();
                while let Some(stop) = iter.next_stop() {
                    group.push(stop);
                }
                positions.push(position);
                schedule.push((position, group));
            }
        }

        let mut marker = StopMapMarker {
            stops: inner.stops,
            layout: inner.layout,
            schedule: &schedule,
            current: usize::MAX,
        };
        interpreter.interpret_reference_slots(&mut marker, &positions);
    }
}

/// Visitor that sets frame-map bits for every stop at the current
/// bytecode position.
struct StopMapMarker<'a> {
    stops: &'a mut Stops,
    layout: &'a dyn JitFrameLayout,
    schedule: &'a [(u32, SmallVec<[StopAtPosition; 2]>)],
    current: usize,
}

impl StopMapMarker<'_> {
    fn current_group(&self) -> &[StopAtPosition] {
        &self.schedule[self.current].1
    }
}

impl ReferenceSlotVisitor for StopMapMarker<'_> {
    fn at_stop_position(&mut self, bytecode_position: u32) {
        self.current = self.current.wrapping_add(1);
        debug_assert_eq!(self.schedule[self.current].0, bytecode_position);
    }

    fn visit_reference_in_local_variable(&mut self, local_index: usize) {
        let bit = self.layout.local_variable_ref_map_index(local_index);
        for stop in 0..self.current_group().len() {
            let index = self.schedule[self.current].1[stop].index;
            bits::set(self.stops.frame_reference_map_mut(index), bit);
        }
    }

    fn visit_reference_on_operand_stack(&mut self, operand_stack_index: usize, parameters_popped: bool) {
        let bit = self.layout.operand_stack_ref_map_index(operand_stack_index);
        for stop in 0..self.current_group().len() {
            let entry = self.schedule[self.current].1[stop];
            // A regular call still has its arguments on the stack at the
            // stop; a direct runtime call pops them itself beforehand, so
            // it takes its bits from the post-pop report instead.
            if parameters_popped == entry.direct_runtime_call {
                bits::set(self.stops.frame_reference_map_mut(entry.index), bit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CallReturn, Instr};
    use crate::frame_layout::BaselineFrameLayout;
    use crate::stops::{MethodId, Stop, StopsBuilder};
    use crate::template::TemplateMethod;

    #[test]
    fn test_sentinel_for_methods_without_stops() {
        let code = MethodCode {
            code: vec![Instr::Return],
            max_locals: 0,
            max_stack: 0,
            param_refs: vec![],
        };
        let layout = BaselineFrameLayout::new(0, 0, 0);
        let mut stops = StopsBuilder::new(1).pack(0, 0, 0);
        let editor = RefMapEditor::new(&mut stops, &code, &layout, None);
        assert!(editor.is_sentinel());
        editor.fill_in_maps();
    }

    #[test]
    fn test_direct_call_live_locals_bit_exact() {
        // Locals {0, 2} hold references at the call; the operand stack is
        // empty. Exactly those two bits must be set, nothing else.
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
            max_stack: 2,
            param_refs: vec![true, false],
        };
        let layout = BaselineFrameLayout::new(3, 2, 0);

        let mut builder = StopsBuilder::new(code.code.len());
        builder.add(Stop::BytecodeDirectCall {
            position: 16,
            bytecode_position: 2,
            callee: MethodId(1),
        });
        let mut stops = builder.pack(layout.frame_reference_map_size(), 0, layout.first_template_slot());

        RefMapEditor::new(&mut stops, &code, &layout, None).fill_in_maps();

        let map = stops.frame_reference_map(0);
        let set: Vec<usize> = bits::iter_set(map).collect();
        assert_eq!(
            set,
            vec![
                layout.local_variable_ref_map_index(0),
                layout.local_variable_ref_map_index(2),
            ]
        );
    }

    #[test]
    fn test_runtime_call_excludes_popped_arguments() {
        // Two direct-call stops at the same call bytecode: a regular call
        // and a runtime call. The pushed argument reference must appear in
        // the regular call's map only.
        let code = MethodCode {
            code: vec![
                Instr::PushRef,
                Instr::Call {
                    args: 1,
                    returns: CallReturn::Void,
                },
                Instr::Return,
            ],
            max_locals: 0,
            max_stack: 1,
            param_refs: vec![],
        };
        let layout = BaselineFrameLayout::new(0, 1, 0);

        let runtime_template = TemplateMethod::new(
            vec![0],
            1,
            0,
            0,
            vec![MethodId(90)],
            vec![true],
            0,
            0,
            Vec::new(),
        );

        let mut builder = StopsBuilder::new(code.code.len());
        builder.add(Stop::BytecodeDirectCall {
            position: 8,
            bytecode_position: 1,
            callee: MethodId(5),
        });
        builder.add_template(&runtime_template, 12, 1);
        let mut stops = builder.pack(layout.frame_reference_map_size(), 0, layout.first_template_slot());

        RefMapEditor::new(&mut stops, &code, &layout, None).fill_in_maps();

        let stack_bit = layout.operand_stack_ref_map_index(0);
        // Stop 0: the regular call; argument still on the stack.
        assert!(bits::is_set(stops.frame_reference_map(0), stack_bit));
        // Stop 1: the runtime call; argument already popped.
        assert!(bits::are_clear(stops.frame_reference_map(1)));
    }

    #[test]
    fn test_safepoint_at_backward_branch() {
        // 0: push_ref
        // 1: store local 0
        // 2: load local 1      (word counter)
        // 3: branch_if_zero -> 6
        // 4: call(args=0)
        // 5: branch -> 2       (backward branch safepoint)
        // 6: return
        let code = MethodCode {
            code: vec![
                Instr::PushRef,
                Instr::StoreLocal(0),
                Instr::LoadLocal(1),
                Instr::BranchIfZero { target: 6 },
                Instr::Call {
                    args: 0,
                    returns: CallReturn::Void,
                },
                Instr::Branch { target: 2 },
                Instr::Return,
            ],
            max_locals: 2,
            max_stack: 1,
            param_refs: vec![false, false],
        };
        let layout = BaselineFrameLayout::new(2, 1, 0);

        let mut builder = StopsBuilder::new(code.code.len());
        builder.add(Stop::BytecodeDirectCall {
            position: 20,
            bytecode_position: 4,
            callee: MethodId(2),
        });
        builder.add(Stop::BytecodeSafepoint {
            position: 28,
            bytecode_position: 5,
        });
        let mut stops = builder.pack(layout.frame_reference_map_size(), 1, layout.first_template_slot());

        RefMapEditor::new(&mut stops, &code, &layout, None).fill_in_maps();

        // Local 0 starts as a word but holds a reference on every path
        // reaching the loop; both stops must see it.
        let local0 = layout.local_variable_ref_map_index(0);
        assert!(bits::is_set(stops.frame_reference_map(0), local0));
        assert!(bits::is_set(stops.frame_reference_map(1), local0));
        assert!(!bits::is_set(
            stops.frame_reference_map(0),
            layout.local_variable_ref_map_index(1)
        ));
    }
}
