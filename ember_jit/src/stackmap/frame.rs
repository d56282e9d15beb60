//! The seven stack-map frame variants.

use smallvec::SmallVec;

use super::types::{ClassfileCursor, ClassfileError, VerificationType};

/// The mutable frame state a stack-map frame delta is applied to.
///
/// Implemented by the reference-map interpreter's frame initialization;
/// the frame variants only ever mutate state through this trait.
pub trait FrameModel {
    /// Number of locals currently defined.
    fn active_locals(&self) -> usize;

    /// Remove the last `n` active locals.
    fn chop_locals(&mut self, n: usize);

    /// Reset locals and stack to empty.
    fn clear(&mut self);

    /// Reset only the operand stack.
    fn clear_stack(&mut self);

    /// Push one value of the given type onto the operand stack.
    fn push(&mut self, ty: &VerificationType);

    /// Define the local at `index` with the given type.
    fn store(&mut self, ty: &VerificationType, index: usize);
}

/// One frame of a `StackMapTable` attribute.
///
/// Each variant is a delta against the previous frame's state. The wire
/// tag (`frame_type`) is derived from the variant and its position delta:
///
/// | variant                      | frame_type        |
/// |------------------------------|-------------------|
/// | `Same`                       | 0–63 (= delta)    |
/// | `SameLocalsOneStack`         | 64–127 (64+delta) |
/// | `SameLocalsOneStackExtended` | 247               |
/// | `Chop`                       | 248–250 (251−k)   |
/// | `SameExtended`               | 251               |
/// | `Append`                     | 252–254 (251+k)   |
/// | `Full`                       | 255               |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Locals unchanged, empty stack; delta in `[0, 64)`.
    Same {
        /// Position delta (encoded directly as the frame type).
        delta: u16,
    },
    /// Locals unchanged, exactly one stack item; delta in `[0, 64)`.
    SameLocalsOneStack {
        /// Position delta (encoded as `frame_type - 64`).
        delta: u16,
        /// The single operand-stack entry.
        stack: VerificationType,
    },
    /// As `SameLocalsOneStack`, with an explicit 16-bit delta.
    SameLocalsOneStackExtended {
        /// Position delta.
        delta: u16,
        /// The single operand-stack entry.
        stack: VerificationType,
    },
    /// The last `chop` locals become undefined; empty stack.
    Chop {
        /// Number of locals removed, in `[1, 3]`.
        chop: u8,
        /// Position delta.
        delta: u16,
    },
    /// As `Same`, with an explicit 16-bit delta.
    SameExtended {
        /// Position delta.
        delta: u16,
    },
    /// 1–3 additional locals defined; empty stack.
    Append {
        /// Position delta.
        delta: u16,
        /// The new locals, defined starting at the current local count.
        locals: SmallVec<[VerificationType; 3]>,
    },
    /// Complete restatement of locals and stack.
    Full {
        /// Position delta.
        delta: u16,
        /// All locals, from slot 0.
        locals: Vec<VerificationType>,
        /// The whole operand stack, bottom first.
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    /// Construct a `Same` frame, asserting the delta range.
    pub fn same(delta: u16) -> Self {
        assert!(delta < 64, "same frame delta must be < 64");
        StackMapFrame::Same { delta }
    }

    /// Construct an `Append` frame, asserting 1–3 locals.
    pub fn append(delta: u16, locals: SmallVec<[VerificationType; 3]>) -> Self {
        assert!(
            (1..=3).contains(&locals.len()),
            "append frame must add 1-3 locals"
        );
        StackMapFrame::Append { delta, locals }
    }

    /// Construct a `Chop` frame, asserting chop 1–3.
    pub fn chop(chop: u8, delta: u16) -> Self {
        assert!((1..=3).contains(&chop), "chop frame must drop 1-3 locals");
        StackMapFrame::Chop { chop, delta }
    }

    /// The wire tag this frame encodes to.
    pub fn frame_type(&self) -> u8 {
        match self {
            StackMapFrame::Same { delta } => {
                debug_assert!(*delta < 64);
                *delta as u8
            }
            StackMapFrame::SameLocalsOneStack { delta, .. } => {
                debug_assert!(*delta < 64);
                64 + *delta as u8
            }
            StackMapFrame::SameLocalsOneStackExtended { .. } => 247,
            StackMapFrame::Chop { chop, .. } => 251 - chop,
            StackMapFrame::SameExtended { .. } => 251,
            StackMapFrame::Append { locals, .. } => 251 + locals.len() as u8,
            StackMapFrame::Full { .. } => 255,
        }
    }

    /// This frame's position delta.
    pub fn delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { delta }
            | StackMapFrame::SameLocalsOneStack { delta, .. }
            | StackMapFrame::SameLocalsOneStackExtended { delta, .. }
            | StackMapFrame::Chop { delta, .. }
            | StackMapFrame::SameExtended { delta }
            | StackMapFrame::Append { delta, .. }
            | StackMapFrame::Full { delta, .. } => *delta,
        }
    }

    /// Absolute bytecode position of this frame.
    ///
    /// The first frame's position is its raw delta; every later frame sits
    /// at `previous + 1 + delta` (the wire format omits the redundant
    /// `+1` separation between consecutive frames).
    pub fn position(&self, previous: Option<u32>) -> u32 {
        match previous {
            None => self.delta() as u32,
            Some(previous) => previous + 1 + self.delta() as u32,
        }
    }

    /// Decode one frame from the cursor.
    pub fn decode(cursor: &mut ClassfileCursor<'_>) -> Result<Self, ClassfileError> {
        let tag = cursor.read_u8()?;
        Ok(match tag {
            0..=63 => StackMapFrame::Same { delta: tag as u16 },
            64..=127 => StackMapFrame::SameLocalsOneStack {
                delta: (tag - 64) as u16,
                stack: VerificationType::decode(cursor)?,
            },
            247 => StackMapFrame::SameLocalsOneStackExtended {
                delta: cursor.read_u16()?,
                stack: VerificationType::decode(cursor)?,
            },
            248..=250 => StackMapFrame::Chop {
                chop: 251 - tag,
                delta: cursor.read_u16()?,
            },
            251 => StackMapFrame::SameExtended {
                delta: cursor.read_u16()?,
            },
            252..=254 => {
                let delta = cursor.read_u16()?;
                let count = (tag - 251) as usize;
                let mut locals = SmallVec::new();
                for _ in 0..count {
                    locals.push(VerificationType::decode(cursor)?);
                }
                StackMapFrame::Append { delta, locals }
            }
            255 => {
                let delta = cursor.read_u16()?;
                let local_count = cursor.read_u16()? as usize;
                let mut locals = Vec::with_capacity(local_count);
                for _ in 0..local_count {
                    locals.push(VerificationType::decode(cursor)?);
                }
                let stack_count = cursor.read_u16()? as usize;
                let mut stack = Vec::with_capacity(stack_count);
                for _ in 0..stack_count {
                    stack.push(VerificationType::decode(cursor)?);
                }
                StackMapFrame::Full {
                    delta,
                    locals,
                    stack,
                }
            }
            _ => return Err(ClassfileError::BadFrameType(tag)),
        })
    }

    /// Append the wire encoding to `out`; round-trips with [`decode`].
    ///
    /// [`decode`]: StackMapFrame::decode
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.frame_type());
        match self {
            StackMapFrame::Same { .. } => {}
            StackMapFrame::SameLocalsOneStack { stack, .. } => stack.write(out),
            StackMapFrame::SameLocalsOneStackExtended { delta, stack } => {
                out.extend_from_slice(&delta.to_be_bytes());
                stack.write(out);
            }
            StackMapFrame::Chop { delta, .. } | StackMapFrame::SameExtended { delta } => {
                out.extend_from_slice(&delta.to_be_bytes());
            }
            StackMapFrame::Append { delta, locals } => {
                out.extend_from_slice(&delta.to_be_bytes());
                for local in locals {
                    local.write(out);
                }
            }
            StackMapFrame::Full {
                delta,
                locals,
                stack,
            } => {
                out.extend_from_slice(&delta.to_be_bytes());
                out.extend_from_slice(&(locals.len() as u16).to_be_bytes());
                for local in locals {
                    local.write(out);
                }
                out.extend_from_slice(&(stack.len() as u16).to_be_bytes());
                for item in stack {
                    item.write(out);
                }
            }
        }
    }

    /// Apply this frame's delta to `model`, which holds the previous
    /// frame's state.
    pub fn apply_to(&self, model: &mut impl FrameModel) {
        match self {
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } => {
                model.clear_stack();
            }
            StackMapFrame::SameLocalsOneStack { stack, .. }
            | StackMapFrame::SameLocalsOneStackExtended { stack, .. } => {
                model.clear_stack();
                model.push(stack);
            }
            StackMapFrame::Chop { chop, .. } => {
                model.chop_locals(*chop as usize);
                model.clear_stack();
            }
            StackMapFrame::Append { locals, .. } => {
                let mut index = model.active_locals();
                for local in locals {
                    model.store(local, index);
                    index += local.category();
                }
                model.clear_stack();
            }
            StackMapFrame::Full { locals, stack, .. } => {
                model.clear();
                let mut index = 0;
                for local in locals {
                    model.store(local, index);
                    index += local.category();
                }
                for item in stack {
                    model.push(item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn round_trip(frame: &StackMapFrame) -> StackMapFrame {
        let mut bytes = Vec::new();
        frame.write(&mut bytes);
        let mut cursor = ClassfileCursor::new(&bytes);
        let decoded = StackMapFrame::decode(&mut cursor).expect("decode failed");
        assert!(cursor.is_at_end(), "trailing bytes after decode");
        decoded
    }

    #[test]
    fn test_same_frame_round_trip_boundaries() {
        for delta in [0u16, 63] {
            let frame = StackMapFrame::same(delta);
            let decoded = round_trip(&frame);
            assert_eq!(decoded, frame);
            assert_eq!(decoded.frame_type(), delta as u8);
        }
    }

    #[test]
    fn test_same_locals_one_stack_round_trip() {
        let frame = StackMapFrame::SameLocalsOneStack {
            delta: 5,
            stack: VerificationType::Object(3),
        };
        assert_eq!(round_trip(&frame), frame);
        assert_eq!(frame.frame_type(), 69);

        let extended = StackMapFrame::SameLocalsOneStackExtended {
            delta: 300,
            stack: VerificationType::Integer,
        };
        assert_eq!(round_trip(&extended), extended);
        assert_eq!(extended.frame_type(), 247);
    }

    #[test]
    fn test_chop_frame_round_trip_boundaries() {
        for chop in [1u8, 3] {
            let frame = StackMapFrame::chop(chop, 10);
            let decoded = round_trip(&frame);
            assert_eq!(decoded, frame);
            assert_eq!(decoded.frame_type(), 251 - chop);
        }
    }

    #[test]
    fn test_append_frame_round_trip_boundaries() {
        let one = StackMapFrame::append(2, smallvec![VerificationType::Integer]);
        assert_eq!(round_trip(&one), one);
        assert_eq!(one.frame_type(), 252);

        let three = StackMapFrame::append(
            2,
            smallvec![
                VerificationType::Object(1),
                VerificationType::Long,
                VerificationType::Float,
            ],
        );
        assert_eq!(round_trip(&three), three);
        assert_eq!(three.frame_type(), 254);
    }

    #[test]
    fn test_full_frame_round_trip() {
        let empty = StackMapFrame::Full {
            delta: 0,
            locals: vec![],
            stack: vec![],
        };
        assert_eq!(round_trip(&empty), empty);

        let large = StackMapFrame::Full {
            delta: 1000,
            locals: (0..12)
                .map(|i| {
                    if i % 2 == 0 {
                        VerificationType::Object(i)
                    } else {
                        VerificationType::Integer
                    }
                })
                .collect(),
            stack: vec![VerificationType::Null, VerificationType::Double],
        };
        assert_eq!(round_trip(&large), large);
        assert_eq!(large.frame_type(), 255);
    }

    #[test]
    fn test_position_accumulation() {
        let frames = [
            StackMapFrame::same(5),
            StackMapFrame::same(3),
            StackMapFrame::same(0),
        ];
        let mut previous = None;
        let mut positions = Vec::new();
        for frame in &frames {
            let position = frame.position(previous);
            positions.push(position);
            previous = Some(position);
        }
        assert_eq!(positions, vec![5, 9, 10]);
    }

    #[test]
    fn test_reserved_frame_type_rejected() {
        let mut cursor = ClassfileCursor::new(&[200]);
        assert_eq!(
            StackMapFrame::decode(&mut cursor),
            Err(ClassfileError::BadFrameType(200))
        );
    }

    #[test]
    #[should_panic(expected = "1-3 locals")]
    fn test_append_rejects_too_many_locals() {
        StackMapFrame::append(
            0,
            smallvec![
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::Integer,
            ],
        );
    }

    // Exercise apply_to against a minimal frame model.
    struct VecModel {
        locals: Vec<Option<VerificationType>>,
        stack: Vec<VerificationType>,
    }

    impl FrameModel for VecModel {
        fn active_locals(&self) -> usize {
            self.locals.iter().filter(|l| l.is_some()).count()
        }
        fn chop_locals(&mut self, n: usize) {
            for _ in 0..n {
                let last = self.locals.iter().rposition(|l| l.is_some());
                if let Some(index) = last {
                    self.locals[index] = None;
                }
            }
        }
        fn clear(&mut self) {
            self.locals.iter_mut().for_each(|l| *l = None);
            self.stack.clear();
        }
        fn clear_stack(&mut self) {
            self.stack.clear();
        }
        fn push(&mut self, ty: &VerificationType) {
            self.stack.push(*ty);
        }
        fn store(&mut self, ty: &VerificationType, index: usize) {
            if self.locals.len() <= index {
                self.locals.resize(index + 1, None);
            }
            self.locals[index] = Some(*ty);
        }
    }

    #[test]
    fn test_apply_append_then_chop() {
        let mut model = VecModel {
            locals: vec![Some(VerificationType::Object(1))],
            stack: vec![VerificationType::Integer],
        };

        StackMapFrame::append(0, smallvec![VerificationType::Integer]).apply_to(&mut model);
        assert_eq!(model.active_locals(), 2);
        assert!(model.stack.is_empty());

        StackMapFrame::chop(1, 0).apply_to(&mut model);
        assert_eq!(model.active_locals(), 1);
    }
}
