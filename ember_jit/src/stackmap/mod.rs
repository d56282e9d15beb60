//! Classfile `StackMapTable` decoding and encoding.
//!
//! The `StackMapTable` attribute records the verifier's type state at
//! basic-block boundaries as a sequence of *delta frames*: each frame
//! describes how locals and the operand stack changed relative to the
//! previous frame. Applying the full ordered sequence from an empty state
//! reconstructs the type state at every recorded bytecode position, which
//! is exactly what the reference-map interpreter needs to seed its
//! per-block frames without running its own fixpoint.
//!
//! Decoding assumes a well-formed classfile; structural violations surface
//! as [`ClassfileError`] for the loader to report. Encoding round-trips
//! byte-for-byte.

mod frame;
mod types;

pub use frame::{FrameModel, StackMapFrame};
pub use types::{ClassfileCursor, ClassfileError, VerificationType};
