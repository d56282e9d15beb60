//! Baseline JIT support for the Ember runtime.
//!
//! This crate owns the bookkeeping a template-copying baseline compiler
//! produces alongside machine code:
//!
//! - **Stop records** ([`stops`]): every call site and safepoint in a
//!   compiled method, with packed per-stop reference maps describing which
//!   frame slots and registers hold live object references.
//! - **Stack-map frames** ([`stackmap`]): the classfile `StackMapTable`
//!   encoding of verifier type state at basic-block boundaries.
//! - **Reference-map interpretation** ([`refmap`]): a block-level abstract
//!   interpreter that fills in the flow-sensitive portions of the stop
//!   reference maps after template copying.
//!
//! The garbage collector consumes the packed maps through [`stops::Stops`]
//! accessors when it walks compiled frames for roots. Everything here runs
//! at compile time; a reference map is never corrected after packing plus
//! editing, so bugs are caught by assertions during compilation rather than
//! deferred to a collection.

#![warn(clippy::all)]

pub mod bits;
pub mod bytecode;
pub mod frame_layout;
pub mod refmap;
pub mod stackmap;
pub mod stops;
pub mod template;

pub use frame_layout::{BaselineFrameLayout, JitFrameLayout};
pub use refmap::{RefMapEditor, ReferenceSlotVisitor};
pub use stackmap::{ClassfileError, FrameModel, StackMapFrame, VerificationType};
pub use stops::{BytecodeStopsIterator, MethodId, Stop, StopKind, Stops, StopsBuilder};
pub use template::TemplateMethod;
