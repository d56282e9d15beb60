//! Runtime assembly for Ember's monitor and collector subsystems.
//!
//! `ember_jit` produces per-method stop records, `ember_gc` owns the
//! belts, and `ember_sync` owns the lock-word state machine; none of
//! them knows the others exist. This crate snaps them together:
//!
//! - [`MonitorScheme`] fronts the thin-lock handler as the VM's monitor
//!   entry point, and [`SchemeGcHooks`] adapts it to the collector's
//!   GC-hook interface so monitor bookkeeping is stabilized around
//!   every collection phase.
//! - [`CompiledFrameScanner`] feeds the JIT's packed reference maps to
//!   the collector as root slots for suspended compiled frames.

#![warn(clippy::all)]

pub mod frames;
pub mod monitor;

pub use frames::{CompiledFrameScanner, FrameAnchor};
pub use monitor::{MonitorScheme, SchemeGcHooks};
