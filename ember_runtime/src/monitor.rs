//! The monitor scheme: the VM's entry point for object locking.
//!
//! Assembles the mode chain (thin-lock fast paths in front, a
//! heavyweight-monitor delegate behind) and exposes the operations the
//! interpreter and JIT call. Also adapts the scheme to the collector's
//! [`MonitorGcHooks`] so the chain hears about every collection phase.

use std::sync::Arc;

use ember_gc::MonitorGcHooks;
use ember_sync::{LockWordCell, ModeDelegate, MonitorError, ThinLockHandler};

/// The assembled monitor scheme.
pub struct MonitorScheme<D: ModeDelegate> {
    entry: ThinLockHandler<D>,
}

impl<D: ModeDelegate> MonitorScheme<D> {
    /// Build a scheme whose inflated mode is `delegate`.
    pub fn new(delegate: D) -> Self {
        Self {
            entry: ThinLockHandler::new(delegate),
        }
    }

    /// Enter the monitor of the object whose lock word is `cell`.
    #[inline]
    pub fn monitor_enter(&self, cell: &LockWordCell) {
        self.entry.monitor_enter(cell);
    }

    /// Exit the monitor.
    #[inline]
    pub fn monitor_exit(&self, cell: &LockWordCell) -> Result<(), MonitorError> {
        self.entry.monitor_exit(cell)
    }

    /// Notify one or all waiters.
    pub fn monitor_notify(&self, cell: &LockWordCell, all: bool) -> Result<(), MonitorError> {
        self.entry.monitor_notify(cell, all)
    }

    /// Wait on the monitor.
    pub fn monitor_wait(&self, cell: &LockWordCell, timeout_millis: u64) -> Result<(), MonitorError> {
        self.entry.monitor_wait(cell, timeout_millis)
    }

    /// The object's identity hashcode, installed on first use.
    pub fn make_hash_code(&self, cell: &LockWordCell) -> u32 {
        self.entry.make_hash_code(cell)
    }

    /// Whether `thread_id` holds the monitor.
    pub fn thread_holds_monitor(&self, cell: &LockWordCell, thread_id: u32) -> bool {
        self.entry.thread_holds_monitor(cell, thread_id)
    }

    /// Stabilize monitor bookkeeping before root scanning.
    pub fn before_garbage_collection(&self) {
        self.entry.before_garbage_collection();
    }

    /// Release post-collection bookkeeping.
    pub fn after_garbage_collection(&self) {
        self.entry.after_garbage_collection();
    }
}

/// Adapter handing a shared [`MonitorScheme`] to the collector as its
/// GC hooks.
pub struct SchemeGcHooks<D: ModeDelegate>(pub Arc<MonitorScheme<D>>);

impl<D: ModeDelegate> MonitorGcHooks for SchemeGcHooks<D> {
    fn before_garbage_collection(&self) {
        self.0.before_garbage_collection();
    }

    fn after_garbage_collection(&self) {
        self.0.after_garbage_collection();
    }
}
