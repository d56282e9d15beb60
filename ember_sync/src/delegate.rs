//! The contract between lock modes.
//!
//! Lock modes chain: a biased layer delegates to the thin layer, which
//! delegates to an inflated (heavyweight) monitor implementation. Each
//! link only needs the [`ModeDelegate`] interface of the next; the
//! heavyweight end of the chain lives outside this crate.

use std::fmt;

use crate::lock_word::{LockWord, LockWordCell};

/// A monitor operation was attempted by a thread that does not own the
/// monitor. Recoverable: thrown back to the offending thread, never
/// corrupts lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorError {
    /// Exit, notify, or wait without holding the monitor.
    IllegalMonitorState,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::IllegalMonitorState => {
                write!(f, "current thread does not own the monitor")
            }
        }
    }
}

impl std::error::Error for MonitorError {}

/// Three-valued answer to an ownership query against a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadHoldsMonitorResult {
    /// The thread holds the monitor.
    True,
    /// The thread does not hold the monitor.
    False,
    /// The word no longer belongs to the delegate's mode (deflated);
    /// the caller must re-read and retry.
    NotThisMode,
}

/// The interface every next-mode implementation must satisfy.
///
/// All operations receive the lock-word cell plus the word value the
/// caller last witnessed; implementations re-read and retry internally
/// as needed. "Deflation observed" results (`false` from enter, `0`
/// from hashcode, `NotThisMode` from the ownership query) send the
/// caller back around its own retry loop.
pub trait ModeDelegate: Send + Sync {
    /// Enter the monitor. Returns false if the word was deflated before
    /// entry could complete; the caller restarts from a fresh read.
    fn delegate_monitor_enter(&self, cell: &LockWordCell, lockword: LockWord, thread_id: u32)
        -> bool;

    /// Exit the monitor.
    fn delegate_monitor_exit(&self, cell: &LockWordCell, lockword: LockWord)
        -> Result<(), MonitorError>;

    /// Notify one or all waiters.
    fn delegate_monitor_notify(
        &self,
        cell: &LockWordCell,
        all: bool,
        lockword: LockWord,
    ) -> Result<(), MonitorError>;

    /// Wait on the monitor; a zero timeout waits indefinitely.
    fn delegate_monitor_wait(
        &self,
        cell: &LockWordCell,
        timeout_millis: u64,
        lockword: LockWord,
    ) -> Result<(), MonitorError>;

    /// Return the object's hashcode, or 0 if the word was deflated and
    /// the caller must retry.
    fn delegate_make_hashcode(&self, cell: &LockWordCell, lockword: LockWord) -> u32;

    /// Whether `thread_id` holds the monitor.
    fn delegate_thread_holds_monitor(
        &self,
        cell: &LockWordCell,
        lockword: LockWord,
        thread_id: u32,
    ) -> ThreadHoldsMonitorResult;

    /// Stabilize monitor bookkeeping before the collector scans roots.
    fn delegate_before_garbage_collection(&self);

    /// Release post-collection bookkeeping.
    fn delegate_after_garbage_collection(&self);

    // =========================================================================
    // Inflation protocol
    // =========================================================================

    /// Speculatively prepare the word that will replace `current` when
    /// this mode takes the lock over (e.g. bind a monitor).
    fn prepare_modal_lockword(&self, cell: &LockWordCell, current: LockWord) -> LockWord;

    /// The prepared word lost its installation race; unbind whatever
    /// `prepare_modal_lockword` allocated.
    fn cancel_prepared_modal_lockword(&self, prepared: LockWord);

    /// The lock word changed (new owner, count, or hashcode) before the
    /// prepared word could be installed; refresh it against `current`.
    fn reprepare_modal_lockword(&self, prepared: LockWord, current: LockWord) -> LockWord;
}
