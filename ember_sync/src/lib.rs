//! Object monitor fast paths for the Ember runtime.
//!
//! Every object carries one machine word of lock state. This crate owns
//! the *lightweight* (thin) shape of that word and the state machine that
//! drives it: uncontended enter and exit are a single compare-and-swap,
//! recursion is a counter packed into the word, and a hashcode shares the
//! word's upper bits. Contention, recursion-count overflow, and `wait`
//! escalate to an *inflated* heavyweight monitor behind the
//! [`ModeDelegate`] interface; the heavyweight implementation itself
//! lives outside this crate.
//!
//! Lock-word races are never errors; every transition is a CAS loop that
//! re-reads and retries. The only user-visible failure is the
//! illegal-monitor-state condition for exit/notify/wait without
//! ownership.

#![warn(clippy::all)]

pub mod delegate;
pub mod lock_word;
pub mod thin_lock;
pub mod thread_id;

pub use delegate::{ModeDelegate, MonitorError, ThreadHoldsMonitorResult};
pub use lock_word::{LockWord, LockWordCell};
pub use thin_lock::{BiasedLockDelegate, ThinLockHandler, THIN_LOCK_RETRIES};
pub use thread_id::current_thread_id;
