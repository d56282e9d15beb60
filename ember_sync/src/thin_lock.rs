//! The thin-lock state machine.
//!
//! States and transitions of the lock word:
//!
//! ```text
//!             CAS(unlocked → locked(self,1))
//!   Unlocked ────────────────────────────────▶ Locked(owner, n)
//!      ▲                                           │    ▲
//!      │ CAS(locked(self,1) → unlocked)            │    │ CAS count ±1
//!      └───────────────────────────────────────────┘    │ (recursive)
//!                                                       ▼
//!                   contention / count overflow / wait
//!                                │
//!                                ▼
//!                            Inflated ──▶ heavyweight monitor (delegate)
//! ```
//!
//! Everything is a compare-and-swap against the witnessed word; a failed
//! CAS re-examines the witness and retries. Contended enter retries a
//! bounded number of times ([`THIN_LOCK_RETRIES`]) before giving up and
//! inflating; nothing in the thin paths ever blocks.

use crate::delegate::{ModeDelegate, MonitorError, ThreadHoldsMonitorResult};
use crate::lock_word::{LockWord, LockWordCell};
use crate::thread_id::current_thread_id;

/// Bounded CAS attempts for a contended thin enter before inflating.
pub const THIN_LOCK_RETRIES: u32 = 20;

/// Fast-path monitor entry/exit over thin lock words, escalating to the
/// delegate's heavyweight monitors.
pub struct ThinLockHandler<D: ModeDelegate> {
    delegate: D,
    hash_source: fn(&LockWordCell) -> u32,
}

impl<D: ModeDelegate> ThinLockHandler<D> {
    /// Create a handler chaining to `delegate` for the inflated mode.
    pub fn new(delegate: D) -> Self {
        Self {
            delegate,
            hash_source: address_hash,
        }
    }

    /// Override the hashcode generator (defaults to an address hash).
    pub fn with_hash_source(delegate: D, hash_source: fn(&LockWordCell) -> u32) -> Self {
        Self {
            delegate,
            hash_source,
        }
    }

    /// The next mode in the delegate chain.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    // =========================================================================
    // Enter / exit
    // =========================================================================

    /// Enter the monitor, blocking only if the lock inflates.
    pub fn monitor_enter(&self, cell: &LockWordCell) {
        let thread_id = current_thread_id();
        let lockword = cell.load();
        let as_unlocked = lockword.as_unlocked();
        let as_locked = lockword.as_locked_once_by(thread_id);
        let answer = cell.compare_and_swap(as_unlocked, as_locked);
        if answer != as_unlocked {
            self.slow_path_monitor_enter(cell, answer, thread_id);
        }
    }

    /// Exit the monitor.
    pub fn monitor_exit(&self, cell: &LockWordCell) -> Result<(), MonitorError> {
        let thread_id = current_thread_id();
        let lockword = cell.load();
        let as_unlocked = lockword.as_unlocked();
        let as_locked = lockword.as_locked_once_by(thread_id);
        let answer = cell.compare_and_swap(as_locked, as_unlocked);
        if answer != as_locked {
            return self.slow_path_monitor_exit(cell, answer, thread_id);
        }
        Ok(())
    }

    fn slow_path_monitor_enter(&self, cell: &LockWordCell, lockword: LockWord, thread_id: u32) {
        let mut new_lockword = lockword;
        let mut retries = THIN_LOCK_RETRIES;
        loop {
            if new_lockword.is_thin() {
                let thin = new_lockword;
                if thin.owner_id() == thread_id && !thin.count_underflow() {
                    // Recursive enter.
                    if !thin.count_overflow() {
                        let answer = cell.compare_and_swap(thin, thin.increment_count());
                        if answer == thin {
                            return;
                        }
                        // An inflation or a new hashcode was installed.
                        new_lockword = answer;
                        continue;
                    }
                    // Count overflow: inflate below.
                } else {
                    let as_unlocked = thin.as_unlocked();
                    let as_locked = thin.as_locked_once_by(thread_id);
                    let answer = cell.compare_and_swap(as_unlocked, as_locked);
                    if answer == as_unlocked {
                        return;
                    }
                    // A hashcode, an inflation, or another thread got
                    // the lock.
                    new_lockword = answer;
                    retries -= 1;
                    if retries > 0 {
                        continue;
                    }
                    // Too much contention: inflate below.
                }
                new_lockword = self.inflate(cell, thin);
            }

            if self
                .delegate
                .delegate_monitor_enter(cell, new_lockword, thread_id)
            {
                return;
            }
            // The monitor was deflated; start over.
            new_lockword = cell.load();
            retries = THIN_LOCK_RETRIES;
        }
    }

    fn slow_path_monitor_exit(
        &self,
        cell: &LockWordCell,
        lockword: LockWord,
        thread_id: u32,
    ) -> Result<(), MonitorError> {
        if lockword.is_thin() {
            let mut thin = lockword;
            if thin.count_underflow() || thin.owner_id() != thread_id {
                return Err(MonitorError::IllegalMonitorState);
            }
            let is_release = thin.decrement_count().count_underflow();
            loop {
                let answer = if is_release {
                    cell.compare_and_swap(thin, thin.as_unlocked())
                } else {
                    cell.compare_and_swap(thin, thin.decrement_count())
                };
                if answer == thin {
                    return Ok(());
                }
                if answer.is_inflated() {
                    // Deflation cannot happen while we own the lock.
                    return self.delegate.delegate_monitor_exit(cell, answer);
                }
                // A hashcode was installed. Try again.
                thin = answer;
            }
        }
        self.delegate.delegate_monitor_exit(cell, lockword)
    }

    // =========================================================================
    // Inflation
    // =========================================================================

    /// Escalate a thin word to a heavyweight monitor.
    ///
    /// Prepares a monitor through the delegate, then races to install
    /// it. Losing to a concurrent inflation cancels the speculative
    /// monitor and adopts the winner's; any other concurrent change
    /// (hashcode, new owner, count) re-prepares against the fresh word
    /// and retries.
    fn inflate(&self, cell: &LockWordCell, lockword: LockWord) -> LockWord {
        let mut thin = lockword;
        let mut inflated = self.delegate.prepare_modal_lockword(cell, thin);
        loop {
            let answer = cell.compare_and_swap(thin, inflated);
            if answer == thin {
                break;
            }
            if answer.is_inflated() {
                self.delegate.cancel_prepared_modal_lockword(inflated);
                inflated = answer;
                break;
            }
            thin = answer;
            inflated = self.delegate.reprepare_modal_lockword(inflated, thin);
        }
        inflated
    }

    // =========================================================================
    // Hashcode
    // =========================================================================

    /// Return the object's identity hashcode, installing one on first
    /// use. Races install exactly one value: losers adopt the winner's.
    pub fn make_hash_code(&self, cell: &LockWordCell) -> u32 {
        let mut new_lockword = cell.load();
        let mut new_hashcode = 0;
        loop {
            if new_lockword.is_thin() {
                let thin = new_lockword;
                let hashcode = thin.hashcode();
                if hashcode != 0 {
                    return hashcode;
                }
                if new_hashcode == 0 {
                    new_hashcode = (self.hash_source)(cell);
                }
                let answer = cell.compare_and_swap(thin, thin.with_hashcode(new_hashcode));
                if answer == thin {
                    return new_hashcode;
                }
                // Another thread beat us to the hashcode, or an
                // inflation. Try again.
                new_lockword = answer;
                continue;
            }
            let hashcode = self.delegate.delegate_make_hashcode(cell, new_lockword);
            if hashcode != 0 {
                return hashcode;
            }
            // Possible deflation. Try again.
            new_lockword = cell.load();
        }
    }

    // =========================================================================
    // Notify / wait
    // =========================================================================

    /// Notify one or all waiters.
    ///
    /// On a thin word there can be no waiters: `monitor_wait` always
    /// inflates before parking, so a validated notify is a no-op.
    pub fn monitor_notify(&self, cell: &LockWordCell, all: bool) -> Result<(), MonitorError> {
        let lockword = cell.load();
        if lockword.is_thin() {
            if lockword.count_underflow() || lockword.owner_id() != current_thread_id() {
                return Err(MonitorError::IllegalMonitorState);
            }
            return Ok(());
        }
        self.delegate.delegate_monitor_notify(cell, all, lockword)
    }

    /// Wait on the monitor, inflating first: only inflated monitors own
    /// wait-queue machinery.
    pub fn monitor_wait(&self, cell: &LockWordCell, timeout_millis: u64) -> Result<(), MonitorError> {
        let lockword = cell.load();
        if lockword.is_thin() {
            if lockword.count_underflow() || lockword.owner_id() != current_thread_id() {
                return Err(MonitorError::IllegalMonitorState);
            }
            let inflated = self.inflate(cell, lockword);
            // Deflation cannot happen while we own the lock.
            return self
                .delegate
                .delegate_monitor_wait(cell, timeout_millis, inflated);
        }
        self.delegate
            .delegate_monitor_wait(cell, timeout_millis, lockword)
    }

    // =========================================================================
    // Queries and GC hooks
    // =========================================================================

    /// Whether `thread_id` currently holds the monitor.
    pub fn thread_holds_monitor(&self, cell: &LockWordCell, thread_id: u32) -> bool {
        let mut new_lockword = cell.load();
        loop {
            if new_lockword.is_thin() {
                let thin = new_lockword;
                return !thin.count_underflow() && thin.owner_id() == thread_id;
            }
            match self
                .delegate
                .delegate_thread_holds_monitor(cell, new_lockword, thread_id)
            {
                ThreadHoldsMonitorResult::True => return true,
                ThreadHoldsMonitorResult::False => return false,
                ThreadHoldsMonitorResult::NotThisMode => {}
            }
            // Deflation. Try again.
            new_lockword = cell.load();
        }
    }

    /// Forward the collector's pre-scan notification down the chain.
    pub fn before_garbage_collection(&self) {
        self.delegate.delegate_before_garbage_collection();
    }

    /// Forward the collector's post-phase notification down the chain.
    pub fn after_garbage_collection(&self) {
        self.delegate.delegate_after_garbage_collection();
    }
}

/// Default hashcode generator: a mixed address hash of the lock word
/// cell, never zero.
fn address_hash(cell: &LockWordCell) -> u32 {
    let mut x = cell as *const LockWordCell as usize as u64;
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    let hash = x as u32;
    if hash == 0 {
        1
    } else {
        hash
    }
}

// =============================================================================
// BiasedLockDelegate
// =============================================================================

/// The thin-lock state machine exposed through the [`ModeDelegate`]
/// interface, so a biased-locking layer can chain into it after
/// revoking a bias.
pub struct BiasedLockDelegate<D: ModeDelegate> {
    handler: ThinLockHandler<D>,
}

impl<D: ModeDelegate> BiasedLockDelegate<D> {
    /// Wrap a thin-lock handler as the next mode after bias revocation.
    pub fn new(handler: ThinLockHandler<D>) -> Self {
        Self { handler }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &ThinLockHandler<D> {
        &self.handler
    }
}

impl<D: ModeDelegate> ModeDelegate for BiasedLockDelegate<D> {
    fn delegate_monitor_enter(
        &self,
        cell: &LockWordCell,
        lockword: LockWord,
        thread_id: u32,
    ) -> bool {
        let as_unlocked = lockword.as_unlocked();
        let as_locked = lockword.as_locked_once_by(thread_id);
        let answer = cell.compare_and_swap(as_unlocked, as_locked);
        if answer != as_unlocked {
            self.handler.slow_path_monitor_enter(cell, answer, thread_id);
        }
        true
    }

    fn delegate_monitor_exit(
        &self,
        cell: &LockWordCell,
        lockword: LockWord,
    ) -> Result<(), MonitorError> {
        let thread_id = current_thread_id();
        let as_unlocked = lockword.as_unlocked();
        let as_locked = lockword.as_locked_once_by(thread_id);
        let answer = cell.compare_and_swap(as_locked, as_unlocked);
        if answer != as_locked {
            return self.handler.slow_path_monitor_exit(cell, answer, thread_id);
        }
        Ok(())
    }

    fn delegate_monitor_notify(
        &self,
        cell: &LockWordCell,
        all: bool,
        _lockword: LockWord,
    ) -> Result<(), MonitorError> {
        self.handler.monitor_notify(cell, all)
    }

    fn delegate_monitor_wait(
        &self,
        cell: &LockWordCell,
        timeout_millis: u64,
        _lockword: LockWord,
    ) -> Result<(), MonitorError> {
        self.handler.monitor_wait(cell, timeout_millis)
    }

    fn delegate_make_hashcode(&self, cell: &LockWordCell, _lockword: LockWord) -> u32 {
        self.handler.make_hash_code(cell)
    }

    fn delegate_thread_holds_monitor(
        &self,
        cell: &LockWordCell,
        _lockword: LockWord,
        thread_id: u32,
    ) -> ThreadHoldsMonitorResult {
        if self.handler.thread_holds_monitor(cell, thread_id) {
            ThreadHoldsMonitorResult::True
        } else {
            ThreadHoldsMonitorResult::False
        }
    }

    fn delegate_before_garbage_collection(&self) {
        self.handler.before_garbage_collection();
    }

    fn delegate_after_garbage_collection(&self) {
        self.handler.after_garbage_collection();
    }

    fn prepare_modal_lockword(&self, _cell: &LockWordCell, current: LockWord) -> LockWord {
        // A revoked bias becomes the equivalent thin word; an unheld
        // bias carries no owner at all.
        if current.count_underflow() {
            current.as_unlocked()
        } else {
            current
        }
    }

    fn cancel_prepared_modal_lockword(&self, _prepared: LockWord) {
        // Nothing to unbind: preparation allocated nothing.
    }

    fn reprepare_modal_lockword(&self, _prepared: LockWord, current: LockWord) -> LockWord {
        if current.count_underflow() {
            current.as_unlocked()
        } else {
            current
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Condvar, Mutex};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// A heavyweight monitor standing in for the (external) inflated
    /// mode: a mutex/condvar pair tracking owner and recursion.
    struct FakeMonitor {
        state: Mutex<(u32, u32)>, // (owner, count)
        condvar: Condvar,
        canceled: AtomicBool,
        hash: AtomicUsize,
    }

    /// Delegate binding [`FakeMonitor`]s behind the inflation protocol.
    #[derive(Default)]
    struct FakeInflatedMode {
        monitors: Mutex<Vec<Arc<FakeMonitor>>>,
        preparations: AtomicUsize,
        cancellations: AtomicUsize,
        gc_hook_calls: AtomicUsize,
    }

    impl FakeInflatedMode {
        fn monitor(&self, lockword: LockWord) -> Arc<FakeMonitor> {
            self.monitors.lock()[lockword.monitor_ref() as usize - 1].clone()
        }

        fn live_monitors(&self) -> usize {
            self.monitors
                .lock()
                .iter()
                .filter(|m| !m.canceled.load(Ordering::Acquire))
                .count()
        }
    }

    impl ModeDelegate for FakeInflatedMode {
        fn delegate_monitor_enter(
            &self,
            _cell: &LockWordCell,
            lockword: LockWord,
            thread_id: u32,
        ) -> bool {
            if !lockword.is_inflated() {
                return false;
            }
            let monitor = self.monitor(lockword);
            let mut state = monitor.state.lock();
            while state.0 != 0 && state.0 != thread_id {
                monitor.condvar.wait(&mut state);
            }
            state.0 = thread_id;
            state.1 += 1;
            true
        }

        fn delegate_monitor_exit(
            &self,
            _cell: &LockWordCell,
            lockword: LockWord,
        ) -> Result<(), MonitorError> {
            let thread_id = current_thread_id();
            let monitor = self.monitor(lockword);
            let mut state = monitor.state.lock();
            if state.0 != thread_id {
                return Err(MonitorError::IllegalMonitorState);
            }
            state.1 -= 1;
            if state.1 == 0 {
                state.0 = 0;
                monitor.condvar.notify_all();
            }
            Ok(())
        }

        fn delegate_monitor_notify(
            &self,
            _cell: &LockWordCell,
            _all: bool,
            lockword: LockWord,
        ) -> Result<(), MonitorError> {
            let monitor = self.monitor(lockword);
            let state = monitor.state.lock();
            if state.0 != current_thread_id() {
                return Err(MonitorError::IllegalMonitorState);
            }
            monitor.condvar.notify_all();
            Ok(())
        }

        fn delegate_monitor_wait(
            &self,
            _cell: &LockWordCell,
            timeout_millis: u64,
            lockword: LockWord,
        ) -> Result<(), MonitorError> {
            let thread_id = current_thread_id();
            let monitor = self.monitor(lockword);
            let mut state = monitor.state.lock();
            if state.0 != thread_id {
                return Err(MonitorError::IllegalMonitorState);
            }
            let saved_count = state.1;
            state.0 = 0;
            state.1 = 0;
            monitor.condvar.notify_all();
            let _ = monitor
                .condvar
                .wait_for(&mut state, Duration::from_millis(timeout_millis.max(1)));
            while state.0 != 0 {
                let _ = monitor
                    .condvar
                    .wait_for(&mut state, Duration::from_millis(10));
            }
            state.0 = thread_id;
            state.1 = saved_count;
            Ok(())
        }

        fn delegate_make_hashcode(&self, _cell: &LockWordCell, lockword: LockWord) -> u32 {
            if !lockword.is_inflated() {
                return 0;
            }
            self.monitor(lockword).hash.load(Ordering::Acquire) as u32
        }

        fn delegate_thread_holds_monitor(
            &self,
            _cell: &LockWordCell,
            lockword: LockWord,
            thread_id: u32,
        ) -> ThreadHoldsMonitorResult {
            if !lockword.is_inflated() {
                return ThreadHoldsMonitorResult::NotThisMode;
            }
            if self.monitor(lockword).state.lock().0 == thread_id {
                ThreadHoldsMonitorResult::True
            } else {
                ThreadHoldsMonitorResult::False
            }
        }

        fn delegate_before_garbage_collection(&self) {
            self.gc_hook_calls.fetch_add(1, Ordering::Relaxed);
        }

        fn delegate_after_garbage_collection(&self) {
            self.gc_hook_calls.fetch_add(1, Ordering::Relaxed);
        }

        fn prepare_modal_lockword(&self, _cell: &LockWordCell, current: LockWord) -> LockWord {
            self.preparations.fetch_add(1, Ordering::AcqRel);
            let (owner, count) = if current.count_underflow() {
                (0, 0)
            } else {
                (current.owner_id(), current.recursion_count() as u32)
            };
            let hash = if current.hashcode() != 0 {
                current.hashcode()
            } else {
                0x5EED
            };
            let monitor = Arc::new(FakeMonitor {
                state: Mutex::new((owner, count)),
                condvar: Condvar::new(),
                canceled: AtomicBool::new(false),
                hash: AtomicUsize::new(hash as usize),
            });
            let mut monitors = self.monitors.lock();
            monitors.push(monitor);
            LockWord::inflated(monitors.len() as u64)
        }

        fn cancel_prepared_modal_lockword(&self, prepared: LockWord) {
            self.cancellations.fetch_add(1, Ordering::AcqRel);
            self.monitor(prepared).canceled.store(true, Ordering::Release);
        }

        fn reprepare_modal_lockword(&self, prepared: LockWord, current: LockWord) -> LockWord {
            let monitor = self.monitor(prepared);
            let mut state = monitor.state.lock();
            if current.count_underflow() {
                *state = (0, 0);
            } else {
                *state = (current.owner_id(), current.recursion_count() as u32);
            }
            if current.hashcode() != 0 {
                monitor
                    .hash
                    .store(current.hashcode() as usize, Ordering::Release);
            }
            prepared
        }
    }

    fn handler() -> ThinLockHandler<FakeInflatedMode> {
        ThinLockHandler::new(FakeInflatedMode::default())
    }

    #[test]
    fn test_fast_path_enter_exit() {
        let handler = handler();
        let cell = LockWordCell::new();

        handler.monitor_enter(&cell);
        let word = cell.load();
        assert!(word.is_thin());
        assert_eq!(word.owner_id(), current_thread_id());
        assert_eq!(word.recursion_count(), 1);
        assert!(handler.thread_holds_monitor(&cell, current_thread_id()));

        handler.monitor_exit(&cell).expect("exit");
        assert!(cell.load().count_underflow());
        assert!(!handler.thread_holds_monitor(&cell, current_thread_id()));
    }

    #[test]
    fn test_recursive_enter_and_exit() {
        let handler = handler();
        let cell = LockWordCell::new();

        for expected in 1..=4u64 {
            handler.monitor_enter(&cell);
            assert_eq!(cell.load().recursion_count(), expected);
        }
        for expected in (0..=3u64).rev() {
            handler.monitor_exit(&cell).expect("exit");
            assert_eq!(cell.load().recursion_count(), expected);
        }
        // Count is back to zero exactly when the last exit completes.
        assert_eq!(cell.load(), LockWord::UNLOCKED);
    }

    #[test]
    fn test_exit_without_ownership_is_an_error() {
        let handler = handler();
        let cell = LockWordCell::new();
        assert_eq!(
            handler.monitor_exit(&cell),
            Err(MonitorError::IllegalMonitorState)
        );

        // A thread that never entered cannot exit someone else's lock.
        handler.monitor_enter(&cell);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(
                    handler.monitor_exit(&cell),
                    Err(MonitorError::IllegalMonitorState)
                );
            });
        });
        handler.monitor_exit(&cell).expect("exit");
    }

    #[test]
    fn test_recursion_overflow_inflates() {
        let handler = handler();
        let cell = LockWordCell::new();

        handler.monitor_enter(&cell);
        while cell.load().is_thin() && !cell.load().count_overflow() {
            handler.monitor_enter(&cell);
        }
        // One more enter trips the overflow and escalates.
        handler.monitor_enter(&cell);
        assert!(cell.load().is_inflated());
        assert!(handler.thread_holds_monitor(&cell, current_thread_id()));

        // The inflated monitor carried the recursion over; unwind it.
        while handler.thread_holds_monitor(&cell, current_thread_id()) {
            handler.monitor_exit(&cell).expect("exit");
        }
    }

    #[test]
    fn test_hashcode_is_installed_once() {
        let handler = handler();
        let cell = LockWordCell::new();

        let first = handler.make_hash_code(&cell);
        assert_ne!(first, 0);
        assert_eq!(handler.make_hash_code(&cell), first);

        // Locking does not disturb the hashcode.
        handler.monitor_enter(&cell);
        assert_eq!(handler.make_hash_code(&cell), first);
        handler.monitor_exit(&cell).expect("exit");
        assert_eq!(handler.make_hash_code(&cell), first);
    }

    #[test]
    fn test_hashcode_survives_inflation() {
        let handler = handler();
        let cell = LockWordCell::new();

        let hash = handler.make_hash_code(&cell);
        handler.monitor_enter(&cell);
        handler.monitor_wait(&cell, 1).expect("wait");
        assert!(cell.load().is_inflated());
        assert_eq!(handler.make_hash_code(&cell), hash);
        handler.monitor_exit(&cell).expect("exit");
    }

    #[test]
    fn test_notify_on_thin_lock_is_validated_noop() {
        let handler = handler();
        let cell = LockWordCell::new();

        // Unowned notify is the user's error.
        assert_eq!(
            handler.monitor_notify(&cell, false),
            Err(MonitorError::IllegalMonitorState)
        );

        // Owned notify on a thin word succeeds without inflating: wait
        // always inflates first, so a thin word cannot have waiters.
        handler.monitor_enter(&cell);
        handler.monitor_notify(&cell, true).expect("notify");
        assert!(cell.load().is_thin());
        handler.monitor_exit(&cell).expect("exit");
    }

    #[test]
    fn test_wait_always_inflates() {
        let handler = handler();
        let cell = LockWordCell::new();

        assert_eq!(
            handler.monitor_wait(&cell, 1),
            Err(MonitorError::IllegalMonitorState)
        );

        handler.monitor_enter(&cell);
        assert!(cell.load().is_thin());
        handler.monitor_wait(&cell, 1).expect("wait");
        assert!(cell.load().is_inflated());
        assert_eq!(handler.delegate().preparations.load(Ordering::Relaxed), 1);
        handler.monitor_exit(&cell).expect("exit");
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        // A non-atomic counter that only mutual exclusion keeps correct.
        struct Racy(std::cell::UnsafeCell<u64>);
        unsafe impl Sync for Racy {}

        const THREADS: usize = 4;
        const ITERATIONS: u64 = 200;

        let handler = handler();
        let cell = LockWordCell::new();
        let counter = Racy(std::cell::UnsafeCell::new(0));
        let in_critical_section = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..ITERATIONS {
                        handler.monitor_enter(&cell);
                        assert!(
                            !in_critical_section.swap(true, Ordering::AcqRel),
                            "two threads inside the critical section"
                        );
                        unsafe { *counter.0.get() += 1 };
                        in_critical_section.store(false, Ordering::Release);
                        handler.monitor_exit(&cell).expect("exit");
                    }
                });
            }
        });

        assert_eq!(unsafe { *counter.0.get() }, THREADS as u64 * ITERATIONS);
        // Fully released: no thread owns it anymore.
        assert!(!handler.thread_holds_monitor(&cell, current_thread_id()));
    }

    #[test]
    fn test_inflation_is_idempotent_under_racing() {
        let handler = handler();
        let cell = LockWordCell::new();

        // Heavy contention forces competing inflation attempts.
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        handler.monitor_enter(&cell);
                        std::hint::spin_loop();
                        handler.monitor_exit(&cell).expect("exit");
                    }
                });
            }
        });

        let delegate = handler.delegate();
        let preparations = delegate.preparations.load(Ordering::Relaxed);
        let cancellations = delegate.cancellations.load(Ordering::Relaxed);
        if cell.load().is_inflated() {
            // Exactly one speculative monitor survived; every loser in
            // the install race was canceled.
            assert_eq!(preparations, cancellations + 1);
            assert_eq!(delegate.live_monitors(), 1);
        } else {
            // Never inflated: nothing prepared, or everything canceled.
            assert_eq!(preparations, cancellations);
        }
    }

    #[test]
    fn test_biased_delegate_chains_to_thin_protocol() {
        let biased = BiasedLockDelegate::new(handler());
        let cell = LockWordCell::new();
        let thread_id = current_thread_id();

        // An unheld revoked bias prepares down to the plain unlocked
        // thin word.
        let unheld = LockWord::unlocked_with_hashcode(0xAB);
        let prepared = biased.prepare_modal_lockword(&cell, unheld);
        assert!(prepared.is_thin());
        assert!(prepared.count_underflow());
        assert_eq!(prepared.hashcode(), 0xAB);

        // Enter/exit through the delegate interface drive the same CAS
        // protocol.
        assert!(biased.delegate_monitor_enter(&cell, cell.load(), thread_id));
        assert_eq!(cell.load().owner_id(), thread_id);
        biased
            .delegate_monitor_exit(&cell, cell.load())
            .expect("exit");
        assert!(cell.load().count_underflow());
    }

    #[test]
    fn test_gc_hooks_reach_the_delegate() {
        let handler = handler();
        handler.before_garbage_collection();
        handler.after_garbage_collection();
        assert_eq!(handler.delegate().gc_hook_calls.load(Ordering::Relaxed), 2);
    }
}
