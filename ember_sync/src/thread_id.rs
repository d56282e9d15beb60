//! Thread ids as encoded in lock words.
//!
//! Ids are assigned lazily, once per thread, starting at 1: a zero owner
//! field in a lock word always means "unlocked", never a real thread.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::lock_word::LockWord;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: u32 = next_thread_id();
}

fn next_thread_id() -> u32 {
    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    assert!(
        id <= LockWord::MAX_OWNER_ID,
        "thread id space exhausted ({} threads)",
        LockWord::MAX_OWNER_ID,
    );
    id
}

/// The calling thread's lock-word id (always ≥ 1).
#[inline]
pub fn current_thread_id() -> u32 {
    THREAD_ID.with(|id| *id)
}
