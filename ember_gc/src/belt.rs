//! Belts: contiguous bump-allocated heap regions.
//!
//! A belt has a fixed span and a monotonic allocation mark advanced by
//! compare-and-swap, so mutator threads (through TLAB refills) and
//! parallel scavenger workers can all claim space without locking:
//!
//! ```text
//! start            mark                end
//!   │   allocated   │       free       │
//!   └───────────────┴──────────────────┘
//! ```
//!
//! The invariant `start <= mark <= limit` holds at all times. The limit
//! is normally the belt's end; during a major collection eden is made
//! *expandable* so mature survivors can spill past eden's end into the
//! copy reserve, bounded by a hard limit.

use std::alloc::Layout;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::GcConfig;
use crate::{align_up, OBJECT_ALIGNMENT};

/// One contiguous bump-allocated region of the heap.
#[derive(Debug)]
pub struct Belt {
    /// Name shown in verbose collection traces.
    label: &'static str,
    /// First byte of the span.
    start: usize,
    /// One past the last byte of the span.
    end: usize,
    /// Absolute allocation ceiling while expandable.
    hard_limit: usize,
    /// Current allocation mark.
    mark: AtomicUsize,
    /// Mark captured at the start of a collection phase; bounds "objects
    /// that existed before this phase".
    snapshot: AtomicUsize,
    /// Bound on in-flight promotion so mutator allocation cannot race
    /// past the collector's frontier.
    stop_address: AtomicUsize,
    /// Whether allocation may currently run past `end` up to
    /// `hard_limit`.
    expandable: AtomicBool,
}

impl Belt {
    /// Create a belt over `[start, end)` with the given expansion
    /// ceiling.
    pub fn new(label: &'static str, start: usize, end: usize, hard_limit: usize) -> Self {
        assert!(start <= end && end <= hard_limit);
        assert_eq!(start % OBJECT_ALIGNMENT, 0);
        Self {
            label,
            start,
            end,
            hard_limit,
            mark: AtomicUsize::new(start),
            snapshot: AtomicUsize::new(start),
            stop_address: AtomicUsize::new(start),
            expandable: AtomicBool::new(false),
        }
    }

    /// The belt's display name.
    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// First byte of the span.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last byte of the span.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Span size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Current allocation mark.
    #[inline]
    pub fn allocation_mark(&self) -> usize {
        self.mark.load(Ordering::Acquire)
    }

    /// Bytes allocated.
    #[inline]
    pub fn used(&self) -> usize {
        self.allocation_mark() - self.start
    }

    /// Bytes remaining below the belt's logical end.
    #[inline]
    pub fn free(&self) -> usize {
        self.end.saturating_sub(self.allocation_mark())
    }

    /// Whether `addr` lies in the allocated portion of this belt.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.allocation_mark()
    }

    /// Whether `addr` lies anywhere in the belt's span.
    #[inline]
    pub fn span_contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Bump-allocate `size` bytes, returning the cell address.
    ///
    /// Returns `None` when the belt (or, if expandable, its hard limit)
    /// is exhausted.
    #[inline]
    pub fn alloc(&self, size: usize) -> Option<usize> {
        let size = align_up(size, OBJECT_ALIGNMENT);
        let limit = if self.expandable.load(Ordering::Relaxed) {
            self.hard_limit
        } else {
            self.end
        };
        loop {
            let current = self.mark.load(Ordering::Relaxed);
            let next = current.checked_add(size)?;
            if next > limit {
                return None;
            }
            if self
                .mark
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current);
            }
        }
    }

    /// Reset the allocation mark to the belt start, emptying the belt.
    ///
    /// Only the collector calls this, with mutators parked.
    pub fn reset_allocation_mark(&self) {
        self.mark.store(self.start, Ordering::Release);
        self.snapshot.store(self.start, Ordering::Release);
    }

    /// Capture the current mark as the phase snapshot.
    pub fn set_allocation_mark_snapshot(&self) {
        self.snapshot
            .store(self.allocation_mark(), Ordering::Release);
    }

    /// The mark captured by [`set_allocation_mark_snapshot`].
    ///
    /// [`set_allocation_mark_snapshot`]: Belt::set_allocation_mark_snapshot
    #[inline]
    pub fn allocation_mark_snapshot(&self) -> usize {
        self.snapshot.load(Ordering::Acquire)
    }

    /// Set the promotion frontier.
    pub fn set_stop_address(&self, addr: usize) {
        self.stop_address.store(addr, Ordering::Release);
    }

    /// The promotion frontier.
    #[inline]
    pub fn stop_address(&self) -> usize {
        self.stop_address.load(Ordering::Acquire)
    }

    /// Allow or forbid allocation past the belt's logical end.
    pub fn set_expandable(&self, expandable: bool) {
        self.expandable.store(expandable, Ordering::Release);
    }

    /// Check the belt's structural invariant.
    pub fn check_invariant(&self) {
        let mark = self.allocation_mark();
        let limit = if self.expandable.load(Ordering::Relaxed) {
            self.hard_limit
        } else {
            self.end
        };
        assert!(
            self.start <= mark && mark <= limit,
            "belt {}: mark {:#x} outside [{:#x}, {:#x}]",
            self.label,
            mark,
            self.start,
            limit,
        );
    }
}

// =============================================================================
// BeltManager
// =============================================================================

/// Owns the heap backing memory and carves it into the three belts.
///
/// Layout is contiguous, eden first, so an expandable eden can spill
/// directly into the adjacent copy reserve:
///
/// ```text
/// ┌────────┬───────────┬─────────────────────┐
/// │  eden  │  to-space │     mature space    │
/// └────────┴───────────┴─────────────────────┘
/// ```
#[derive(Debug)]
pub struct BeltManager {
    base: *mut u8,
    layout: Layout,
    eden: Belt,
    to: Belt,
    mature: Belt,
}

// Safety: the raw base pointer is only used for deallocation; all access
// goes through the belts' atomic marks.
unsafe impl Send for BeltManager {}
unsafe impl Sync for BeltManager {}

impl BeltManager {
    /// Allocate the heap and carve the belts per `config`.
    pub fn new(config: &GcConfig) -> Self {
        let total = config.total_heap_size();
        let layout = Layout::from_size_align(total, OBJECT_ALIGNMENT).expect("bad heap layout");
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            panic!("failed to reserve {} byte heap", total);
        }

        let eden_start = base as usize;
        let to_start = eden_start + config.eden_size;
        let mature_start = to_start + config.to_size;
        let heap_end = mature_start + config.mature_size;

        Self {
            base,
            layout,
            // Eden's expansion ceiling is the end of the copy reserve.
            eden: Belt::new("eden", eden_start, to_start, mature_start),
            to: Belt::new("to", to_start, mature_start, mature_start),
            mature: Belt::new("mature", mature_start, heap_end, heap_end),
        }
    }

    /// The eden belt.
    #[inline]
    pub fn eden(&self) -> &Belt {
        &self.eden
    }

    /// The to-space belt.
    #[inline]
    pub fn to(&self) -> &Belt {
        &self.to
    }

    /// The mature-space belt.
    #[inline]
    pub fn mature(&self) -> &Belt {
        &self.mature
    }

    /// Whole-heap span, for card-table sizing and verification.
    pub fn heap_span(&self) -> (usize, usize) {
        (self.eden.start(), self.mature.end())
    }
}

impl Drop for BeltManager {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}
