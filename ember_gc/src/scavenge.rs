//! The copying scavenger: moves reachable objects between belts.
//!
//! One scavenger is created per collection phase, bound to a `from` belt
//! (being emptied) and a `to` belt (receiving survivors). Slots arrive
//! from root scanners and card scans; each referent found in the from
//! belt is copied once, the slot is updated, and the copy is scanned in
//! turn until no gray objects remain.
//!
//! # Forwarding
//!
//! Copied-object forwarding lives in a side map rather than in object
//! headers, keyed by the old cell address. The map is concurrent so the
//! parallel drain can claim copies with a single shard-locked entry
//! lookup: exactly one worker copies any given object, losers adopt the
//! winner's address.
//!
//! # Draining
//!
//! - **Linear**: a Cheney scan pointer walks the to belt from its phase
//!   snapshot; copies land beyond the pointer and are scanned when it
//!   reaches them.
//! - **Parallel**: copies are pushed onto a shared gray queue; a pool of
//!   workers started and joined inside the phase drains it. No worker
//!   survives the phase.
//!
//! Copy-reserve exhaustion mid-phase is recorded and surfaced at the end
//! of the phase; the object stays in place and the collection fails with
//! an out-of-memory condition.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::belt::Belt;
use crate::object_model::ObjectModel;
use crate::roots::SlotVisitor;

/// Per-phase copying engine.
pub struct Scavenger<'a> {
    object_model: &'a dyn ObjectModel,
    from: &'a Belt,
    to: &'a Belt,
    /// Old cell address → new cell address.
    forwarding: DashMap<usize, usize, FxBuildHasher>,
    /// Gray queue for the parallel drain.
    queue: Mutex<VecDeque<usize>>,
    /// Queued-but-unscanned cell count; drives worker termination.
    pending: AtomicUsize,
    parallel: bool,
    oom: AtomicBool,
    bytes_copied: AtomicU64,
    objects_copied: AtomicU64,
}

impl<'a> Scavenger<'a> {
    /// Create a scavenger moving survivors of `from` into `to`.
    pub fn new(
        object_model: &'a dyn ObjectModel,
        from: &'a Belt,
        to: &'a Belt,
        parallel: bool,
    ) -> Self {
        Self {
            object_model,
            from,
            to,
            forwarding: DashMap::with_hasher(FxBuildHasher),
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            parallel,
            oom: AtomicBool::new(false),
            bytes_copied: AtomicU64::new(0),
            objects_copied: AtomicU64::new(0),
        }
    }

    /// Process one slot: if it refers into the from belt, copy the
    /// referent (or find its forwarding) and update the slot.
    pub fn process_slot(&self, slot_addr: usize) {
        let target = unsafe { *(slot_addr as *const usize) };
        if target == 0 || !self.from.contains(target) {
            return;
        }
        let new = self.copy(target);
        if new != target {
            unsafe { *(slot_addr as *mut usize) = new };
        }
    }

    /// Copy `old` into the to belt, or return its existing forwarding.
    ///
    /// On copy-reserve exhaustion the out-of-memory flag is set and the
    /// object stays at `old`.
    fn copy(&self, old: usize) -> usize {
        use dashmap::mapref::entry::Entry;
        match self.forwarding.entry(old) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let size = self.object_model.size_of(old);
                let Some(new) = self.to.alloc(size) else {
                    self.oom.store(true, Ordering::Release);
                    return old;
                };
                unsafe {
                    std::ptr::copy_nonoverlapping(old as *const u8, new as *mut u8, size);
                }
                entry.insert(new);
                self.bytes_copied.fetch_add(size as u64, Ordering::Relaxed);
                self.objects_copied.fetch_add(1, Ordering::Relaxed);
                if self.parallel {
                    self.pending.fetch_add(1, Ordering::AcqRel);
                    self.queue.lock().push_back(new);
                }
                new
            }
        }
    }

    /// Scan one cell's reference slots.
    pub(crate) fn scan_cell(&self, cell: usize) {
        let mut slots: SmallVec<[usize; 8]> = SmallVec::new();
        self.object_model
            .visit_reference_slots(cell, &mut |slot| slots.push(slot));
        for slot in slots {
            self.process_slot(slot);
        }
    }

    /// Drain gray objects with a single Cheney scan over the to belt,
    /// starting at its phase snapshot.
    pub fn drain_linear(&self) {
        debug_assert!(!self.parallel);
        let mut scan = self.to.allocation_mark_snapshot();
        while scan < self.to.allocation_mark() {
            let size = self.object_model.size_of(scan);
            self.scan_cell(scan);
            scan += size;
        }
    }

    /// Drain gray objects with `workers` threads, started here and
    /// joined before returning.
    pub fn drain_parallel(&self, workers: usize) {
        debug_assert!(self.parallel);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker_loop());
            }
        });
    }

    fn worker_loop(&self) {
        loop {
            let cell = self.queue.lock().pop_front();
            match cell {
                Some(cell) => {
                    self.scan_cell(cell);
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    if self.pending.load(Ordering::Acquire) == 0 {
                        return;
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Whether the copy reserve ran out during this phase.
    pub fn hit_copy_reserve(&self) -> bool {
        self.oom.load(Ordering::Acquire)
    }

    /// Bytes copied this phase.
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }

    /// Objects copied this phase.
    pub fn objects_copied(&self) -> u64 {
        self.objects_copied.load(Ordering::Relaxed)
    }

    /// New address of `old`, if it was copied this phase.
    pub fn forwarding_of(&self, old: usize) -> Option<usize> {
        self.forwarding.get(&old).map(|entry| *entry)
    }
}

impl SlotVisitor for Scavenger<'_> {
    fn visit_slot(&mut self, slot_addr: usize) {
        self.process_slot(slot_addr);
    }
}

// Scanners run on the collector thread while workers drain; everything
// shared is behind atomics, the mutex, or the concurrent map.
impl SlotVisitor for &Scavenger<'_> {
    fn visit_slot(&mut self, slot_addr: usize) {
        self.process_slot(slot_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belt::BeltManager;
    use crate::config::GcConfig;
    use crate::object_model::testing::{TestObjectModel, WORD};

    /// Allocate a linked chain of `len` objects in `belt`, returning the
    /// head cell and one slot holding it.
    fn build_chain(belt: &Belt, len: usize) -> usize {
        let mut next = 0usize;
        for _ in 0..len {
            let cell = belt.alloc(WORD * 3).expect("belt alloc");
            unsafe { TestObjectModel::write_object(cell, &[next], 1) };
            next = cell;
        }
        next
    }

    #[test]
    fn test_scavenge_copies_transitive_closure() {
        let manager = BeltManager::new(&GcConfig::small());
        let model = TestObjectModel;

        let head = build_chain(manager.eden(), 5);
        let mut root_slot = head;
        let slot_addr = &mut root_slot as *mut usize as usize;

        manager.to().set_allocation_mark_snapshot();
        let scavenger = Scavenger::new(&model, manager.eden(), manager.to(), false);
        scavenger.process_slot(slot_addr);
        scavenger.drain_linear();

        assert_eq!(scavenger.objects_copied(), 5);
        assert!(manager.to().contains(root_slot));
        assert!(!scavenger.hit_copy_reserve());

        // The whole chain now lives in to-space with updated links.
        let mut cell = root_slot;
        let mut seen = 0;
        while cell != 0 {
            assert!(manager.to().contains(cell));
            cell = unsafe { TestObjectModel::read_ref(cell, 0) };
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_unreachable_objects_not_copied() {
        let manager = BeltManager::new(&GcConfig::small());
        let model = TestObjectModel;

        build_chain(manager.eden(), 4);
        let reachable = build_chain(manager.eden(), 1);
        let mut root_slot = reachable;
        let slot_addr = &mut root_slot as *mut usize as usize;

        manager.to().set_allocation_mark_snapshot();
        let scavenger = Scavenger::new(&model, manager.eden(), manager.to(), false);
        scavenger.process_slot(slot_addr);
        scavenger.drain_linear();

        assert_eq!(scavenger.objects_copied(), 1);
    }

    #[test]
    fn test_shared_object_copied_once() {
        let manager = BeltManager::new(&GcConfig::small());
        let model = TestObjectModel;

        let shared = manager.eden().alloc(WORD * 2).expect("alloc");
        unsafe { TestObjectModel::write_object(shared, &[], 1) };
        let left = manager.eden().alloc(WORD * 2).expect("alloc");
        unsafe { TestObjectModel::write_object(left, &[shared], 0) };
        let right = manager.eden().alloc(WORD * 2).expect("alloc");
        unsafe { TestObjectModel::write_object(right, &[shared], 0) };

        let mut roots = [left, right];
        manager.to().set_allocation_mark_snapshot();
        let scavenger = Scavenger::new(&model, manager.eden(), manager.to(), false);
        for slot in roots.iter_mut() {
            scavenger.process_slot(slot as *mut usize as usize);
        }
        scavenger.drain_linear();

        assert_eq!(scavenger.objects_copied(), 3);
        let left_target = unsafe { TestObjectModel::read_ref(roots[0], 0) };
        let right_target = unsafe { TestObjectModel::read_ref(roots[1], 0) };
        assert_eq!(left_target, right_target);
    }

    #[test]
    fn test_slots_outside_from_belt_untouched() {
        let manager = BeltManager::new(&GcConfig::small());
        let model = TestObjectModel;

        let mature_cell = manager.mature().alloc(WORD * 2).expect("alloc");
        unsafe { TestObjectModel::write_object(mature_cell, &[], 1) };

        let mut root_slot = mature_cell;
        let scavenger = Scavenger::new(&model, manager.eden(), manager.to(), false);
        scavenger.process_slot(&mut root_slot as *mut usize as usize);

        assert_eq!(root_slot, mature_cell);
        assert_eq!(scavenger.objects_copied(), 0);
    }

    #[test]
    fn test_parallel_drain_matches_linear() {
        let manager = BeltManager::new(&GcConfig::small());
        let model = TestObjectModel;

        let head = build_chain(manager.eden(), 64);
        let mut root_slot = head;

        manager.to().set_allocation_mark_snapshot();
        let scavenger = Scavenger::new(&model, manager.eden(), manager.to(), true);
        scavenger.process_slot(&mut root_slot as *mut usize as usize);
        scavenger.drain_parallel(4);

        assert_eq!(scavenger.objects_copied(), 64);
        let mut cell = root_slot;
        let mut seen = 0;
        while cell != 0 {
            assert!(manager.to().contains(cell));
            cell = unsafe { TestObjectModel::read_ref(cell, 0) };
            seen += 1;
        }
        assert_eq!(seen, 64);
    }
}
