//! The three-belt generational collection driver.
//!
//! [`GenerationalHeap::collect`] escalates through eden, to-space, and
//! major collection phases; escalation is strictly one-directional within
//! a single call. Every phase follows the same protocol:
//!
//! 1. snapshot the target belt's allocation mark,
//! 2. notify the monitor scheme (`before_garbage_collection`),
//! 3. scan roots, the boot heap, compiled code, and (eden/to phases)
//!    dirty cards of the older belts,
//! 4. move every reachable object out of the collected belt,
//! 5. restore the scavenge side table, reset the collected belt's mark,
//!    and notify the monitor scheme again.
//!
//! A major collection is a two-way exchange: mature survivors are first
//! evacuated into an *expandable* eden (spilling into the copy reserve if
//! needed), mature space is reset, and the survivors are copied back,
//! compacted. If the survivors outgrow the copy reserve the collection
//! fails with a fatal out-of-memory condition.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::belt::{Belt, BeltManager};
use crate::card_table::CardTable;
use crate::config::GcConfig;
use crate::object_model::ObjectModel;
use crate::roots::{MonitorGcHooks, NoopMonitorHooks, NoopScanner, RootScanner};
use crate::scavenge::Scavenger;
use crate::side_table::SideTable;
use crate::stats::CollectorStats;
use crate::tlab::Tlab;
use crate::verify::HeapVerifier;
use crate::OutOfMemoryError;

/// The generational beltway heap.
pub struct GenerationalHeap {
    config: GcConfig,
    belts: BeltManager,
    card_table: CardTable,
    side_table: SideTable,
    stats: CollectorStats,
    object_model: Box<dyn ObjectModel>,
    root_scanner: Box<dyn RootScanner>,
    boot_heap_scanner: Box<dyn RootScanner>,
    code_scanner: Box<dyn RootScanner>,
    monitor_hooks: Box<dyn MonitorGcHooks>,
    /// Guards against re-entering the collector.
    in_gc: AtomicBool,
    /// Guards against overlapping scavenge phases.
    in_scavenging: AtomicBool,
}

impl GenerationalHeap {
    /// Create a heap with the given configuration and object model.
    /// Scanners and monitor hooks default to no-ops; wire the real ones
    /// with the setters below.
    pub fn new(config: GcConfig, object_model: Box<dyn ObjectModel>) -> Self {
        config.validate().expect("invalid GC configuration");
        let belts = BeltManager::new(&config);
        let (heap_start, heap_end) = belts.heap_span();
        let card_table = CardTable::new(heap_start, heap_end - heap_start, config.card_shift);
        let side_table = SideTable::new(heap_start, heap_end - heap_start, config.tlab_size);
        Self {
            config,
            belts,
            card_table,
            side_table,
            stats: CollectorStats::new(),
            object_model,
            root_scanner: Box::new(NoopScanner),
            boot_heap_scanner: Box::new(NoopScanner),
            code_scanner: Box::new(NoopScanner),
            monitor_hooks: Box::new(NoopMonitorHooks),
            in_gc: AtomicBool::new(false),
            in_scavenging: AtomicBool::new(false),
        }
    }

    /// Install the thread-stack root scanner.
    pub fn set_root_scanner(&mut self, scanner: Box<dyn RootScanner>) {
        self.root_scanner = scanner;
    }

    /// Install the boot-heap scanner.
    pub fn set_boot_heap_scanner(&mut self, scanner: Box<dyn RootScanner>) {
        self.boot_heap_scanner = scanner;
    }

    /// Install the compiled-code scanner.
    pub fn set_code_scanner(&mut self, scanner: Box<dyn RootScanner>) {
        self.code_scanner = scanner;
    }

    /// Install the monitor scheme's GC hooks.
    pub fn set_monitor_hooks(&mut self, hooks: Box<dyn MonitorGcHooks>) {
        self.monitor_hooks = hooks;
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Bump-allocate `size` bytes in eden. `None` means a collection is
    /// needed.
    #[inline]
    pub fn allocate(&self, size: usize) -> Option<usize> {
        self.belts.eden().alloc(size)
    }

    /// Claim a TLAB-sized slice of eden for a mutator thread.
    pub fn allocate_tlab(&self) -> Option<Tlab> {
        let start = self.belts.eden().alloc(self.config.tlab_size)?;
        self.side_table.mark_start(start);
        Some(Tlab::new(start, self.config.tlab_size))
    }

    /// Retire a TLAB before collection: pad its unused tail so the belt
    /// stays parseable, and record its chunk in the side table.
    pub fn retire_tlab(&self, tlab: &mut Tlab) {
        tlab.fill(&*self.object_model);
        self.side_table.mark_start(tlab.start());
    }

    /// Write barrier: record that the object at `addr` was mutated.
    #[inline]
    pub fn record_write(&self, addr: usize) {
        self.card_table.mark(addr);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The eden belt.
    pub fn eden(&self) -> &Belt {
        self.belts.eden()
    }

    /// The to-space belt.
    pub fn to_space(&self) -> &Belt {
        self.belts.to()
    }

    /// The mature-space belt.
    pub fn mature_space(&self) -> &Belt {
        self.belts.mature()
    }

    /// Collection counters.
    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// The heap's configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The card table (for write-barrier wiring).
    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Collect garbage, escalating as needed, until `requested_free_space`
    /// bytes are available in eden.
    ///
    /// Runs on the collector thread with all mutators parked. Fails with
    /// [`OutOfMemoryError`] when even a major collection cannot make the
    /// requested space available; that condition is fatal and not
    /// retried.
    pub fn collect(&mut self, requested_free_space: usize) -> Result<(), OutOfMemoryError> {
        assert!(
            !self.in_gc.swap(true, Ordering::AcqRel),
            "re-entered the collector"
        );
        let result = self.collect_garbage(requested_free_space);
        self.in_gc.store(false, Ordering::Release);
        result
    }

    fn collect_garbage(&mut self, requested_free_space: usize) -> Result<(), OutOfMemoryError> {
        self.eden_collection()?;

        // The next eden collection promotes into to-space; if to-space
        // could not absorb a full eden, empty it now.
        if self.belts.to().free() <= self.belts.eden().size() {
            self.to_collection()?;

            // The next to-space collection promotes into mature space;
            // keep at least half a to-space of headroom there.
            if self.belts.mature().free() <= self.belts.to().size() / 2 {
                self.major_collection()?;
            }
        }

        // Cards are consumed by the phases above; clear them once per
        // top-level collection.
        self.card_table.clear_all();

        self.belts.eden().check_invariant();
        self.belts.to().check_invariant();
        self.belts.mature().check_invariant();

        if requested_free_space > self.belts.eden().free() {
            return Err(OutOfMemoryError);
        }
        Ok(())
    }

    /// Eden collection: move live eden objects into to-space.
    fn eden_collection(&mut self) -> Result<(), OutOfMemoryError> {
        self.stats.eden_collections += 1;
        self.trace("eden collection");
        self.trace_belt(self.belts.eden());

        if self.config.verify {
            self.verify_belt(self.belts.eden());
        }

        self.belts.to().set_allocation_mark_snapshot();
        self.monitor_hooks.before_garbage_collection();

        let parallel = self.config.parallel_scavenging;
        let scavenger = Scavenger::new(
            &*self.object_model,
            self.belts.eden(),
            self.belts.to(),
            parallel,
        );

        self.trace("scan roots");
        {
            let mut visitor = &scavenger;
            self.root_scanner.scan(&mut visitor);
            self.trace("scan boot heap");
            self.boot_heap_scanner.scan(&mut visitor);
            self.trace("scan code");
            self.code_scanner.scan(&mut visitor);
        }

        // Pre-existing to-space and mature objects may hold the only
        // references into eden; the write barrier dirtied their cards.
        self.trace("scan cards");
        let to_snapshot = self.belts.to().allocation_mark_snapshot();
        self.scan_card_region(self.belts.to(), to_snapshot, &scavenger);
        let mature_mark = self.belts.mature().allocation_mark();
        self.scan_card_region(self.belts.mature(), mature_mark, &scavenger);

        self.trace("move reachable");
        self.drain(&scavenger);

        let oom = scavenger.hit_copy_reserve();
        self.stats.bytes_copied += scavenger.bytes_copied();
        self.stats.objects_copied += scavenger.objects_copied();
        drop(scavenger);

        self.side_table.restore_all_chunk_slots();
        self.belts.eden().reset_allocation_mark();
        self.monitor_hooks.after_garbage_collection();

        if self.config.verify {
            self.verify_belt(self.belts.to());
        }
        self.trace_belt(self.belts.to());

        if oom {
            return Err(OutOfMemoryError);
        }
        Ok(())
    }

    /// To-space collection: move live to-space objects into mature space.
    fn to_collection(&mut self) -> Result<(), OutOfMemoryError> {
        self.stats.to_collections += 1;
        self.trace("to-space collection");
        self.trace_belt(self.belts.to());

        if self.config.verify {
            self.verify_belt(self.belts.to());
        }

        self.belts.mature().set_allocation_mark_snapshot();
        self.monitor_hooks.before_garbage_collection();

        let parallel = self.config.parallel_scavenging;
        let scavenger = Scavenger::new(
            &*self.object_model,
            self.belts.to(),
            self.belts.mature(),
            parallel,
        );

        self.trace("scan roots");
        {
            let mut visitor = &scavenger;
            self.root_scanner.scan(&mut visitor);
            self.trace("scan boot heap");
            self.boot_heap_scanner.scan(&mut visitor);
            self.trace("scan code");
            self.code_scanner.scan(&mut visitor);
        }

        self.trace("scan cards");
        let mature_snapshot = self.belts.mature().allocation_mark_snapshot();
        self.scan_card_region(self.belts.mature(), mature_snapshot, &scavenger);

        self.trace("move reachable");
        self.drain(&scavenger);

        let oom = scavenger.hit_copy_reserve();
        self.stats.bytes_copied += scavenger.bytes_copied();
        self.stats.objects_copied += scavenger.objects_copied();
        drop(scavenger);

        self.side_table.restore_all_chunk_slots();
        self.belts.to().reset_allocation_mark();
        self.monitor_hooks.after_garbage_collection();

        if self.config.verify {
            self.verify_belt(self.belts.mature());
        }
        self.trace_belt(self.belts.mature());

        if oom {
            return Err(OutOfMemoryError);
        }
        Ok(())
    }

    /// Major collection: evacuate mature space through eden and back,
    /// compacting it.
    fn major_collection(&mut self) -> Result<(), OutOfMemoryError> {
        self.stats.major_collections += 1;
        self.trace("major collection");
        self.trace_belt(self.belts.mature());

        if self.config.verify {
            self.verify_belt(self.belts.mature());
        }

        self.monitor_hooks.before_garbage_collection();
        self.belts.eden().set_expandable(true);
        self.belts.eden().set_allocation_mark_snapshot();

        let parallel = self.config.parallel_scavenging;

        // First pass: mature space empties into eden, which may spill
        // into the copy reserve.
        self.trace("evacuate mature into eden");
        let first_oom;
        {
            let scavenger = Scavenger::new(
                &*self.object_model,
                self.belts.mature(),
                self.belts.eden(),
                parallel,
            );
            {
                let mut visitor = &scavenger;
                self.root_scanner.scan(&mut visitor);
                self.boot_heap_scanner.scan(&mut visitor);
                self.code_scanner.scan(&mut visitor);
            }
            self.drain(&scavenger);
            first_oom = scavenger.hit_copy_reserve();
            self.stats.bytes_copied += scavenger.bytes_copied();
            self.stats.objects_copied += scavenger.objects_copied();
        }

        self.belts.mature().reset_allocation_mark();

        // The survivors must fit inside the copy reserve; overrunning it
        // means live data exceeds what mature space could ever take back.
        if first_oom || self.belts.eden().allocation_mark() >= self.belts.to().end() {
            self.trace("live objects exceed the copy reserve");
            return Err(OutOfMemoryError);
        }
        self.belts
            .eden()
            .set_stop_address(self.belts.eden().allocation_mark());

        // Second pass: survivors return to mature space, now compacted.
        self.trace("promote eden survivors back to mature");
        let second_oom;
        {
            let scavenger = Scavenger::new(
                &*self.object_model,
                self.belts.eden(),
                self.belts.mature(),
                parallel,
            );
            {
                let mut visitor = &scavenger;
                self.root_scanner.scan(&mut visitor);
                self.boot_heap_scanner.scan(&mut visitor);
                self.code_scanner.scan(&mut visitor);
            }
            self.drain(&scavenger);
            second_oom = scavenger.hit_copy_reserve();
            self.stats.bytes_copied += scavenger.bytes_copied();
            self.stats.objects_copied += scavenger.objects_copied();
        }

        self.belts.eden().reset_allocation_mark();
        self.belts.eden().set_stop_address(self.belts.to().start());
        self.belts.eden().set_expandable(false);

        self.side_table.restore_all_chunk_slots();
        self.monitor_hooks.after_garbage_collection();

        if self.config.verify {
            self.verify_belt(self.belts.mature());
        }
        self.trace_belt(self.belts.mature());

        if second_oom {
            return Err(OutOfMemoryError);
        }
        Ok(())
    }

    /// Run the scavenger's transitive closure, guarding against
    /// overlapping scavenge phases.
    fn drain(&self, scavenger: &Scavenger<'_>) {
        assert!(
            !self.in_scavenging.swap(true, Ordering::AcqRel),
            "overlapping scavenge phases"
        );
        if self.config.parallel_scavenging {
            scavenger.drain_parallel(self.config.gc_thread_count);
        } else {
            scavenger.drain_linear();
        }
        self.in_scavenging.store(false, Ordering::Release);
    }

    /// Walk `[belt.start, limit)` and scavenge the slots of every cell
    /// whose card range is dirty.
    fn scan_card_region(&self, belt: &Belt, limit: usize, scavenger: &Scavenger<'_>) {
        let mut cell = belt.start();
        while cell < limit {
            let size = self.object_model.size_of(cell);
            if self.card_table.range_dirty(cell, cell + size) {
                scavenger.scan_cell(cell);
            }
            cell += size;
        }
    }

    fn verify_belt(&self, belt: &Belt) {
        let (heap_start, heap_end) = self.belts.heap_span();
        HeapVerifier::new(&*self.object_model, heap_start, heap_end)
            .verify_span(belt.start(), belt.allocation_mark());
    }

    fn trace(&self, message: &str) {
        if self.config.verbose {
            eprintln!("[gc] {}", message);
        }
    }

    fn trace_belt(&self, belt: &Belt) {
        if self.config.verbose {
            eprintln!(
                "[gc] {}: start={:#x} mark={:#x} end={:#x}",
                belt.label(),
                belt.start(),
                belt.allocation_mark(),
                belt.end(),
            );
        }
    }
}
