//! Root enumeration and collaborator interfaces.
//!
//! Root discovery is owned by the surrounding VM: thread stacks are
//! walked with the reference maps the JIT produced, the boot image and
//! compiled code have their own layouts. The collector only dictates the
//! shape of the conversation: it hands the scanner a [`SlotVisitor`] and
//! the scanner reports every slot that may hold a heap reference.

/// Receives the address of each slot that may hold a heap reference.
///
/// The collector's implementation reads the slot, copies the referent if
/// it lies in the belt being collected, and updates the slot in place.
pub trait SlotVisitor {
    /// Process one slot.
    fn visit_slot(&mut self, slot_addr: usize);
}

/// Enumerates a category of roots (thread stacks, boot heap, code).
pub trait RootScanner: Send {
    /// Report every root slot to `visitor`.
    fn scan(&mut self, visitor: &mut dyn SlotVisitor);
}

/// A scanner with no roots; the default for untested categories.
pub struct NoopScanner;

impl RootScanner for NoopScanner {
    fn scan(&mut self, _visitor: &mut dyn SlotVisitor) {}
}

/// Scanner over an explicit list of slot addresses. Useful for tests and
/// for VM-internal root tables.
pub struct SlotListScanner {
    slots: Vec<usize>,
}

impl SlotListScanner {
    /// Create a scanner over the given slot addresses.
    pub fn new(slots: Vec<usize>) -> Self {
        Self { slots }
    }
}

impl RootScanner for SlotListScanner {
    fn scan(&mut self, visitor: &mut dyn SlotVisitor) {
        for &slot in &self.slots {
            visitor.visit_slot(slot);
        }
    }
}

// =============================================================================
// Monitor hooks
// =============================================================================

/// Monitor-scheme participation in collection.
///
/// Thread lock state references objects (an inflated monitor holds its
/// owner and the locked object), so monitor bookkeeping must be stable
/// while roots are identified. The collector brackets every phase with
/// these hooks.
pub trait MonitorGcHooks: Send + Sync {
    /// Called before a phase scans roots.
    fn before_garbage_collection(&self);

    /// Called after a phase has moved all reachable objects.
    fn after_garbage_collection(&self);
}

/// Hooks for configurations without a monitor scheme attached.
pub struct NoopMonitorHooks;

impl MonitorGcHooks for NoopMonitorHooks {
    fn before_garbage_collection(&self) {}
    fn after_garbage_collection(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collecting(Vec<usize>);

    impl SlotVisitor for Collecting {
        fn visit_slot(&mut self, slot_addr: usize) {
            self.0.push(slot_addr);
        }
    }

    #[test]
    fn test_slot_list_scanner_reports_all_slots() {
        let mut scanner = SlotListScanner::new(vec![0x10, 0x20, 0x30]);
        let mut visitor = Collecting(Vec::new());
        scanner.scan(&mut visitor);
        assert_eq!(visitor.0, vec![0x10, 0x20, 0x30]);
    }
}
