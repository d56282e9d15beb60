//! Collection counters.
//!
//! Held by the heap and passed by reference into each phase, so tests
//! get fresh state per heap instead of process-global counters.

/// Counters describing collector activity since heap creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    /// Completed eden collections.
    pub eden_collections: u64,
    /// Completed to-space collections.
    pub to_collections: u64,
    /// Completed major collections.
    pub major_collections: u64,
    /// Bytes copied between belts across all phases.
    pub bytes_copied: u64,
    /// Objects copied between belts across all phases.
    pub objects_copied: u64,
}

impl CollectorStats {
    /// Fresh, all-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total collections of any severity.
    pub fn total_collections(&self) -> u64 {
        self.eden_collections + self.to_collections + self.major_collections
    }
}
