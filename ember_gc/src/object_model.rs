//! The collector's view of object layout.
//!
//! The collector never interprets object contents itself; the runtime
//! provides an [`ObjectModel`] that can size a cell, enumerate its
//! reference slots, and write filler cells so partially-used TLABs leave
//! the belt parseable.

/// Object layout operations the collector depends on.
///
/// # Safety contract
///
/// Every address passed in is the start of a cell previously allocated in
/// a belt (or filler written by [`write_filler`]). Implementations read
/// the cell's header only; the collector guarantees the cell is not
/// concurrently moved while a call is in progress.
///
/// [`write_filler`]: ObjectModel::write_filler
pub trait ObjectModel: Sync {
    /// Size in bytes of the cell at `cell`, filler included.
    fn size_of(&self, cell: usize) -> usize;

    /// Invoke `slot_visitor` with the address of each reference slot in
    /// the cell. Filler cells have none.
    fn visit_reference_slots(&self, cell: usize, slot_visitor: &mut dyn FnMut(usize));

    /// Write a filler cell spanning `[addr, addr + size)`; the filler
    /// must report `size` from [`size_of`] and contain no reference
    /// slots.
    ///
    /// [`size_of`]: ObjectModel::size_of
    fn write_filler(&self, addr: usize, size: usize);
}
