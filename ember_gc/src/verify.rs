//! Belt integrity verification.
//!
//! Walks a belt's allocated span cell by cell and checks that every cell
//! parses, stays inside the span, and that every reference slot points
//! into the application heap. Corruption is a collector bug: it panics
//! immediately rather than letting a later phase read a bad map.

use crate::object_model::ObjectModel;

/// Walking verifier over belt spans.
pub struct HeapVerifier<'h> {
    object_model: &'h dyn ObjectModel,
    /// The application heap range valid reference targets must fall in.
    heap_start: usize,
    heap_end: usize,
}

impl<'h> HeapVerifier<'h> {
    /// Create a verifier; `(heap_start, heap_end)` is the whole
    /// application heap span.
    pub fn new(object_model: &'h dyn ObjectModel, heap_start: usize, heap_end: usize) -> Self {
        Self {
            object_model,
            heap_start,
            heap_end,
        }
    }

    /// Verify every cell in `[start, limit)`.
    ///
    /// # Panics
    ///
    /// Panics on an unparseable cell, a cell overrunning the span, or a
    /// reference slot pointing outside the application heap.
    pub fn verify_span(&self, start: usize, limit: usize) {
        let mut cell = start;
        while cell < limit {
            let size = self.object_model.size_of(cell);
            assert!(size > 0, "zero-sized cell at {:#x}", cell);
            assert!(
                cell + size <= limit,
                "cell at {:#x} (size {}) overruns span end {:#x}",
                cell,
                size,
                limit,
            );

            self.object_model.visit_reference_slots(cell, &mut |slot| {
                let target = unsafe { *(slot as *const usize) };
                assert!(
                    target == 0 || (target >= self.heap_start && target < self.heap_end),
                    "slot {:#x} in cell {:#x} points outside the heap: {:#x}",
                    slot,
                    cell,
                    target,
                );
            });

            cell += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::testing::{TestObjectModel, WORD};

    #[test]
    fn test_verify_accepts_well_formed_span() {
        let mut backing = vec![0usize; 32];
        let base = backing.as_mut_ptr() as usize;
        let end = base + 32 * WORD;

        let first = unsafe { TestObjectModel::write_object(base, &[base, 0], 1) };
        let second = unsafe { TestObjectModel::write_object(base + first, &[], 3) };

        let model = TestObjectModel;
        HeapVerifier::new(&model, base, end).verify_span(base, base + first + second);
    }

    #[test]
    #[should_panic(expected = "outside the heap")]
    fn test_verify_rejects_wild_reference() {
        let mut backing = vec![0usize; 16];
        let base = backing.as_mut_ptr() as usize;
        let end = base + 16 * WORD;

        let size = unsafe { TestObjectModel::write_object(base, &[0xDEAD0000], 0) };

        let model = TestObjectModel;
        HeapVerifier::new(&model, base, end).verify_span(base, base + size);
    }
}
