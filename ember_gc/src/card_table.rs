//! Card table for tracking cross-belt writes.
//!
//! The heap is divided into fixed-size cards (one byte of table per
//! card). The write barrier dirties the card containing any updated
//! object; eden and to-space collections then scan only the dirty cards
//! of the older belts for pointers into the collected belt, instead of
//! walking the older belts in full.
//!
//! Cards are cleared once per top-level collection, not per phase: a
//! to-space collection triggered by an eden collection still needs the
//! cards the eden phase used.

use std::sync::atomic::{AtomicU8, Ordering};

/// Card state values.
pub const CARD_CLEAN: u8 = 0;
pub const CARD_DIRTY: u8 = 1;

/// One dirty byte per 2^shift-byte card of heap.
pub struct CardTable {
    cards: Box<[AtomicU8]>,
    base: usize,
    shift: u32,
}

impl CardTable {
    /// Create a table covering `[base, base + size)` with 2^shift-byte
    /// cards.
    pub fn new(base: usize, size: usize, shift: u32) -> Self {
        let card_size = 1usize << shift;
        let num_cards = (size + card_size - 1) >> shift;
        let cards: Vec<AtomicU8> = (0..num_cards).map(|_| AtomicU8::new(CARD_CLEAN)).collect();
        Self {
            cards: cards.into_boxed_slice(),
            base,
            shift,
        }
    }

    #[inline]
    fn card_index(&self, addr: usize) -> Option<usize> {
        if addr < self.base {
            return None;
        }
        let index = (addr - self.base) >> self.shift;
        (index < self.cards.len()).then_some(index)
    }

    /// Dirty the card containing `addr`. Called by the write barrier on
    /// the mutator's store path.
    #[inline]
    pub fn mark(&self, addr: usize) {
        if let Some(index) = self.card_index(addr) {
            self.cards[index].store(CARD_DIRTY, Ordering::Relaxed);
        }
    }

    /// Whether the card containing `addr` is dirty.
    #[inline]
    pub fn is_dirty(&self, addr: usize) -> bool {
        self.card_index(addr)
            .map(|index| self.cards[index].load(Ordering::Relaxed) == CARD_DIRTY)
            .unwrap_or(false)
    }

    /// Whether any card overlapping `[start, end)` is dirty.
    pub fn range_dirty(&self, start: usize, end: usize) -> bool {
        if end <= start {
            return false;
        }
        let first = match self.card_index(start) {
            Some(index) => index,
            None => return false,
        };
        let last = self.card_index(end - 1).unwrap_or(self.cards.len() - 1);
        self.cards[first..=last]
            .iter()
            .any(|card| card.load(Ordering::Relaxed) == CARD_DIRTY)
    }

    /// Clear every card.
    pub fn clear_all(&self) {
        for card in self.cards.iter() {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Number of dirty cards.
    pub fn dirty_count(&self) -> usize {
        self.cards
            .iter()
            .filter(|card| card.load(Ordering::Relaxed) == CARD_DIRTY)
            .count()
    }

    /// Card size in bytes.
    #[inline]
    pub fn card_size(&self) -> usize {
        1 << self.shift
    }

    /// Number of cards in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Check if the table covers no cards.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
