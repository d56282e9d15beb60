//! Shared fixtures for the runtime integration tests.
//!
//! Object layout:
//!
//! ```text
//! word 0: lock word
//! word 1: header = (payload words << 16) | (ref slots << 8) | 1
//! word 2..: reference slots, then data words
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use ember_gc::{GenerationalHeap, ObjectModel, RootScanner, SlotVisitor};
use ember_sync::LockWord;
use parking_lot::Mutex;

pub const WORD: usize = std::mem::size_of::<usize>();
pub const TAG_OBJECT: usize = 1;
pub const TAG_FILLER: usize = 2;

pub struct RuntimeObjectModel;

impl RuntimeObjectModel {
    pub fn header(cell: usize) -> usize {
        unsafe { *((cell + WORD) as *const usize) }
    }
}

impl ObjectModel for RuntimeObjectModel {
    fn size_of(&self, cell: usize) -> usize {
        let header = Self::header(cell);
        match header & 0xFF {
            TAG_OBJECT => WORD * (2 + (header >> 16)),
            TAG_FILLER => header >> 16,
            tag => panic!("unparseable cell at {:#x}: tag {:#x}", cell, tag),
        }
    }

    fn visit_reference_slots(&self, cell: usize, slot_visitor: &mut dyn FnMut(usize)) {
        let header = Self::header(cell);
        if header & 0xFF != TAG_OBJECT {
            return;
        }
        for slot in 0..(header >> 8) & 0xFF {
            slot_visitor(cell + WORD * (2 + slot));
        }
    }

    fn write_filler(&self, addr: usize, size: usize) {
        unsafe {
            *(addr as *mut usize) = 0;
            *((addr + WORD) as *mut usize) = (size << 16) | TAG_FILLER;
        }
    }
}

/// Allocate an object in eden with the given reference targets.
pub fn alloc_object(heap: &GenerationalHeap, refs: &[usize], data_words: usize) -> usize {
    let payload = refs.len() + data_words;
    let cell = heap
        .allocate(WORD * (2 + payload))
        .expect("eden exhausted");
    unsafe {
        *(cell as *mut usize) = LockWord::UNLOCKED.bits() as usize;
        *((cell + WORD) as *mut usize) = (payload << 16) | (refs.len() << 8) | TAG_OBJECT;
        for (slot, &target) in refs.iter().enumerate() {
            *((cell + WORD * (2 + slot)) as *mut usize) = target;
        }
        for word in 0..data_words {
            *((cell + WORD * (2 + refs.len() + word)) as *mut usize) = 0x5105;
        }
    }
    cell
}

/// Roots shared between a test and the heap's scanner.
pub struct SharedRoots(pub Arc<Mutex<Vec<usize>>>);

impl RootScanner for SharedRoots {
    fn scan(&mut self, visitor: &mut dyn SlotVisitor) {
        for &slot in self.0.lock().iter() {
            visitor.visit_slot(slot);
        }
    }
}
