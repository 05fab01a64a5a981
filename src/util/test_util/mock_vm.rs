//! A minimal VM binding for tests.
//!
//! Object layout (one word each):
//!
//! ```text
//! +0  forwarding word (owned by the collector)
//! +1  header: age in bits 0..8, number of reference slots in bits 8..32,
//!     number of payload words in bits 32..64
//! +2  reference slots
//! ..  payload words
//! ```
//!
//! The layout assumes a 64-bit target.

use crate::util::constants::{BYTES_IN_WORD, MIN_OBJECT_WORDS, OBJECT_ALIGNMENT};
use crate::util::conversions::align_object_words;
use crate::util::memory::{self, HeapMemory};
use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::{ObjectModel, Scanning, VMBinding};
use std::sync::atomic::{AtomicUsize, Ordering};

const HEADER_WORDS: usize = 2;
const AGE_MASK: usize = 0xff;
const NREFS_SHIFT: usize = 8;
const NREFS_MASK: usize = 0xff_ffff;
const PAYLOAD_SHIFT: usize = 32;

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockVM;
    type VMScanning = MockVM;
}

fn header_address(object: ObjectReference) -> Address {
    object.to_raw_address() + BYTES_IN_WORD
}

fn load_header(object: ObjectReference) -> usize {
    unsafe { memory::load_word(header_address(object)) }
}

/// The number of words an object with `nrefs` slots and `payload` payload words occupies.
pub fn object_words(nrefs: usize, payload: usize) -> usize {
    align_object_words(HEADER_WORDS + nrefs + payload)
}

/// Format an object at `start`. The memory must be zeroed or previously formatted.
pub fn init_object(start: Address, nrefs: usize, payload: usize) -> ObjectReference {
    let words = object_words(nrefs, payload);
    let payload = words - HEADER_WORDS - nrefs;
    unsafe {
        memory::store_word(start, 0);
        memory::store_word(
            start + BYTES_IN_WORD,
            (nrefs << NREFS_SHIFT) | (payload << PAYLOAD_SHIFT),
        );
        memory::zero_words(
            start + HEADER_WORDS * BYTES_IN_WORD,
            words - HEADER_WORDS,
        );
    }
    MockVM::address_to_ref(start)
}

/// Load the `index`-th reference of `object` without any barrier.
pub fn get_ref(object: ObjectReference, index: usize) -> Option<ObjectReference> {
    <MockVM as Scanning<MockVM>>::slot(object, index).load()
}

/// Store the `index`-th reference of `object` without any barrier.
pub fn set_ref(object: ObjectReference, index: usize, target: Option<ObjectReference>) {
    <MockVM as Scanning<MockVM>>::slot(object, index).store(target)
}

/// Read a payload word. Tests use it to tag objects.
pub fn get_payload(object: ObjectReference, index: usize) -> usize {
    let nrefs = MockVM::num_slots(object);
    unsafe {
        memory::load_word(object.to_raw_address() + (HEADER_WORDS + nrefs + index) * BYTES_IN_WORD)
    }
}

/// Write a payload word.
pub fn set_payload(object: ObjectReference, index: usize, value: usize) {
    let nrefs = MockVM::num_slots(object);
    unsafe {
        memory::store_word(
            object.to_raw_address() + (HEADER_WORDS + nrefs + index) * BYTES_IN_WORD,
            value,
        )
    }
}

impl ObjectModel<MockVM> for MockVM {
    fn forwarding_word_address(object: ObjectReference) -> Address {
        object.to_raw_address()
    }

    fn get_current_size(object: ObjectReference) -> usize {
        let header = load_header(object);
        let nrefs = (header >> NREFS_SHIFT) & NREFS_MASK;
        let payload = header >> PAYLOAD_SHIFT;
        (HEADER_WORDS + nrefs + payload) * BYTES_IN_WORD
    }

    fn get_age(object: ObjectReference) -> usize {
        load_header(object) & AGE_MASK
    }

    fn set_age(object: ObjectReference, age: usize) {
        let header = load_header(object);
        unsafe { memory::store_word(header_address(object), (header & !AGE_MASK) | age) }
    }

    fn fill_with_dummy_object(start: Address, bytes: usize) {
        debug_assert!(bytes >= OBJECT_ALIGNMENT && bytes % OBJECT_ALIGNMENT == 0);
        let words = bytes / BYTES_IN_WORD;
        unsafe {
            memory::store_word(start, 0);
            memory::store_word(
                start + BYTES_IN_WORD,
                (words - HEADER_WORDS) << PAYLOAD_SHIFT,
            );
        }
    }
}

impl Scanning<MockVM> for MockVM {
    fn num_slots(object: ObjectReference) -> usize {
        (load_header(object) >> NREFS_SHIFT) & NREFS_MASK
    }

    fn slot(object: ObjectReference, index: usize) -> SimpleSlot {
        debug_assert!(index < Self::num_slots(object));
        SimpleSlot::from_address(object.to_raw_address() + (HEADER_WORDS + index) * BYTES_IN_WORD)
    }
}

/// A standalone bump-allocated buffer of mock objects, for tests that do not need a full heap.
pub struct MockHeap {
    memory: HeapMemory,
    cursor: AtomicUsize,
}

impl MockHeap {
    pub fn new(words: usize) -> MockHeap {
        let memory = HeapMemory::reserve(words * BYTES_IN_WORD, OBJECT_ALIGNMENT)
            .expect("failed to reserve mock heap");
        MockHeap {
            memory,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Allocate raw words. Panics when the buffer is exhausted.
    pub fn alloc(&self, words: usize) -> Address {
        let words = align_object_words(words.max(MIN_OBJECT_WORDS));
        let offset = self.cursor.fetch_add(words * BYTES_IN_WORD, Ordering::Relaxed);
        assert!(offset + words * BYTES_IN_WORD <= self.memory.size(), "mock heap exhausted");
        self.memory.start() + offset
    }

    /// Allocate and format an object.
    pub fn object(&self, nrefs: usize, payload: usize) -> ObjectReference {
        let start = self.alloc(object_words(nrefs, payload));
        init_object(start, nrefs, payload)
    }

    pub fn start(&self) -> Address {
        self.memory.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_layout() {
        let heap = MockHeap::new(256);
        let o = heap.object(3, 2);
        assert_eq!(MockVM::num_slots(o), 3);
        // 2 header + 3 refs + 2 payload, rounded up to an even number of words
        assert_eq!(MockVM::get_current_size(o), 8 * BYTES_IN_WORD);
        assert_eq!(MockVM::get_age(o), 0);
        MockVM::set_age(o, 5);
        assert_eq!(MockVM::get_age(o), 5);
        assert_eq!(MockVM::num_slots(o), 3);

        let p = heap.object(0, 0);
        set_ref(o, 1, Some(p));
        assert_eq!(get_ref(o, 1), Some(p));
        assert_eq!(get_ref(o, 0), None);
        set_payload(o, 0, 42);
        assert_eq!(get_payload(o, 0), 42);
    }

    #[test]
    fn dummy_objects_are_parsable() {
        let heap = MockHeap::new(256);
        let start = heap.alloc(6);
        MockVM::fill_with_dummy_object(start, 6 * BYTES_IN_WORD);
        let dummy = MockVM::address_to_ref(start);
        assert_eq!(MockVM::get_current_size(dummy), 6 * BYTES_IN_WORD);
        assert_eq!(MockVM::num_slots(dummy), 0);
    }

    #[test]
    fn copy_clears_forwarding_word() {
        let heap = MockHeap::new(256);
        let o = heap.object(1, 1);
        set_payload(o, 0, 7);
        crate::util::object_forwarding::self_forward::<MockVM>(o);
        let to = heap.alloc(object_words(1, 1));
        let copy = MockVM::copy(o, to);
        assert_eq!(get_payload(copy, 0), 7);
        assert!(!crate::util::object_forwarding::is_forwarded::<MockVM>(copy));
    }
}
