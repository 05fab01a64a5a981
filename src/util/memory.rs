//! Word-granularity accessors for heap memory.
//!
//! Heap words may be read by GC threads while mutators or other GC threads write them, so every
//! access goes through an atomic. Relaxed ordering is enough for plain data. Publication of an
//! object copy is ordered by the forwarding CAS.

use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;
use std::alloc::Layout;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A zero-initialized block of memory that backs a heap. The pages are only touched when they
/// are used, so reserving a large heap is cheap.
pub struct HeapMemory {
    start: Address,
    layout: Layout,
}

// The memory is only accessed through atomics.
unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    /// Reserve `bytes` bytes aligned to `align`. Returns `None` if the allocation fails.
    pub fn reserve(bytes: usize, align: usize) -> Option<HeapMemory> {
        let layout = Layout::from_size_align(bytes, align).ok()?;
        if layout.size() == 0 {
            return None;
        }
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(HeapMemory {
                start: Address::from_ptr(ptr),
                layout,
            })
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.layout.size()
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.start.to_ptr::<u8>() as *mut u8, self.layout) }
    }
}

/// Load one heap word.
///
/// # Safety
/// `addr` must be a word-aligned address inside committed heap memory.
#[inline(always)]
pub unsafe fn load_word(addr: Address) -> usize {
    addr.atomic_load::<AtomicUsize>(Ordering::Relaxed)
}

/// Store one heap word.
///
/// # Safety
/// `addr` must be a word-aligned address inside committed heap memory.
#[inline(always)]
pub unsafe fn store_word(addr: Address, value: usize) {
    addr.atomic_store::<AtomicUsize>(value, Ordering::Relaxed)
}

/// Copy `words` heap words from `from` to `to`. The ranges must not overlap.
///
/// # Safety
/// Both ranges must lie in committed heap memory.
pub unsafe fn copy_words(from: Address, to: Address, words: usize) {
    for i in 0..words {
        let offset = i * BYTES_IN_WORD;
        store_word(to + offset, load_word(from + offset));
    }
}

/// Zero `words` heap words starting at `start`.
///
/// # Safety
/// The range must lie in committed heap memory.
pub unsafe fn zero_words(start: Address, words: usize) {
    for i in 0..words {
        store_word(start + i * BYTES_IN_WORD, 0);
    }
}
