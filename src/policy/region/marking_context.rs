use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD, OBJECT_ALIGNMENT};
use crate::util::Address;

const LOG_BYTES_PER_BIT: usize = OBJECT_ALIGNMENT.trailing_zeros() as usize;

/// A mark bitmap with one bit per object granule of the heap.
pub struct MarkingContext {
    heap_start: Address,
    heap_end: Address,
    bits: Box<[AtomicUsize]>,
}

impl MarkingContext {
    pub fn new(heap_start: Address, heap_end: Address) -> Self {
        let n_bits = (heap_end - heap_start) >> LOG_BYTES_PER_BIT;
        let n_words = n_bits.div_ceil(BITS_IN_WORD);
        Self {
            heap_start,
            heap_end,
            bits: (0..n_words).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    fn bit_index(&self, addr: Address) -> usize {
        debug_assert!(addr >= self.heap_start && addr < self.heap_end);
        debug_assert!(addr.is_aligned_to(OBJECT_ALIGNMENT));
        (addr - self.heap_start) >> LOG_BYTES_PER_BIT
    }

    fn word_and_mask(&self, addr: Address) -> (&AtomicUsize, usize) {
        let bit = self.bit_index(addr);
        (
            &self.bits[bit >> LOG_BITS_IN_WORD],
            1 << (bit & (BITS_IN_WORD - 1)),
        )
    }

    /// Set the mark bit for the object at `addr`. Returns true if this call set it.
    pub fn mark(&self, addr: Address) -> bool {
        let (word, mask) = self.word_and_mask(addr);
        if word.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        word.fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        let (word, mask) = self.word_and_mask(addr);
        word.load(Ordering::Acquire) & mask != 0
    }

    /// Clear the mark bits of `range`.
    pub fn clear_range(&self, range: Range<Address>) {
        if range.start >= range.end {
            return;
        }
        let start = self.bit_index(range.start);
        let end = self.bit_index(range.end - OBJECT_ALIGNMENT) + 1;
        let mut bit = start;
        while bit < end {
            let word = bit >> LOG_BITS_IN_WORD;
            let offset = bit & (BITS_IN_WORD - 1);
            let n = (BITS_IN_WORD - offset).min(end - bit);
            if n == BITS_IN_WORD {
                self.bits[word].store(0, Ordering::Relaxed);
            } else {
                let mask = ((1usize << n) - 1) << offset;
                self.bits[word].fetch_and(!mask, Ordering::Relaxed);
            }
            bit += n;
        }
    }

    /// Number of marked granules in `range`.
    pub fn count_marked(&self, range: Range<Address>) -> usize {
        let mut addr = range.start;
        let mut n = 0;
        while addr < range.end {
            if self.is_marked(addr) {
                n += 1;
            }
            addr += OBJECT_ALIGNMENT;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(granules: usize) -> MarkingContext {
        let start = unsafe { Address::from_usize(0x100_0000) };
        MarkingContext::new(start, start + granules * OBJECT_ALIGNMENT)
    }

    #[test]
    fn mark_once() {
        let c = ctx(256);
        let a = unsafe { Address::from_usize(0x100_0000) } + 5 * OBJECT_ALIGNMENT;
        assert!(!c.is_marked(a));
        assert!(c.mark(a));
        assert!(!c.mark(a));
        assert!(c.is_marked(a));
        assert!(!c.is_marked(a + OBJECT_ALIGNMENT));
    }

    #[test]
    fn clear_partial_words() {
        let c = ctx(256);
        let start = unsafe { Address::from_usize(0x100_0000) };
        for i in 0..256 {
            c.mark(start + i * OBJECT_ALIGNMENT);
        }
        c.clear_range(start + 10 * OBJECT_ALIGNMENT..start + 200 * OBJECT_ALIGNMENT);
        assert_eq!(c.count_marked(start..start + 256 * OBJECT_ALIGNMENT), 66);
        assert!(c.is_marked(start + 9 * OBJECT_ALIGNMENT));
        assert!(!c.is_marked(start + 10 * OBJECT_ALIGNMENT));
        assert!(!c.is_marked(start + 199 * OBJECT_ALIGNMENT));
        assert!(c.is_marked(start + 200 * OBJECT_ALIGNMENT));
    }

    #[test]
    fn concurrent_marking_has_one_winner() {
        let c = ctx(1024);
        let start = unsafe { Address::from_usize(0x100_0000) };
        let wins = AtomicUsize::new(0);
        crossbeam::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    for i in 0..1024 {
                        if c.mark(start + i * OBJECT_ALIGNMENT) {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(wins.load(Ordering::Relaxed), 1024);
    }
}
