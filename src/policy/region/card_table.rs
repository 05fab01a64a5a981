//! A byte-per-card table over the heap.
//!
//! Card bytes are `AtomicU8`s accessed with relaxed ordering. Racing dirtying stores are benign
//! because they all write the same value, and a card is only cleaned by a pass that excludes
//! mutators from its span. The GC annotations `CLAIMED` and `DEFERRED` are set with CAS.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::util::Address;

/// The card has not been written since it was last cleaned.
pub const CLEAN_CARD: u8 = 0xff;
/// The card span holds a reference that was written since the card was last cleaned.
pub const DIRTY_CARD: u8 = 0;
/// A dirty card whose span was scanned by concurrent precleaning.
pub const PRECLEANED_CARD: u8 = 1;
/// The card was claimed by a GC thread scanning the remembered set.
pub const CLAIMED_CARD: u8 = 2;
/// The card has been logged in a dirty card queue during a pause.
pub const DEFERRED_CARD: u8 = 4;
/// Bits that are only set in a clean card.
pub const CLEAN_CARD_MASK: u8 = 0xe0;

pub struct CardTable {
    bytes: Box<[AtomicU8]>,
    heap_start: Address,
    heap_end: Address,
    log_card_size: usize,
    /// Set by `invalidate`: some dirty cards are not logged, so the whole table must be rescanned
    /// before relying on the dirty card logs.
    needs_rescan: AtomicBool,
}

impl CardTable {
    /// Create a card table for `[heap_start, heap_end)`. All cards start out as zero, which reads
    /// as dirty, until the memory they cover is committed.
    pub fn new(heap_start: Address, heap_end: Address, log_card_size: usize) -> Self {
        debug_assert!(heap_start.is_aligned_to(1 << log_card_size));
        let n_cards = ((heap_end - heap_start) + (1 << log_card_size) - 1) >> log_card_size;
        let bytes = (0..n_cards).map(|_| AtomicU8::new(0)).collect();
        Self {
            bytes,
            heap_start,
            heap_end,
            log_card_size,
            needs_rescan: AtomicBool::new(false),
        }
    }

    pub fn card_size(&self) -> usize {
        1 << self.log_card_size
    }

    pub fn num_cards(&self) -> usize {
        self.bytes.len()
    }

    /// The index of the card covering `addr`.
    pub fn index_for(&self, addr: Address) -> usize {
        debug_assert!(
            addr >= self.heap_start && addr < self.heap_end,
            "{} is outside the covered range",
            addr
        );
        (addr - self.heap_start) >> self.log_card_size
    }

    /// The first address covered by card `index`.
    pub fn addr_for(&self, index: usize) -> Address {
        debug_assert!(index < self.bytes.len());
        self.heap_start + (index << self.log_card_size)
    }

    /// Card indices covering `range`. The last card may be partially covered.
    fn card_range(&self, range: &Range<Address>) -> Range<usize> {
        if range.start >= range.end {
            return 0..0;
        }
        self.index_for(range.start)..self.index_for(range.end - 1usize) + 1
    }

    pub fn card_value(&self, index: usize) -> u8 {
        self.bytes[index].load(Ordering::Relaxed)
    }

    fn set_card(&self, index: usize, value: u8) {
        self.bytes[index].store(value, Ordering::Relaxed)
    }

    /// The store barrier's card mark.
    #[inline(always)]
    pub fn mark_card_dirty(&self, index: usize) {
        self.set_card(index, DIRTY_CARD)
    }

    pub fn is_card_dirty(&self, index: usize) -> bool {
        self.card_value(index) == DIRTY_CARD
    }

    pub fn is_card_clean(&self, index: usize) -> bool {
        self.card_value(index) == CLEAN_CARD
    }

    pub fn is_card_claimed(&self, index: usize) -> bool {
        let val = self.card_value(index);
        (val & (CLEAN_CARD_MASK | CLAIMED_CARD)) == CLAIMED_CARD
    }

    pub fn is_card_deferred(&self, index: usize) -> bool {
        let val = self.card_value(index);
        (val & (CLEAN_CARD_MASK | DEFERRED_CARD)) == DEFERRED_CARD
    }

    /// Claim card `index` for scanning. Returns false if another thread claimed it first.
    pub fn claim_card(&self, index: usize) -> bool {
        let mut val = self.card_value(index);
        debug_assert!(val != DIRTY_CARD, "Shouldn't claim a dirty card");
        while !Self::is_claimed_value(val) {
            let new_val = if val == CLEAN_CARD {
                CLAIMED_CARD
            } else {
                val | CLAIMED_CARD
            };
            match self.bytes[index].compare_exchange(
                val,
                new_val,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(witness) => val = witness,
            }
        }
        false
    }

    fn is_claimed_value(val: u8) -> bool {
        (val & (CLEAN_CARD_MASK | CLAIMED_CARD)) == CLAIMED_CARD
    }

    /// Mark card `index` as logged. Wait-free: a lost race is not retried. Returns false only
    /// if the card was already deferred, i.e. it is known to be logged.
    pub fn mark_card_deferred(&self, index: usize) -> bool {
        let val = self.card_value(index);
        // It's already processed
        if (val & (CLEAN_CARD_MASK | DEFERRED_CARD)) == DEFERRED_CARD {
            return false;
        }
        // Cached bit can be installed either on a clean card or on a claimed card.
        let new_val = if val == CLEAN_CARD {
            DEFERRED_CARD
        } else if val & CLAIMED_CARD != 0 {
            val | DEFERRED_CARD
        } else {
            val
        };
        if new_val != val {
            let _ = self.bytes[index].compare_exchange(
                val,
                new_val,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
        true
    }

    /// Concurrent precleaning: move a dirty card to precleaned before its span is scanned.
    /// Returns false if the card was not dirty.
    pub fn preclean_card(&self, index: usize) -> bool {
        self.bytes[index]
            .compare_exchange(
                DIRTY_CARD,
                PRECLEANED_CARD,
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Call `visitor` on each maximal run of dirty cards in `range`, as an address range. If
    /// `reset` is given, the dirty cards are set to it before their run is visited.
    pub fn dirty_card_iterate<F: FnMut(Range<Address>)>(
        &self,
        range: Range<Address>,
        reset: Option<u8>,
        mut visitor: F,
    ) {
        let cards = self.card_range(&range);
        let mut i = cards.start;
        while i < cards.end {
            if !self.is_card_dirty(i) {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < cards.end && self.is_card_dirty(i) {
                if let Some(val) = reset {
                    self.set_card(i, val);
                }
                i += 1;
            }
            let start = self.addr_for(run_start).max(range.start);
            let end = if i < self.bytes.len() {
                self.addr_for(i).min(range.end)
            } else {
                range.end
            };
            visitor(start..end);
        }
    }

    /// Return the first run of dirty cards in `range` as an address range, resetting its cards
    /// if `reset` is given. Returns an empty range at `range.end` if there is no dirty card.
    pub fn dirty_card_range_after_reset(&self, range: Range<Address>, reset: Option<u8>) -> Range<Address> {
        let cards = self.card_range(&range);
        let mut i = cards.start;
        while i < cards.end && !self.is_card_dirty(i) {
            i += 1;
        }
        if i == cards.end {
            return range.end..range.end;
        }
        let run_start = i;
        while i < cards.end && self.is_card_dirty(i) {
            if let Some(val) = reset {
                self.set_card(i, val);
            }
            i += 1;
        }
        let start = self.addr_for(run_start).max(range.start);
        let end = if i < self.bytes.len() {
            self.addr_for(i).min(range.end)
        } else {
            range.end
        };
        start..end
    }

    /// Set all cards covering `range` to clean.
    pub fn clear(&self, range: Range<Address>) {
        for i in self.card_range(&range) {
            self.set_card(i, CLEAN_CARD);
        }
    }

    /// Set all cards covering `range` to dirty without logging them. The table must be fully
    /// rescanned before the dirty card logs can be trusted again.
    pub fn invalidate(&self, range: Range<Address>) {
        for i in self.card_range(&range) {
            self.mark_card_dirty(i);
        }
        self.needs_rescan.store(true, Ordering::Relaxed);
    }

    /// Does the table hold dirty cards that are not logged?
    pub fn needs_rescan(&self) -> bool {
        self.needs_rescan.load(Ordering::Relaxed)
    }

    /// Record that the whole table has been rescanned after an `invalidate`.
    pub fn rescanned(&self) {
        self.needs_rescan.store(false, Ordering::Relaxed);
    }

    /// Restore claimed and deferred cards in `range` to clean. Dirty cards stay dirty.
    pub fn clear_claimed(&self, range: Range<Address>) {
        for i in self.card_range(&range) {
            let val = self.card_value(i);
            if val != DIRTY_CARD && val != CLEAN_CARD && val & (CLAIMED_CARD | DEFERRED_CARD) != 0
            {
                self.set_card(i, CLEAN_CARD);
            }
        }
    }

    /// The memory in `range` is about to be handed out. Its cards start clean.
    pub fn on_commit(&self, range: Range<Address>) {
        self.clear(range)
    }

    /// The memory in `range` is no longer in use. Its cards read as dirty, so stale cards can
    /// never cause a scan to miss a reference.
    pub fn on_uncommit(&self, range: Range<Address>) {
        for i in self.card_range(&range) {
            self.set_card(i, DIRTY_CARD);
        }
    }

    /// Number of dirty cards in `range`.
    pub fn count_dirty(&self, range: Range<Address>) -> usize {
        self.card_range(&range)
            .filter(|i| self.is_card_dirty(*i))
            .count()
    }
}
