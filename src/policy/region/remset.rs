//! The card-table remembered set.
//!
//! Every old-to-young reference lies in a dirty card, or in a card that is logged in a dirty
//! card buffer and will be redirtied before it is needed. The store barrier dirties cards and
//! logs them. Young collections scan the dirty cards of old regions.

use std::ops::Range;

use super::card_table::{CardTable, DIRTY_CARD};
use crate::util::options::Options;
use crate::util::ptr_queue::{PtrQueue, PtrQueueSet};
use crate::util::Address;

/// Card indices logged by one thread.
pub type DirtyCardQueue = PtrQueue<usize>;
/// The completed buffers of all dirty card queues.
pub type DirtyCardQueueSet = PtrQueueSet<usize>;

pub struct RememberedSet {
    card_table: CardTable,
    dirty_card_queue_set: DirtyCardQueueSet,
}

impl RememberedSet {
    pub fn new(heap_start: Address, heap_end: Address, options: &Options) -> Self {
        Self {
            card_table: CardTable::new(heap_start, heap_end, options.log_card_size),
            // Card buffers are never filtered, so they are always published when full.
            dirty_card_queue_set: DirtyCardQueueSet::new(
                options.dirty_card_buffer_size,
                100,
                options.satb_process_completed_threshold,
            ),
        }
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn dirty_card_queue_set(&self) -> &DirtyCardQueueSet {
        &self.dirty_card_queue_set
    }

    /// Record that the card at `index` holds an interesting reference. Used by GC threads
    /// while the card may be claimed by a scanner. The card is always logged, so losing the
    /// race to set the deferred bit is harmless.
    pub fn defer_card(&self, index: usize, queue: &mut DirtyCardQueue) {
        self.card_table.mark_card_deferred(index);
        queue.enqueue(&self.dirty_card_queue_set, index);
    }

    /// The store barrier's slow path: dirty the card and log it.
    pub fn dirty_card(&self, index: usize, queue: &mut DirtyCardQueue) {
        self.card_table.mark_card_dirty(index);
        queue.enqueue(&self.dirty_card_queue_set, index);
    }

    /// Dirty every card covering `range`. The cards are not logged.
    pub fn dirty_range(&self, range: Range<Address>) {
        if range.start >= range.end {
            return;
        }
        let first = self.card_table.index_for(range.start);
        let last = self.card_table.index_for(range.end - 1usize);
        for i in first..=last {
            self.card_table.mark_card_dirty(i);
        }
    }

    /// Drain all completed buffers and dirty every logged card. Returns the number of cards.
    pub fn redirty_logged_cards(&self) -> usize {
        let mut n = 0;
        while self.dirty_card_queue_set.apply_closure_to_completed_buffer(|cards| {
            for &card in cards {
                self.card_table.mark_card_dirty(card);
            }
            n += cards.len();
        }) {}
        debug!("Redirtied {} logged cards", n);
        n
    }

    /// Concurrent refinement: process completed buffers while mutators run. Logged cards that
    /// were cleaned since they were logged are dirtied again. Returns the number of buffers.
    pub fn refine_completed_buffers(&self) -> usize {
        let mut buffers = 0;
        while self.dirty_card_queue_set.apply_closure_to_completed_buffer(|cards| {
            for &card in cards {
                if self.card_table.card_value(card) != DIRTY_CARD {
                    self.card_table.mark_card_dirty(card);
                }
            }
        }) {
            buffers += 1;
        }
        trace!("Refined {} dirty card buffers", buffers);
        buffers
    }
}
