use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::util::Address;

/// The regions selected for evacuation.
///
/// Membership is a byte map indexed by region index, so the load-reference barrier can test an
/// address with a shift and a load. The member list only changes during pauses.
pub struct CollectionSet {
    heap_start: Address,
    log_region_size: usize,
    map: Box<[AtomicBool]>,
    members: spin::RwLock<Vec<usize>>,
    claim_cursor: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl CollectionSet {
    pub fn new(heap_start: Address, n_regions: usize, log_region_size: usize) -> Self {
        Self {
            heap_start,
            log_region_size,
            map: (0..n_regions).map(|_| AtomicBool::new(false)).collect(),
            members: spin::RwLock::new(vec![]),
            claim_cursor: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    pub fn add_region(&self, index: usize, live_bytes: usize) {
        debug_assert!(!self.is_in_index(index), "Region {} added twice", index);
        self.map[index].store(true, Ordering::Release);
        self.members.write().push(index);
        self.live_bytes.fetch_add(live_bytes, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        let mut members = self.members.write();
        for index in members.drain(..) {
            self.map[index].store(false, Ordering::Release);
        }
        self.claim_cursor.store(0, Ordering::Relaxed);
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_in_index(&self, index: usize) -> bool {
        self.map[index].load(Ordering::Acquire)
    }

    /// Is `addr` in a collection set region? `addr` must be in the heap.
    #[inline(always)]
    pub fn is_in(&self, addr: Address) -> bool {
        self.is_in_index((addr - self.heap_start) >> self.log_region_size)
    }

    /// A snapshot of the member indices, in selection order.
    pub fn regions(&self) -> Vec<usize> {
        self.members.read().clone()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live bytes of the selected regions at selection time.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Hand out each member once across all threads.
    pub fn claim_next(&self) -> Option<usize> {
        let members = self.members.read();
        let i = self.claim_cursor.fetch_add(1, Ordering::Relaxed);
        members.get(i).copied()
    }

    pub fn reset_claims(&self) {
        self.claim_cursor.store(0, Ordering::Relaxed)
    }
}
