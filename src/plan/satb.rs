//! Snapshot-at-the-beginning logging.
//!
//! While marking is active, every reference that is about to be overwritten or deleted is
//! logged, so that marking sees the object graph as it was when marking started.

use crate::policy::region::RegionSpace;
use crate::util::options::Options;
use crate::util::ptr_queue::{PtrQueue, PtrQueueSet};
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Object addresses logged by one thread.
pub type SATBMarkQueue = PtrQueue<Address>;
/// The completed buffers of all SATB queues.
pub type SATBMarkQueueSet = PtrQueueSet<Address>;

pub fn new_satb_mark_queue_set(options: &Options) -> SATBMarkQueueSet {
    SATBMarkQueueSet::new(
        options.satb_buffer_size,
        options.satb_buffer_enqueue_threshold_percent,
        options.satb_process_completed_threshold,
    )
}

/// Log `object` in `queue`. When the buffer fills up, entries that marking no longer needs are
/// dropped first.
pub fn satb_enqueue<VM: VMBinding>(
    heap: &RegionSpace<VM>,
    qset: &SATBMarkQueueSet,
    queue: &mut SATBMarkQueue,
    object: ObjectReference,
) {
    let addr = object.to_raw_address();
    if !heap.requires_marking(addr) {
        return;
    }
    queue.enqueue_filtered(qset, addr, |a| heap.requires_marking(*a));
}

/// Log `object` without a thread-local queue, e.g. from a pause or a thread without a mutator.
pub fn satb_enqueue_shared<VM: VMBinding>(
    heap: &RegionSpace<VM>,
    qset: &SATBMarkQueueSet,
    object: ObjectReference,
) {
    if heap.requires_marking(object.to_raw_address()) {
        let mut queue = SATBMarkQueue::new(qset);
        satb_enqueue(heap, qset, &mut queue, object);
        queue.flush(qset);
    }
}
