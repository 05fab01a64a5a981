use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::policy::region::{Region, RegionSpace};
use crate::scheduler::{GCWorker, GangTask};
use crate::util::object_forwarding;
use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::{Scanning, VMBinding};

/// Point `slot` at the to-space copy of its referent. A racing mutator store wins.
fn update_slot<VM: VMBinding>(heap: &RegionSpace<VM>, slot: SimpleSlot) {
    let Some(object) = slot.load() else {
        return;
    };
    if !heap.in_cset(object) {
        return;
    }
    let forwardee = object_forwarding::resolve_forwarded::<VM>(object);
    if forwardee != object {
        let _ = slot.compare_exchange(Some(object), Some(forwardee));
    }
}

/// Rewrites references into the collection set, region by region, below each region's update
/// watermark. Dead objects below TAMS are overwritten with dummies first, so their stale slots
/// are never scanned again.
pub(super) struct UpdateRefsTask<VM: VMBinding> {
    pub next_region: AtomicUsize,
    pub phantom: PhantomData<VM>,
}

impl<VM: VMBinding> UpdateRefsTask<VM> {
    pub fn new() -> Self {
        Self {
            next_region: AtomicUsize::new(0),
            phantom: PhantomData,
        }
    }

    fn update_region(&self, heap: &RegionSpace<VM>, region: &Region) {
        let watermark = region.update_watermark();
        let update_object = |object: ObjectReference| {
            VM::VMScanning::scan_object(object, &mut |slot: SimpleSlot| {
                update_slot(heap, slot)
            });
        };
        if heap.collection_set().is_in_index(region.index()) {
            // Only a region that failed evacuation keeps objects: the self-forwarded ones.
            if region.evacuation_failed() {
                heap.walk_objects(region.bottom()..watermark, |object| {
                    if object_forwarding::is_self_forwarded::<VM>(object) {
                        update_object(object);
                    }
                });
            }
            return;
        }
        let tams = region.tams();
        if tams > region.bottom() {
            let filled = heap.fill_dead_objects(region.bottom()..tams, |o| heap.is_marked(o));
            trace!("Region {}: filled {} dead bytes", region.index(), filled);
        }
        heap.walk_objects(region.bottom()..watermark, update_object);
    }
}

impl<VM: VMBinding> GangTask<VM> for UpdateRefsTask<VM> {
    fn name(&self) -> &'static str {
        "ConcurrentUpdateRefs"
    }

    fn work(&self, worker: &mut GCWorker<VM>) {
        let heap = &worker.rgc().heap;
        loop {
            let index = self.next_region.fetch_add(1, Ordering::Relaxed);
            if index >= heap.num_regions() {
                break;
            }
            let region = heap.region(index);
            if region.is_active() && region.update_watermark() > region.bottom() {
                self.update_region(heap, region);
            }
        }
    }
}
