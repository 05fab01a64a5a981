use std::marker::PhantomData;

use crate::plan::tracing::{ranges_contain, ranges_overlap, scan_object, scan_partial_array};
use crate::policy::region::card_table::CLAIMED_CARD;
use crate::scheduler::{
    drain_with_stealing, GCWorker, GangTask, PartialArrayStates, ScannerTask, ScannerTaskKind,
    ScannerTaskQueue, ScannerTaskQueueSet, TaskTerminator,
};
use crate::util::constants::{BYTES_IN_WORD, MAX_AGE};
use crate::util::copy::{CopySemantics, GCWorkerCopyContext};
use crate::util::object_forwarding;
use crate::util::Address;
use crate::vm::slot::SimpleSlot;
use crate::vm::{ObjectModel, Scanning, VMBinding};
use crate::RGC;

/// The parallel phase of a young collection.
///
/// Initial tasks are root slots and one region task per old region. A region task scans the
/// dirty cards of its region. A slot task evacuates the young object the slot points to and
/// updates the slot. The worker that wins the copy scans the copy.
pub(super) struct YoungCollectionTask<'a, VM: VMBinding> {
    pub queues: &'a ScannerTaskQueueSet,
    pub terminator: &'a TaskTerminator<'a>,
    pub partial_arrays: &'a PartialArrayStates,
    /// Tops of the old regions when the pause started, indexed by region. Copies promoted
    /// during this collection lie above them and are not card-scanned.
    pub scan_tops: &'a [Address],
    pub tenuring_threshold: usize,
    pub phantom: PhantomData<VM>,
}

impl<VM: VMBinding> GangTask<VM> for YoungCollectionTask<'_, VM> {
    fn name(&self) -> &'static str {
        "YoungCollection"
    }

    fn work(&self, worker: &mut GCWorker<VM>) {
        let rgc = worker.rgc();
        let ordinal = worker.ordinal;
        let queue = self.queues.queue(ordinal);
        let mut seed = worker.seed;
        let copy = worker.get_copy_context_mut();
        drain_with_stealing(
            self.queues,
            self.terminator,
            ordinal,
            &mut seed,
            None,
            || false,
            |task| self.process_task(rgc, copy, queue, task),
        );
        worker.seed = seed;
    }
}

fn push_if_in_cset<VM: VMBinding>(rgc: &RGC<VM>, queue: &ScannerTaskQueue, slot: SimpleSlot) {
    if slot.load().is_some_and(|o| rgc.heap.in_cset(o)) {
        queue.push(ScannerTask::slot(slot));
    }
}

impl<VM: VMBinding> YoungCollectionTask<'_, VM> {
    fn process_task(
        &self,
        rgc: &RGC<VM>,
        copy: &mut GCWorkerCopyContext<VM>,
        queue: &ScannerTaskQueue,
        task: ScannerTask,
    ) {
        match task.kind() {
            ScannerTaskKind::Slot(slot) => self.process_slot(rgc, copy, queue, slot),
            ScannerTaskKind::PartialArray(handle) => {
                scan_partial_array::<VM, _>(self.partial_arrays, handle, |slot| {
                    push_if_in_cset(rgc, queue, slot)
                })
            }
            ScannerTaskKind::Region(index) => self.scan_dirty_cards(rgc, queue, index),
            ScannerTaskKind::Object(object) => {
                scan_object::<VM, _>(self.partial_arrays, queue, object, |slot| {
                    push_if_in_cset(rgc, queue, slot)
                })
            }
        }
    }

    fn process_slot(
        &self,
        rgc: &RGC<VM>,
        copy: &mut GCWorkerCopyContext<VM>,
        queue: &ScannerTaskQueue,
        slot: SimpleSlot,
    ) {
        let Some(object) = slot.load() else {
            return;
        };
        if !rgc.heap.in_cset(object) {
            return;
        }
        let new_object = match object_forwarding::get_forwardee::<VM>(object) {
            Some(forwardee) => forwardee,
            None => {
                let age = VM::VMObjectModel::get_age(object);
                let (semantics, new_age) = if age >= self.tenuring_threshold {
                    (CopySemantics::Promotion, None)
                } else {
                    (CopySemantics::Young, Some((age + 1).min(MAX_AGE)))
                };
                let (new_object, won) = copy.evacuate(object, semantics, new_age);
                if won {
                    if let (Some(new_age), true) = (new_age, new_object != object) {
                        let words = VM::VMObjectModel::get_current_size(new_object) / BYTES_IN_WORD;
                        copy.age_table.add(new_age, words);
                    }
                    scan_object::<VM, _>(self.partial_arrays, queue, new_object, |s| {
                        push_if_in_cset(rgc, queue, s)
                    });
                }
                new_object
            }
        };
        if new_object != object {
            slot.store(Some(new_object));
        }
        let heap = &rgc.heap;
        if heap.is_in_old(slot.as_address()) && heap.is_in_young(new_object.to_raw_address()) {
            let card = heap.remset().card_table().index_for(slot.as_address());
            heap.remset().defer_card(card, &mut copy.dirty_card_queue);
        }
    }

    /// Claim the dirty cards of an old region and push the slots on them that point into the
    /// collection set.
    fn scan_dirty_cards(&self, rgc: &RGC<VM>, queue: &ScannerTaskQueue, index: usize) {
        let heap = &rgc.heap;
        let region = heap.region(index);
        let scan_top = self.scan_tops[index];
        let mut ranges = vec![];
        heap.remset().card_table().dirty_card_iterate(
            region.bottom()..scan_top,
            Some(CLAIMED_CARD),
            |range| ranges.push(range),
        );
        if ranges.is_empty() {
            return;
        }
        trace!("Region {}: {} dirty card runs", index, ranges.len());
        heap.walk_objects(region.bottom()..scan_top, |object| {
            let end = VM::VMObjectModel::object_end(object);
            if !ranges_overlap(&ranges, object.to_raw_address(), end) {
                return;
            }
            VM::VMScanning::scan_object(object, &mut |slot: SimpleSlot| {
                if ranges_contain(&ranges, slot.as_address()) {
                    push_if_in_cset(rgc, queue, slot);
                }
            });
        });
    }
}
