//! Read and write barriers.
//!
//! The fast paths are checks of the gc state byte. The slow paths here log overwritten values
//! for marking (SATB), log old-to-young slots for the remembered set, and resolve references
//! into the collection set (the load-reference barrier).

use crate::plan::satb::{satb_enqueue, SATBMarkQueue};
use crate::policy::region::remset::DirtyCardQueue;
use crate::policy::region::Affiliation;
use crate::util::copy::{CopySemantics, GCWorkerCopyContext};
use crate::util::object_forwarding;
use crate::util::options::CollectorMode;
use crate::util::safepoint::NoSafepointVerifier;
use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::{Scanning, VMBinding};
use crate::RGC;

/// The barrier state of one mutator thread.
pub struct RegionalBarrier<VM: VMBinding> {
    rgc: &'static RGC<VM>,
    satb: SATBMarkQueue,
    dirty_cards: DirtyCardQueue,
    copy: GCWorkerCopyContext<VM>,
}

impl<VM: VMBinding> RegionalBarrier<VM> {
    pub fn new(rgc: &'static RGC<VM>) -> Self {
        Self {
            rgc,
            satb: SATBMarkQueue::new(&rgc.satb_mark_queue_set),
            dirty_cards: DirtyCardQueue::new(rgc.heap.remset().dirty_card_queue_set()),
            copy: GCWorkerCopyContext::new(rgc),
        }
    }

    fn is_generational(&self) -> bool {
        self.rgc.options.collector_mode == CollectorMode::Generational
    }

    /// Log `object` for marking. This is the slow path of the pre-write barrier.
    pub fn satb_enqueue(&mut self, object: ObjectReference) {
        debug_assert!(self.rgc.gc_state.is_marking());
        satb_enqueue(
            &self.rgc.heap,
            &self.rgc.satb_mark_queue_set,
            &mut self.satb,
            object,
        );
    }

    /// Log the value about to be overwritten while marking is active.
    #[inline(always)]
    pub fn satb_pre_write(&mut self, old: Option<ObjectReference>) {
        if !self.rgc.gc_state.is_marking() {
            return;
        }
        if let Some(old) = old {
            self.satb_enqueue(old);
        }
    }

    /// Record a store of `target` into `slot` in the remembered set.
    #[inline(always)]
    pub fn post_write(&mut self, slot: SimpleSlot, target: Option<ObjectReference>) {
        if !self.is_generational() {
            return;
        }
        let Some(target) = target else {
            return;
        };
        let heap = &self.rgc.heap;
        if !heap.is_in_old(slot.as_address()) || !heap.is_in_young(target.to_raw_address()) {
            return;
        }
        let card_table = heap.remset().card_table();
        let card = card_table.index_for(slot.as_address());
        if !card_table.is_card_dirty(card) {
            heap.remset().dirty_card(card, &mut self.dirty_cards);
        }
    }

    /// Resolve `value`, which was loaded from `slot`, to its to-space copy. Copies the object
    /// first if evacuation is in progress. The slot is healed if it still holds `value`.
    #[inline(always)]
    pub fn load_reference_barrier(
        &mut self,
        value: Option<ObjectReference>,
        slot: Option<SimpleSlot>,
    ) -> Option<ObjectReference> {
        let object = value?;
        if !self.rgc.gc_state.has_forwarded() || !self.rgc.heap.in_cset(object) {
            return value;
        }
        let resolved = self.load_reference_barrier_slow(object);
        if resolved != object {
            if let Some(slot) = slot {
                // The logical value does not change, so no other barrier applies.
                let _ = slot.compare_exchange(Some(object), Some(resolved));
            }
        }
        Some(resolved)
    }

    #[cold]
    fn load_reference_barrier_slow(&mut self, object: ObjectReference) -> ObjectReference {
        if let Some(forwardee) = object_forwarding::get_forwardee::<VM>(object) {
            return forwardee;
        }
        if !self.rgc.gc_state.is_evacuation_in_progress() {
            return object;
        }
        let _no_safepoint = NoSafepointVerifier::new(&self.rgc.safepoint);
        let semantics = match self.rgc.heap.region_of(object.to_raw_address()).affiliation() {
            Affiliation::Old => CopySemantics::Old,
            _ => CopySemantics::Young,
        };
        self.copy.evacuate_object(object, semantics, None)
    }

    /// Load from `slot` through the load-reference barrier.
    pub fn object_reference_read(&mut self, slot: SimpleSlot) -> Option<ObjectReference> {
        let value = slot.load();
        self.load_reference_barrier(value, Some(slot))
    }

    /// Store `target` into `slot` with the pre- and post-write barriers.
    pub fn object_reference_write(&mut self, slot: SimpleSlot, target: Option<ObjectReference>) {
        debug_assert!(
            target.map_or(true, |t| !self.rgc.gc_state.has_forwarded()
                || !self.rgc.heap.in_cset(t)
                || object_forwarding::is_self_forwarded::<VM>(t)),
            "Storing a from-space reference {:?}",
            target
        );
        if self.rgc.gc_state.is_marking() {
            self.satb_pre_write(slot.load());
        }
        slot.store(target);
        self.post_write(slot, target);
    }

    /// Compare-and-exchange on a reference slot. The slot may hold a from-space copy of
    /// `expected`, which must still compare equal.
    pub fn object_reference_compare_exchange(
        &mut self,
        slot: SimpleSlot,
        expected: Option<ObjectReference>,
        new: Option<ObjectReference>,
    ) -> Result<Option<ObjectReference>, Option<ObjectReference>> {
        if self.rgc.gc_state.is_marking() {
            self.satb_pre_write(slot.load());
        }
        let mut expected_raw = expected;
        loop {
            match slot.compare_exchange(expected_raw, new) {
                Ok(old) => {
                    self.post_write(slot, new);
                    return Ok(self.resolve(old));
                }
                Err(witness) => {
                    if !self.rgc.gc_state.has_forwarded() {
                        return Err(witness);
                    }
                    let resolved_witness = self.resolve(witness);
                    if resolved_witness != self.resolve(expected) {
                        return Err(resolved_witness);
                    }
                    // The slot holds another copy of the expected object. Retry against it.
                    expected_raw = witness;
                }
            }
        }
    }

    fn resolve(&mut self, value: Option<ObjectReference>) -> Option<ObjectReference> {
        self.load_reference_barrier(value, None)
    }

    /// Barrier for a bulk copy of `len` reference slots from `src` starting at `src_start` to
    /// `dst` starting at `dst_start`. Runs before the copy.
    pub fn array_copy_pre(
        &mut self,
        src: ObjectReference,
        src_start: usize,
        dst: ObjectReference,
        dst_start: usize,
        len: usize,
    ) {
        if self.rgc.gc_state.is_marking() {
            for i in dst_start..dst_start + len {
                let old = VM::VMScanning::slot(dst, i).load();
                self.satb_pre_write(old);
            }
        }
        if self.rgc.gc_state.has_forwarded() {
            // Heal the source so the copied values are to-space references.
            for i in src_start..src_start + len {
                self.object_reference_read(VM::VMScanning::slot(src, i));
            }
        }
    }

    /// Barrier for a bulk copy into `dst`. Runs after the copy.
    pub fn array_copy_post(&mut self, dst: ObjectReference, dst_start: usize, len: usize) {
        if !self.is_generational() || len == 0 {
            return;
        }
        let heap = &self.rgc.heap;
        if !heap.is_in_old(dst.to_raw_address()) {
            return;
        }
        let first = VM::VMScanning::slot(dst, dst_start).as_address();
        let last = VM::VMScanning::slot(dst, dst_start + len - 1).as_address();
        let card_table = heap.remset().card_table();
        for card in card_table.index_for(first)..=card_table.index_for(last) {
            if !card_table.is_card_dirty(card) {
                heap.remset().dirty_card(card, &mut self.dirty_cards);
            }
        }
    }

    /// Publish the thread-local buffers. Called when the mutator leaves its safepoint scope.
    pub fn flush(&mut self) {
        self.satb.flush(&self.rgc.satb_mark_queue_set);
        self.dirty_cards
            .flush(self.rgc.heap.remset().dirty_card_queue_set());
        self.copy.flush();
    }

    /// Drop buffered SATB entries. Used when marking was cancelled.
    pub fn reset_satb(&mut self) {
        self.satb.reset();
    }
}
