//! Object copying: per-thread copy contexts and evacuation bookkeeping.

mod age_table;

pub use self::age_table::AgeTable;

use std::sync::Mutex;

use enum_map::{Enum, EnumMap};

use crate::policy::region::remset::DirtyCardQueue;
use crate::policy::region::{Affiliation, LocalAllocBuffer};
use crate::util::constants::OBJECT_ALIGNMENT;
use crate::util::conversions::raw_align_up;
use crate::util::object_forwarding;
use crate::util::options::CollectorMode;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};
use crate::RGC;

/// CopySemantics describes the copying operation: where the object comes from and where it
/// goes.
#[derive(Clone, Copy, Enum, Debug, PartialEq, Eq)]
pub enum CopySemantics {
    /// Young to young.
    Young,
    /// Old to old.
    Old,
    /// Young to old.
    Promotion,
}

impl CopySemantics {
    /// The affiliation of the region the copy goes to.
    pub fn target(&self) -> Affiliation {
        match self {
            CopySemantics::Young => Affiliation::Young,
            CopySemantics::Old | CopySemantics::Promotion => Affiliation::Old,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvacuationCounts {
    pub attempted_objects: usize,
    pub attempted_bytes: usize,
    pub completed_objects: usize,
    pub completed_bytes: usize,
}

/// Counts of attempted and completed copies. An attempt that loses the forwarding race is
/// never completed, so the difference is the work wasted on contention.
#[derive(Clone, Debug, Default)]
pub struct EvacuationTracker {
    counts: EnumMap<CopySemantics, EvacuationCounts>,
    promoted_in_place_bytes: usize,
    failed_objects: usize,
    failed_bytes: usize,
}

impl EvacuationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_evacuation(&mut self, semantics: CopySemantics, bytes: usize) {
        let c = &mut self.counts[semantics];
        c.attempted_objects += 1;
        c.attempted_bytes += bytes;
    }

    pub fn end_evacuation(&mut self, semantics: CopySemantics, bytes: usize) {
        let c = &mut self.counts[semantics];
        c.completed_objects += 1;
        c.completed_bytes += bytes;
        debug_assert!(c.completed_objects <= c.attempted_objects);
    }

    pub fn record_in_place_promotion(&mut self, bytes: usize) {
        self.promoted_in_place_bytes += bytes;
    }

    pub fn record_evacuation_failure(&mut self, bytes: usize) {
        self.failed_objects += 1;
        self.failed_bytes += bytes;
    }

    pub fn counts(&self, semantics: CopySemantics) -> EvacuationCounts {
        self.counts[semantics]
    }

    pub fn promoted_in_place_bytes(&self) -> usize {
        self.promoted_in_place_bytes
    }

    pub fn failed_objects(&self) -> usize {
        self.failed_objects
    }

    /// Bytes copied by attempts that did not complete.
    pub fn waste_bytes(&self) -> usize {
        self.counts
            .values()
            .map(|c| c.attempted_bytes - c.completed_bytes)
            .sum()
    }

    pub fn merge(&mut self, other: &EvacuationTracker) {
        for (semantics, c) in other.counts.iter() {
            let mine = &mut self.counts[semantics];
            mine.attempted_objects += c.attempted_objects;
            mine.attempted_bytes += c.attempted_bytes;
            mine.completed_objects += c.completed_objects;
            mine.completed_bytes += c.completed_bytes;
        }
        self.promoted_in_place_bytes += other.promoted_in_place_bytes;
        self.failed_objects += other.failed_objects;
        self.failed_bytes += other.failed_bytes;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Heap-wide evacuation statistics. Threads merge their trackers when they flush.
#[derive(Default)]
pub struct EvacuationStats {
    current: Mutex<EvacuationTracker>,
}

impl EvacuationStats {
    pub fn flush(&self, tracker: &EvacuationTracker) {
        self.current.lock().unwrap().merge(tracker);
    }

    /// A copy of the statistics gathered so far.
    pub fn snapshot(&self) -> EvacuationTracker {
        self.current.lock().unwrap().clone()
    }

    /// Log the statistics of a collection and start over.
    pub fn report_and_reset(&self, collection: &str) -> EvacuationTracker {
        let stats = std::mem::take(&mut *self.current.lock().unwrap());
        for (semantics, c) in stats.counts.iter() {
            if c.attempted_objects > 0 {
                info!(
                    "{}: {:?} copied {} objects ({} bytes), attempted {} objects ({} bytes)",
                    collection,
                    semantics,
                    c.completed_objects,
                    c.completed_bytes,
                    c.attempted_objects,
                    c.attempted_bytes
                );
            }
        }
        if stats.promoted_in_place_bytes > 0 {
            info!(
                "{}: promoted {} bytes in place",
                collection, stats.promoted_in_place_bytes
            );
        }
        if stats.failed_objects > 0 {
            warn!(
                "{}: failed to evacuate {} objects ({} bytes)",
                collection, stats.failed_objects, stats.failed_bytes
            );
        }
        stats
    }
}

/// The thread local struct for copying objects, used by GC workers and by mutators that
/// evacuate objects in the load-reference barrier.
pub struct GCWorkerCopyContext<VM: VMBinding> {
    rgc: &'static RGC<VM>,
    labs: EnumMap<Affiliation, LocalAllocBuffer>,
    pub tracker: EvacuationTracker,
    pub age_table: AgeTable,
    pub dirty_card_queue: DirtyCardQueue,
}

impl<VM: VMBinding> GCWorkerCopyContext<VM> {
    pub fn new(rgc: &'static RGC<VM>) -> Self {
        Self {
            rgc,
            labs: enum_map::enum_map! { a => LocalAllocBuffer::new(a) },
            tracker: EvacuationTracker::new(),
            age_table: AgeTable::new(),
            dirty_card_queue: DirtyCardQueue::new(rgc.heap.remset().dirty_card_queue_set()),
        }
    }

    fn gclab_size(&self) -> usize {
        raw_align_up(self.rgc.options.gclab_size, OBJECT_ALIGNMENT)
    }

    /// Allocate `bytes` for a copy in a region of `affiliation`.
    pub fn alloc_copy(&mut self, affiliation: Affiliation, bytes: usize) -> Option<Address> {
        if let Some(addr) = self.labs[affiliation].alloc(bytes) {
            return Some(addr);
        }
        let gclab_size = self.gclab_size();
        if bytes > gclab_size / 4 {
            // Large copies do not waste the rest of the GCLAB.
            return self.rgc.heap.allocate_shared(affiliation, bytes);
        }
        self.labs[affiliation].retire::<VM>();
        let chunk = self
            .rgc
            .heap
            .allocate_lab(affiliation, bytes, gclab_size)?;
        self.labs[affiliation].set(chunk.start, chunk.end);
        self.labs[affiliation].alloc(bytes)
    }

    /// Give back a copy that lost the forwarding race.
    fn undo_copy(&mut self, affiliation: Affiliation, start: Address, bytes: usize) {
        if !self.labs[affiliation].undo_allocation(start, bytes) {
            VM::VMObjectModel::fill_with_dummy_object(start, bytes);
        }
    }

    /// Copy `object` unless it is forwarded already, and return the forwardee. If no space can
    /// be found the object is forwarded to itself.
    ///
    /// `age` is written into the copy before it is published.
    pub fn evacuate_object(
        &mut self,
        object: ObjectReference,
        semantics: CopySemantics,
        age: Option<usize>,
    ) -> ObjectReference {
        self.evacuate(object, semantics, age).0
    }

    /// Like `evacuate_object`, but also tells whether this thread installed the forwardee. The
    /// winner of the race is the one that scans the copy.
    pub fn evacuate(
        &mut self,
        object: ObjectReference,
        semantics: CopySemantics,
        age: Option<usize>,
    ) -> (ObjectReference, bool) {
        if let Some(forwardee) = object_forwarding::get_forwardee::<VM>(object) {
            return (forwardee, false);
        }
        let bytes = VM::VMObjectModel::get_current_size(object);
        let target = semantics.target();
        self.tracker.begin_evacuation(semantics, bytes);
        let Some(to) = self.alloc_copy(target, bytes) else {
            return self.handle_evacuation_failure(object, bytes);
        };
        let copy = VM::VMObjectModel::copy(object, to);
        if let Some(age) = age {
            VM::VMObjectModel::set_age(copy, age);
        }
        let winner = object_forwarding::try_update_forwardee::<VM>(object, copy);
        if winner == copy {
            self.tracker.end_evacuation(semantics, bytes);
            if target == Affiliation::Old
                && self.rgc.options.collector_mode == CollectorMode::Generational
                && self.rgc.gc_state.is_evacuation_in_progress()
            {
                // The copy may point to young objects.
                self.rgc.heap.remset().dirty_range(to..to + bytes);
            }
            (copy, true)
        } else {
            self.undo_copy(target, to, bytes);
            (winner, false)
        }
    }

    fn handle_evacuation_failure(
        &mut self,
        object: ObjectReference,
        bytes: usize,
    ) -> (ObjectReference, bool) {
        let winner = object_forwarding::self_forward::<VM>(object);
        let won = winner == object;
        if won {
            let region = self.rgc.heap.region_of(object.to_raw_address());
            if !region.evacuation_failed() {
                warn!("Evacuation failed in region {}", region.index());
                region.set_evacuation_failed(true);
            }
            self.tracker.record_evacuation_failure(bytes);
        }
        (winner, won)
    }

    /// Retire the GCLABs so their regions stay parsable.
    pub fn retire_labs(&mut self) {
        for (_, lab) in self.labs.iter_mut() {
            lab.retire::<VM>();
        }
    }

    /// Retire the GCLABs and publish all thread-local state.
    pub fn flush(&mut self) {
        self.retire_labs();
        self.rgc.evacuation_stats.flush(&self.tracker);
        self.tracker.clear();
        if !self.age_table.is_empty() {
            self.rgc.age_table.lock().unwrap().merge(&self.age_table);
            self.age_table.clear();
        }
        self.dirty_card_queue
            .flush(self.rgc.heap.remset().dirty_card_queue_set());
    }
}
