//! Young collections.
//!
//! A young collection evacuates every young region in one pause. Survivors are copied to new
//! young regions, or promoted to old regions once their age reaches the tenuring threshold. The
//! roots are the root table, the shared weak-table entries and the dirty cards of old regions.

mod gc_work;

use std::marker::PhantomData;
use std::time::Instant;

use self::gc_work::YoungCollectionTask;
use crate::plan::tracing::distribute_tasks;
use crate::policy::region::{Affiliation, RegionState};
use crate::scheduler::{
    PartialArrayStates, ScannerTask, ScannerTaskQueueSet, TaskTerminator, TerminatorBackoff,
};
use crate::util::constants::{BYTES_IN_WORD, SURVIVOR_RATIO};
use crate::util::object_forwarding;
use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::VMBinding;
use crate::RGC;

/// What a young collection did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct YoungCollectionSummary {
    /// Young regions in the collection set.
    pub collected_regions: usize,
    /// Regions that kept their objects because evacuation ran out of space. They are old now.
    pub failed_regions: usize,
    /// The tenuring threshold for the next collection.
    pub tenuring_threshold: usize,
}

/// Run a young collection. Blocks until running mutator scopes have been left.
pub fn collect<VM: VMBinding>(rgc: &'static RGC<VM>) -> YoungCollectionSummary {
    let _collection = rgc.collection_lock.lock().unwrap();
    let _pause = rgc.safepoint.begin_pause();
    let start_time = Instant::now();
    let heap = &rgc.heap;
    let remset = heap.remset();
    let cset = heap.collection_set();
    debug_assert!(cset.is_empty());
    debug_assert!(rgc.gc_state.is_idle(), "{:?}", rgc.gc_state);

    // Every card logged by a mutator is still dirty.
    remset.dirty_card_queue_set().abandon_completed_buffers();
    heap.retire_current_regions();

    let mut scan_tops = vec![Address::ZERO; heap.num_regions()];
    let mut tasks: Vec<ScannerTask> = vec![];
    for region in heap.regions().iter().filter(|r| r.is_active()) {
        match region.affiliation() {
            Affiliation::Young => {
                cset.add_region(region.index(), region.used());
                region.set_state(RegionState::CSet);
            }
            Affiliation::Old => {
                scan_tops[region.index()] = region.top();
                tasks.push(ScannerTask::region(region.index()));
            }
            Affiliation::Free => unreachable!("Active region {:?}", region),
        }
    }
    let collected_regions = cset.len();
    rgc.roots
        .slots_do(&mut |slot: SimpleSlot| tasks.push(ScannerTask::slot(slot)));
    rgc.string_dedup_table
        .lock()
        .unwrap()
        .shared_slots_do(&mut |slot: SimpleSlot| tasks.push(ScannerTask::slot(slot)));
    rgc.protection_domain_cache
        .lock()
        .unwrap()
        .shared_slots_do(&mut |slot: SimpleSlot| tasks.push(ScannerTask::slot(slot)));
    debug!(
        "Young GC: {} young regions, {} initial tasks",
        collected_regions,
        tasks.len()
    );

    let n_workers = rgc.workers.active_workers();
    let queues = ScannerTaskQueueSet::new(n_workers);
    distribute_tasks(&queues, tasks);
    let terminator = TaskTerminator::new(
        n_workers,
        &queues,
        TerminatorBackoff::from_options(&rgc.options),
    );
    let partial_arrays = PartialArrayStates::new(rgc.options.array_chunk_size);
    rgc.workers.run_task(
        rgc,
        &YoungCollectionTask {
            queues: &queues,
            terminator: &terminator,
            partial_arrays: &partial_arrays,
            scan_tops: &scan_tops,
            tenuring_threshold: rgc.tenuring_threshold(),
            phantom: PhantomData::<VM>,
        },
    );
    debug_assert_eq!(partial_arrays.active(), 0);

    let is_alive = |o: ObjectReference| {
        !heap.in_cset(o) || object_forwarding::is_forwarded::<VM>(o)
    };
    let mut resolve = |o: ObjectReference| object_forwarding::resolve_forwarded::<VM>(o);
    {
        let mut table = rgc.string_dedup_table.lock().unwrap();
        table.unlink(is_alive);
        table.oops_do(&mut resolve);
    }
    {
        let mut table = rgc.protection_domain_cache.lock().unwrap();
        table.unlink(is_alive);
        table.oops_do(&mut resolve);
    }

    remset.redirty_logged_cards();
    remset
        .card_table()
        .clear_claimed(heap.start()..heap.end());

    let mut failed_regions = 0;
    for index in cset.regions() {
        let region = heap.region(index);
        if region.evacuation_failed() {
            heap.fill_dead_objects(region.used_range(), |o| {
                let live = object_forwarding::is_self_forwarded::<VM>(o);
                if live {
                    object_forwarding::clear_forwarding::<VM>(o);
                }
                live
            });
            region.set_affiliation(Affiliation::Old);
            region.set_state(RegionState::Regular);
            // Survivors in place may point to any young object.
            remset.dirty_range(region.used_range());
            region.set_evacuation_failed(false);
            failed_regions += 1;
        } else {
            heap.recycle_region(index);
        }
    }
    cset.clear();

    let survivor_capacity_words =
        rgc.options.young_regions * (heap.region_size() / BYTES_IN_WORD) / SURVIVOR_RATIO;
    let tenuring_threshold = {
        let mut age_table = rgc.age_table.lock().unwrap();
        let threshold = age_table.compute_tenuring_threshold(
            survivor_capacity_words,
            rgc.options.target_survivor_ratio,
            rgc.options.max_tenuring_threshold,
        );
        age_table.clear();
        threshold
    };
    rgc.set_tenuring_threshold(tenuring_threshold);

    rgc.evacuation_stats.report_and_reset("Young GC");
    rgc.clear_gc_request();
    let count = rgc.count_young_collection();
    info!(
        "Young GC #{}: {} regions collected, {} failed, {} free regions left, {} ms",
        count,
        collected_regions,
        failed_regions,
        heap.free_regions(),
        start_time.elapsed().as_millis()
    );
    YoungCollectionSummary {
        collected_regions,
        failed_regions,
        tenuring_threshold,
    }
}
