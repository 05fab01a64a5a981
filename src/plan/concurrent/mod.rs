//! The concurrent cycle: mark, evacuate and update references while mutators run.
//!
//! ```text
//! init-mark     (pause)       capture TAMS, start SATB logging, snapshot the roots
//! mark                        trace from the roots and from completed SATB buffers
//! final-mark    (pause)       finish marking, drop dead weak entries, choose the collection
//!                             set, evacuate the roots
//! evacuate                    copy live collection-set objects
//! init-update-refs (pause)    capture update watermarks
//! update-refs                 fill dead objects, rewrite references to the collection set
//! final         (pause)       heal the roots, recycle the collection set
//! ```
//!
//! Every phase runs even when the collection set is empty, because update-refs also fills the
//! dead objects that marking found. Young collections rely on old regions holding no dead
//! objects with stale references.

mod evacuate;
mod mark;
mod update_refs;

use std::cmp::Reverse;
use std::marker::PhantomData;
use std::time::Instant;

use itertools::Itertools;

use self::evacuate::{evacuation_semantics, EvacuateTask};
use self::mark::MarkTask;
use self::update_refs::UpdateRefsTask;
use crate::plan::gc_state::GcState;
use crate::policy::region::{Affiliation, RegionState};
use crate::scheduler::{PartialArrayStates, ScannerTaskQueueSet, TaskTerminator, TerminatorBackoff};
use crate::util::copy::{EvacuationTracker, GCWorkerCopyContext};
use crate::util::object_forwarding;
use crate::util::options::CollectorMode;
use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::VMBinding;
use crate::RGC;

/// How a concurrent cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every live collection-set object was copied and the collection set was freed.
    Completed,
    /// Some objects could not be copied. Their regions were kept.
    EvacuationFailed,
}

/// Run a whole concurrent cycle on the calling thread. Mutators keep running between the
/// pauses.
pub fn collect<VM: VMBinding>(rgc: &'static RGC<VM>) -> CycleOutcome {
    let _collection = rgc.collection_lock.lock().unwrap();
    let start_time = Instant::now();

    let roots = init_mark(rgc);
    run_mark(rgc, &roots);
    drop(roots);
    let cset_regions = final_mark(rgc);

    rgc.workers.run_task(
        rgc,
        &EvacuateTask {
            phantom: PhantomData::<VM>,
        },
    );
    init_update_refs(rgc);
    rgc.workers.run_task(rgc, &UpdateRefsTask::<VM>::new());
    let outcome = final_update_refs(rgc);

    let count = rgc.count_concurrent_cycle();
    info!(
        "Concurrent cycle #{}: {} regions in the collection set, {:?}, {} free regions, {} ms",
        count,
        cset_regions,
        outcome,
        rgc.heap.free_regions(),
        start_time.elapsed().as_millis()
    );
    outcome
}

/// The strong roots: the root table and the shared weak-table entries.
fn strong_roots<VM: VMBinding>(rgc: &RGC<VM>) -> Vec<ObjectReference> {
    let mut roots = vec![];
    let mut visit = |slot: SimpleSlot| {
        if let Some(object) = slot.load() {
            roots.push(object);
        }
    };
    rgc.roots.slots_do(&mut visit);
    rgc.string_dedup_table
        .lock()
        .unwrap()
        .shared_slots_do(&mut visit);
    rgc.protection_domain_cache
        .lock()
        .unwrap()
        .shared_slots_do(&mut visit);
    roots
}

fn init_mark<VM: VMBinding>(rgc: &RGC<VM>) -> Vec<ObjectReference> {
    let _pause = rgc.safepoint.begin_pause();
    debug_assert!(rgc.gc_state.is_idle(), "{:?}", rgc.gc_state);
    let heap = &rgc.heap;
    for region in heap.regions().iter().filter(|r| r.is_active()) {
        region.capture_tams();
        region.clear_live_bytes();
        heap.marking_context()
            .clear_range(region.bottom()..region.end());
    }
    rgc.gc_state.set(GcState::MARKING);
    rgc.satb_mark_queue_set.set_active(true);
    let roots = strong_roots(rgc);
    debug!("Init mark: {} roots", roots.len());
    roots
}

fn run_mark<VM: VMBinding>(rgc: &'static RGC<VM>, roots: &[ObjectReference]) {
    let n_workers = rgc.workers.active_workers();
    let queues = ScannerTaskQueueSet::new(n_workers);
    let terminator = TaskTerminator::new(
        n_workers,
        &queues,
        TerminatorBackoff::from_options(&rgc.options),
    );
    let partial_arrays = PartialArrayStates::new(rgc.options.array_chunk_size);
    rgc.workers.run_task(
        rgc,
        &MarkTask {
            queues: &queues,
            terminator: &terminator,
            partial_arrays: &partial_arrays,
            roots,
            phantom: PhantomData::<VM>,
        },
    );
    debug_assert_eq!(partial_arrays.active(), 0);
}

/// Returns the size of the collection set.
fn final_mark<VM: VMBinding>(rgc: &'static RGC<VM>) -> usize {
    let _pause = rgc.safepoint.begin_pause();
    let heap = &rgc.heap;
    let satb = &rgc.satb_mark_queue_set;

    satb.request_force_flush();
    let roots = strong_roots(rgc);
    run_mark(rgc, &roots);
    rgc.gc_state.clear(GcState::MARKING);
    satb.set_active(false);
    satb.abandon_completed_buffers();

    let is_alive = |o: ObjectReference| heap.is_marked_or_above_tams(o);
    let dead_strings = rgc.string_dedup_table.lock().unwrap().unlink(is_alive);
    let dead_domains = rgc.protection_domain_cache.lock().unwrap().unlink(is_alive);
    debug!(
        "Final mark: unlinked {} strings and {} protection domains",
        dead_strings, dead_domains
    );

    heap.retire_current_regions();
    let cset_regions = select_collection_set(rgc);
    if rgc.options.collector_mode == CollectorMode::Generational {
        promote_in_place(rgc);
    }

    rgc.gc_state
        .set(GcState::EVACUATION | GcState::HAS_FORWARDED);
    let cset = heap.collection_set();
    for index in cset.regions() {
        heap.region(index).set_state(RegionState::CSet);
    }
    evacuate_roots(rgc);
    cset.reset_claims();
    cset_regions
}

/// Choose the regions with the most garbage, as long as their live data fits in the free
/// regions. Returns the number of regions chosen.
fn select_collection_set<VM: VMBinding>(rgc: &RGC<VM>) -> usize {
    let heap = &rgc.heap;
    let cset = heap.collection_set();
    debug_assert!(cset.is_empty());
    let region_size = heap.region_size();
    let garbage_threshold = region_size * rgc.options.garbage_threshold_percent / 100;
    let budget = heap.free_regions() * region_size;
    let mut live_total = 0;
    let candidates = heap
        .regions()
        .iter()
        .filter(|r| r.state() == RegionState::Regular && r.tams() > r.bottom())
        .filter(|r| r.garbage_bytes() > garbage_threshold)
        .sorted_by_key(|r| Reverse(r.garbage_bytes()));
    for region in candidates {
        // Objects allocated since marking started are live too.
        let live = region.live_bytes() + (region.top() - region.tams());
        if live_total + live > budget {
            break;
        }
        live_total += live;
        cset.add_region(region.index(), live);
    }
    debug!(
        "Collection set: {} regions, {} live bytes, {} bytes of free space",
        cset.len(),
        live_total,
        budget
    );
    cset.len()
}

/// Turn old enough, mostly live young regions into old regions without copying them.
fn promote_in_place<VM: VMBinding>(rgc: &RGC<VM>) -> usize {
    let heap = &rgc.heap;
    let cset = heap.collection_set();
    let tenuring_threshold = rgc.tenuring_threshold();
    let mut tracker = EvacuationTracker::new();
    let mut promoted = 0;
    for region in heap.regions() {
        if region.state() != RegionState::Regular
            || !region.is_young()
            || cset.is_in_index(region.index())
            || region.age() < tenuring_threshold
        {
            continue;
        }
        let live = region.live_bytes() + (region.top() - region.tams());
        if live * 100 < region.capacity() * rgc.options.promote_in_place_live_percent {
            continue;
        }
        if region.tams() > region.bottom() {
            heap.fill_dead_objects(region.bottom()..region.tams(), |o| heap.is_marked(o));
        }
        region.set_affiliation(Affiliation::Old);
        heap.remset().dirty_range(region.used_range());
        tracker.record_in_place_promotion(live);
        promoted += 1;
    }
    if promoted > 0 {
        debug!("Promoted {} regions in place", promoted);
        rgc.evacuation_stats.flush(&tracker);
    }
    promoted
}

/// Copy the collection-set objects the strong roots point to and update the roots.
fn evacuate_roots<VM: VMBinding>(rgc: &'static RGC<VM>) {
    let heap = &rgc.heap;
    let mut copy = GCWorkerCopyContext::new(rgc);
    let mut evacuate_slot = |slot: SimpleSlot| {
        let Some(object) = slot.load() else {
            return;
        };
        if heap.in_cset(object) {
            let semantics = evacuation_semantics(heap.region_of(object.to_raw_address()).affiliation());
            let forwardee = copy.evacuate_object(object, semantics, None);
            slot.store(Some(forwardee));
        }
    };
    rgc.roots.slots_do(&mut evacuate_slot);
    rgc.string_dedup_table
        .lock()
        .unwrap()
        .shared_slots_do(&mut evacuate_slot);
    rgc.protection_domain_cache
        .lock()
        .unwrap()
        .shared_slots_do(&mut evacuate_slot);
    copy.flush();
}

fn init_update_refs<VM: VMBinding>(rgc: &RGC<VM>) {
    let _pause = rgc.safepoint.begin_pause();
    let heap = &rgc.heap;
    rgc.gc_state.set(GcState::UPDATE_REFS);
    rgc.gc_state.clear(GcState::EVACUATION);
    for region in heap.regions().iter().filter(|r| r.is_active()) {
        if !heap.collection_set().is_in_index(region.index()) || region.evacuation_failed() {
            region.capture_update_watermark();
        }
    }
}

fn final_update_refs<VM: VMBinding>(rgc: &RGC<VM>) -> CycleOutcome {
    let _pause = rgc.safepoint.begin_pause();
    let heap = &rgc.heap;
    let cset = heap.collection_set();

    let mut heal = |slot: SimpleSlot| {
        if let Some(object) = slot.load() {
            if heap.in_cset(object) {
                slot.store(Some(object_forwarding::resolve_forwarded::<VM>(object)));
            }
        }
    };
    rgc.roots.slots_do(&mut heal);
    let mut resolve = |o: ObjectReference| object_forwarding::resolve_forwarded::<VM>(o);
    rgc.string_dedup_table.lock().unwrap().oops_do(&mut resolve);
    rgc.protection_domain_cache
        .lock()
        .unwrap()
        .oops_do(&mut resolve);

    #[cfg(feature = "extreme_assertions")]
    verify_no_cset_references(rgc);

    rgc.gc_state.clear_all();

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
            region.set_state(RegionState::Regular);
            region.set_evacuation_failed(false);
            failed_regions += 1;
        } else {
            heap.recycle_region(index);
        }
    }
    cset.clear();

    for region in heap.regions().iter().filter(|r| r.is_active() && r.is_young()) {
        region.increment_age();
    }

    rgc.evacuation_stats.report_and_reset("Concurrent cycle");
    if failed_regions > 0 {
        warn!("{} regions failed evacuation", failed_regions);
        CycleOutcome::EvacuationFailed
    } else {
        CycleOutcome::Completed
    }
}

/// Check that no live object outside the collection set still points into it.
#[cfg(feature = "extreme_assertions")]
fn verify_no_cset_references<VM: VMBinding>(rgc: &RGC<VM>) {
    use crate::vm::Scanning;

    let heap = &rgc.heap;
    let check = |slot: SimpleSlot| {
        if let Some(object) = slot.load() {
            assert!(
                !heap.in_cset(object) || object_forwarding::is_self_forwarded::<VM>(object),
                "{} still points to the collection set object {}",
                slot.as_address(),
                object
            );
        }
    };
    rgc.roots.slots_do(&mut { check });
    for region in heap.regions().iter().filter(|r| r.is_active()) {
        let in_cset = heap.collection_set().is_in_index(region.index());
        heap.walk_objects(region.used_range(), |object| {
            if !in_cset || object_forwarding::is_self_forwarded::<VM>(object) {
                VM::VMScanning::scan_object(object, &mut { check });
            }
        });
    }
}

#[cfg(all(test, feature = "mock_test"))]
mod tests {
    use super::*;
    use crate::memory_manager;
    use crate::util::roots::RootHandle;
    use crate::util::test_util::fixtures::*;
    use crate::util::test_util::mock_vm::*;
    use crate::util::test_util::serial_test;
    use crate::vm::Scanning;

    /// A concurrent-mode heap with a rooted object `a` whose two slots point to `b`, plus enough
    /// garbage next to them to put their region in the collection set.
    fn setup() -> (MutatorFixture, RootHandle, ObjectReference) {
        let mut fixture = MutatorFixture::create_with_builder(|builder| {
            assert!(builder.set_option("collector_mode", "Concurrent"));
        });
        let (root, b) = {
            let mut scope = fixture.mutator.enter();
            let a = alloc_object(&mut scope, 2, 1);
            set_payload(a, 0, 1);
            let b = alloc_object(&mut scope, 0, 1);
            set_payload(b, 0, 2);
            write_ref(&mut scope, a, 0, Some(b));
            write_ref(&mut scope, a, 1, Some(b));
            for _ in 0..6 {
                alloc_object(&mut scope, 0, 1000);
            }
            (memory_manager::new_root(&mut scope, Some(a)), b)
        };
        (fixture, root, b)
    }

    /// Run the cycle up to the start of concurrent evacuation.
    fn mark_and_select<VM: VMBinding>(rgc: &'static RGC<VM>) -> usize {
        let roots = init_mark(rgc);
        run_mark(rgc, &roots);
        final_mark(rgc)
    }

    fn finish<VM: VMBinding>(rgc: &'static RGC<VM>) -> CycleOutcome {
        rgc.workers.run_task(
            rgc,
            &EvacuateTask {
                phantom: PhantomData::<VM>,
            },
        );
        init_update_refs(rgc);
        rgc.workers.run_task(rgc, &UpdateRefsTask::<VM>::new());
        final_update_refs(rgc)
    }

    #[test]
    fn load_reference_barrier_evacuates_and_heals() {
        serial_test(|| {
            let (mut fixture, root, b) = setup();
            let rgc = fixture.rgc;
            assert_eq!(mark_and_select(rgc), 1);
            assert!(rgc.gc_state.is_evacuation_in_progress());
            assert!(rgc.heap.in_cset(b));

            let b_copy = {
                let mut scope = fixture.mutator.enter();
                // Roots were evacuated at final mark.
                let a = memory_manager::root_load(&mut scope, root).unwrap();
                assert!(!rgc.heap.in_cset(a));
                assert_eq!(get_ref(a, 0), Some(b));

                let b_copy = read_ref(&mut scope, a, 0).unwrap();
                assert_ne!(b_copy, b);
                assert!(!rgc.heap.in_cset(b_copy));
                assert_eq!(get_payload(b_copy, 0), 2);
                assert_eq!(object_forwarding::get_forwardee::<MockVM>(b), Some(b_copy));
                // The slot was healed, the other one was not touched.
                assert_eq!(get_ref(a, 0), Some(b_copy));
                assert_eq!(get_ref(a, 1), Some(b));
                // Resolving again finds the same copy.
                assert_eq!(
                    memory_manager::load_reference_barrier(&mut scope, Some(b), None),
                    Some(b_copy)
                );
                b_copy
            };

            assert_eq!(finish(rgc), CycleOutcome::Completed);
            assert!(rgc.gc_state.is_idle());
            let mut scope = fixture.mutator.enter();
            let a = memory_manager::root_load(&mut scope, root).unwrap();
            assert_eq!(get_ref(a, 0), Some(b_copy));
            // Update-refs healed the slot the mutator never read.
            assert_eq!(get_ref(a, 1), Some(b_copy));
        })
    }

    #[test]
    fn compare_exchange_sees_through_from_space_copies() {
        serial_test(|| {
            let (mut fixture, root, b) = setup();
            let rgc = fixture.rgc;
            mark_and_select(rgc);
            {
                let mut scope = fixture.mutator.enter();
                let a = memory_manager::root_load(&mut scope, root).unwrap();
                let b_copy = read_ref(&mut scope, a, 0).unwrap();
                assert_ne!(b_copy, b);

                // Slot 1 still holds the from-space reference. Expecting the to-space copy
                // succeeds and reports the resolved old value.
                let slot1 = <MockVM as Scanning<MockVM>>::slot(a, 1);
                assert_eq!(
                    memory_manager::object_reference_compare_exchange(
                        &mut scope,
                        slot1,
                        Some(b_copy),
                        None
                    ),
                    Ok(Some(b_copy))
                );
                assert_eq!(get_ref(a, 1), None);

                // A mismatch reports the current value.
                let slot0 = <MockVM as Scanning<MockVM>>::slot(a, 0);
                assert_eq!(
                    memory_manager::object_reference_compare_exchange(
                        &mut scope,
                        slot0,
                        None,
                        Some(a)
                    ),
                    Err(Some(b_copy))
                );
            }
            assert_eq!(finish(rgc), CycleOutcome::Completed);
        })
    }

    #[test]
    fn objects_allocated_while_marking_survive() {
        serial_test(|| {
            let (mut fixture, root, _) = setup();
            let rgc = fixture.rgc;
            let roots = init_mark(rgc);
            {
                let mut scope = fixture.mutator.enter();
                let a = memory_manager::root_load(&mut scope, root).unwrap();
                let fresh = alloc_object(&mut scope, 0, 1);
                set_payload(fresh, 0, 3);
                assert!(!rgc.heap.requires_marking(fresh.to_raw_address()));
                // The overwritten reference to `b` is logged, and `fresh` is above TAMS.
                write_ref(&mut scope, a, 0, Some(fresh));
                write_ref(&mut scope, a, 1, None);
            }
            run_mark(rgc, &roots);
            drop(roots);
            final_mark(rgc);
            assert_eq!(finish(rgc), CycleOutcome::Completed);

            let mut scope = fixture.mutator.enter();
            let a = memory_manager::root_load(&mut scope, root).unwrap();
            let fresh = get_ref(a, 0).unwrap();
            assert_eq!(get_payload(fresh, 0), 3);
            assert_eq!(get_ref(a, 1), None);
        })
    }

    #[test]
    fn satb_keeps_objects_moved_behind_the_marker() {
        serial_test(|| {
            let (mut fixture, root, b) = setup();
            let rgc = fixture.rgc;
            // `holder` is a root. `a` hands `b` over to it while marking runs.
            let holder_root = {
                let mut scope = fixture.mutator.enter();
                let holder = alloc_object(&mut scope, 1, 0);
                memory_manager::new_root(&mut scope, Some(holder))
            };
            let roots = init_mark(rgc);
            let holder = rgc.roots.load(holder_root).unwrap();
            assert!(roots.contains(&holder));
            // Trace `holder` alone before the mutator moves `b` into it.
            run_mark(rgc, &[holder]);
            assert!(rgc.heap.is_marked(holder));
            assert!(!rgc.heap.is_marked(b));
            {
                let mut scope = fixture.mutator.enter();
                let a = memory_manager::root_load(&mut scope, root).unwrap();
                // Deleting both edges from `a` logs `b` in the SATB buffer.
                write_ref(&mut scope, a, 0, None);
                write_ref(&mut scope, a, 1, None);
                write_ref(&mut scope, holder, 0, Some(b));
            }
            drop(roots);
            final_mark(rgc);
            assert!(rgc.heap.is_marked(b));
            assert_eq!(finish(rgc), CycleOutcome::Completed);

            let mut scope = fixture.mutator.enter();
            let holder = memory_manager::root_load(&mut scope, holder_root).unwrap();
            let b = get_ref(holder, 0).unwrap();
            assert_eq!(get_payload(b, 0), 2);
        })
    }
}
