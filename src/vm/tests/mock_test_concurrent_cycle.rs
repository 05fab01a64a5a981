use super::mock_test_prelude::*;
use crate::policy::region::Affiliation;
use crate::util::ObjectReference;
use crate::MutatorScope;

fn concurrent_mode() -> MutatorFixture {
    MutatorFixture::create_with_builder(|builder| {
        assert!(builder.set_option("collector_mode", "Concurrent"));
    })
}

fn build_list(scope: &mut MutatorScope<'_, MockVM>, len: usize) -> ObjectReference {
    let mut next = None;
    for i in (0..len).rev() {
        let node = alloc_object(scope, 1, 1);
        set_payload(node, 0, i);
        write_ref(scope, node, 0, next);
        next = Some(node);
    }
    next.unwrap()
}

fn check_list(scope: &mut MutatorScope<'_, MockVM>, head: ObjectReference, len: usize) {
    let mut node = Some(head);
    let mut i = 0;
    while let Some(n) = node {
        assert_eq!(get_payload(n, 0), i);
        node = read_ref(scope, n, 0);
        i += 1;
    }
    assert_eq!(i, len);
}

#[test]
pub fn reclaims_garbage_and_keeps_live_objects() {
    serial_test(|| {
        let mut fixture = concurrent_mode();
        let rgc = fixture.rgc;
        let (root, old_head) = {
            let mut scope = fixture.mutator.enter();
            let head = build_list(&mut scope, 50);
            for _ in 0..24 {
                alloc_object(&mut scope, 0, 1000);
            }
            (memory_manager::new_root(&mut scope, Some(head)), head)
        };
        assert!(rgc.get_heap().is_in_old(old_head.to_raw_address()));
        let free_before = memory_manager::free_regions(rgc);
        let used_before = memory_manager::used_bytes(rgc);

        assert!(memory_manager::handle_user_collection_request(
            rgc,
            &mut fixture.mutator
        ));
        assert_eq!(rgc.concurrent_cycles(), 1);
        assert_eq!(rgc.young_collections(), 0);
        assert!(rgc.gc_state().is_idle());
        assert!(memory_manager::free_regions(rgc) > free_before);
        assert!(memory_manager::used_bytes(rgc) < used_before);
        assert!(rgc.get_heap().collection_set().is_empty());

        let mut scope = fixture.mutator.enter();
        let head = memory_manager::root_load(&mut scope, root).unwrap();
        assert_ne!(head, old_head);
        check_list(&mut scope, head, 50);
    })
}

#[test]
pub fn cycle_without_garbage_copies_nothing() {
    serial_test(|| {
        let mut fixture = concurrent_mode();
        let rgc = fixture.rgc;
        let (root, old_head) = {
            let mut scope = fixture.mutator.enter();
            let head = build_list(&mut scope, 50);
            (memory_manager::new_root(&mut scope, Some(head)), head)
        };
        // The only region holds the list and the unused rest of a TLAB, which is below the
        // garbage threshold.
        assert_eq!(
            memory_manager::concurrent_collect(rgc),
            CycleOutcome::Completed
        );
        let mut scope = fixture.mutator.enter();
        let head = memory_manager::root_load(&mut scope, root).unwrap();
        assert_eq!(head, old_head);
        check_list(&mut scope, head, 50);
    })
}

#[test]
pub fn repeated_cycles_keep_the_graph() {
    serial_test(|| {
        let mut fixture = concurrent_mode();
        let rgc = fixture.rgc;
        let root = {
            let mut scope = fixture.mutator.enter();
            let head = build_list(&mut scope, 20);
            memory_manager::new_root(&mut scope, Some(head))
        };
        for cycle in 0..3 {
            {
                let mut scope = fixture.mutator.enter();
                for _ in 0..16 {
                    alloc_object(&mut scope, 0, 1000);
                }
            }
            assert_eq!(
                memory_manager::concurrent_collect(rgc),
                CycleOutcome::Completed
            );
            assert_eq!(rgc.concurrent_cycles(), cycle + 1);
            let mut scope = fixture.mutator.enter();
            let head = memory_manager::root_load(&mut scope, root).unwrap();
            check_list(&mut scope, head, 20);
        }
    })
}

#[test]
pub fn generational_mode_collects_old_regions() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create_with_builder(|builder| {
            assert!(builder.set_option("initial_tenuring_threshold", "0"));
        });
        let rgc = fixture.rgc;
        let (live, garbage) = {
            let mut scope = fixture.mutator.enter();
            let head = build_list(&mut scope, 30);
            let live = memory_manager::new_root(&mut scope, Some(head));
            let garbage: Vec<_> = (0..24)
                .map(|_| {
                    let object = alloc_object(&mut scope, 0, 1000);
                    memory_manager::new_root(&mut scope, Some(object))
                })
                .collect();
            (live, garbage)
        };
        // Promote everything, then drop most of it.
        memory_manager::young_collect(rgc);
        let heap = rgc.get_heap();
        let old_regions = heap.count_regions(Affiliation::Old);
        assert!(old_regions >= 3);
        {
            let mut scope = fixture.mutator.enter();
            for root in garbage {
                memory_manager::release_root(&mut scope, root);
            }
        }

        assert_eq!(
            memory_manager::concurrent_collect(rgc),
            CycleOutcome::Completed
        );
        assert!(heap.count_regions(Affiliation::Old) < old_regions);
        let mut scope = fixture.mutator.enter();
        let head = memory_manager::root_load(&mut scope, live).unwrap();
        assert!(heap.is_in_old(head.to_raw_address()));
        check_list(&mut scope, head, 30);
    })
}
