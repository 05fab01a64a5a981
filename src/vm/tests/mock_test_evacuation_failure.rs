use super::mock_test_prelude::*;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::object_forwarding;

#[test]
pub fn full_heap_keeps_objects_in_place() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create_with_builder(|builder| {
            assert!(builder.set_option("heap_size", &(4usize << 16).to_string()));
            assert!(builder.set_option("young_regions", "4"));
        });
        let rgc = fixture.rgc;

        // Fill the heap with one long list. Every object stays reachable.
        let (root, head, count) = {
            let mut scope = fixture.mutator.enter();
            let mut head = None;
            let mut count = 0;
            loop {
                match memory_manager::alloc(&mut scope, object_words(1, 1) * BYTES_IN_WORD) {
                    Ok(start) => {
                        let node = init_object(start, 1, 1);
                        set_payload(node, 0, count);
                        write_ref(&mut scope, node, 0, head);
                        head = Some(node);
                        count += 1;
                    }
                    Err(e) => {
                        assert_eq!(e, AllocationError::HeapOutOfMemory);
                        break;
                    }
                }
            }
            let head = head.unwrap();
            (memory_manager::new_root(&mut scope, Some(head)), head, count)
        };
        assert_eq!(memory_manager::free_regions(rgc), 0);

        assert!(!memory_manager::handle_user_collection_request(
            rgc,
            &mut fixture.mutator
        ));
        assert_eq!(
            memory_manager::evacuation_stats(rgc).failed_objects(),
            0,
            "statistics are reset at the end of a collection"
        );

        let heap = rgc.get_heap();
        let mut scope = fixture.mutator.enter();
        assert_eq!(memory_manager::root_load(&mut scope, root), Some(head));
        let mut node = Some(head);
        let mut expected = count;
        while let Some(n) = node {
            expected -= 1;
            assert_eq!(get_payload(n, 0), expected);
            assert!(heap.is_in_old(n.to_raw_address()));
            assert!(!object_forwarding::is_forwarded::<MockVM>(n));
            node = get_ref(n, 0);
        }
        assert_eq!(expected, 0);
    })
}

#[test]
pub fn failed_regions_are_reported() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create_with_builder(|builder| {
            assert!(builder.set_option("heap_size", &(2usize << 16).to_string()));
            assert!(builder.set_option("young_regions", "2"));
        });
        let rgc = fixture.rgc;
        let root = {
            let mut scope = fixture.mutator.enter();
            // One object per region, each too big to fit anywhere else.
            let words = (rgc.get_heap().region_size() / BYTES_IN_WORD) * 3 / 4;
            let first = alloc_object(&mut scope, 1, words);
            let second = alloc_object(&mut scope, 1, words);
            write_ref(&mut scope, first, 0, Some(second));
            memory_manager::new_root(&mut scope, Some(first))
        };
        let summary = memory_manager::young_collect(rgc);
        assert_eq!(summary.collected_regions, 2);
        assert_eq!(summary.failed_regions, 2);
        assert_eq!(rgc.get_heap().count_regions(crate::policy::region::Affiliation::Old), 2);

        // The survivors are old now. Later young collections leave them alone.
        let summary = memory_manager::young_collect(rgc);
        assert_eq!(summary.collected_regions, 0);
        let mut scope = fixture.mutator.enter();
        let first = memory_manager::root_load(&mut scope, root).unwrap();
        assert!(get_ref(first, 0).is_some());
    })
}
