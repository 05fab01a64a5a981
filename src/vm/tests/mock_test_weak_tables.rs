use super::mock_test_prelude::*;

fn tagged(scope: &mut crate::MutatorScope<'_, MockVM>, tag: usize) -> crate::util::ObjectReference {
    let object = alloc_object(scope, 0, 1);
    set_payload(object, 0, tag);
    object
}

#[test]
pub fn intern_returns_the_canonical_object() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create();
        let mut scope = fixture.mutator.enter();
        let first = tagged(&mut scope, 1);
        let second = tagged(&mut scope, 2);
        assert_eq!(memory_manager::intern_string(&mut scope, "java/lang/Object", first), first);
        assert_eq!(memory_manager::intern_string(&mut scope, "java/lang/Object", second), first);
        assert_eq!(memory_manager::lookup_string(&mut scope, "java/lang/Object"), Some(first));
        assert_eq!(memory_manager::lookup_string(&mut scope, "missing"), None);

        assert_eq!(memory_manager::intern_protection_domain(&mut scope, 17, second), second);
        assert_eq!(memory_manager::lookup_protection_domain(&mut scope, 17), Some(second));
        assert_eq!(memory_manager::lookup_protection_domain(&mut scope, 18), None);
    })
}

#[test]
pub fn young_collection_unlinks_dead_entries() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create();
        let rgc = fixture.rgc;
        let root = {
            let mut scope = fixture.mutator.enter();
            let dead = tagged(&mut scope, 1);
            memory_manager::intern_string(&mut scope, "dead", dead);
            let dead_domain = tagged(&mut scope, 2);
            memory_manager::intern_protection_domain(&mut scope, 1, dead_domain);

            let live = tagged(&mut scope, 3);
            memory_manager::intern_string(&mut scope, "live", live);
            let shared = tagged(&mut scope, 4);
            memory_manager::insert_shared_string(&mut scope, "shared", shared);
            memory_manager::new_root(&mut scope, Some(live))
        };

        memory_manager::young_collect(rgc);

        let mut scope = fixture.mutator.enter();
        assert_eq!(memory_manager::lookup_string(&mut scope, "dead"), None);
        assert_eq!(memory_manager::lookup_protection_domain(&mut scope, 1), None);
        let live = memory_manager::root_load(&mut scope, root).unwrap();
        assert_eq!(memory_manager::lookup_string(&mut scope, "live"), Some(live));
        assert_eq!(get_payload(live, 0), 3);
        // Shared entries are roots.
        let shared = memory_manager::lookup_string(&mut scope, "shared").unwrap();
        assert_eq!(get_payload(shared, 0), 4);
        assert!(rgc.get_heap().is_in_young(shared.to_raw_address()));

        // A dead key can be interned again.
        let again = tagged(&mut scope, 5);
        assert_eq!(memory_manager::intern_string(&mut scope, "dead", again), again);
    })
}

#[test]
pub fn concurrent_cycle_unlinks_unmarked_entries() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create_with_builder(|builder| {
            assert!(builder.set_option("collector_mode", "Concurrent"));
        });
        let rgc = fixture.rgc;
        let root = {
            let mut scope = fixture.mutator.enter();
            let dead = tagged(&mut scope, 1);
            memory_manager::intern_string(&mut scope, "dead", dead);
            let live = tagged(&mut scope, 2);
            memory_manager::intern_protection_domain(&mut scope, 7, live);
            memory_manager::new_root(&mut scope, Some(live))
        };

        assert_eq!(
            memory_manager::concurrent_collect(rgc),
            CycleOutcome::Completed
        );

        let mut scope = fixture.mutator.enter();
        assert_eq!(memory_manager::lookup_string(&mut scope, "dead"), None);
        let live = memory_manager::root_load(&mut scope, root).unwrap();
        assert_eq!(memory_manager::lookup_protection_domain(&mut scope, 7), Some(live));
    })
}
