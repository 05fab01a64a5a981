use super::mock_test_prelude::*;
use crate::util::roots::RootHandle;
use crate::util::ObjectReference;

fn promote_everything() -> MutatorFixture {
    MutatorFixture::create_with_builder(|builder| {
        assert!(builder.set_option("initial_tenuring_threshold", "0"));
    })
}

/// Allocate an object holding `nrefs` null slots, root it, and promote it with a young
/// collection. Returns the root.
fn promoted_object(fixture: &mut MutatorFixture, nrefs: usize) -> RootHandle {
    let rgc = fixture.rgc;
    let root = {
        let mut scope = fixture.mutator.enter();
        let object = alloc_object(&mut scope, nrefs, 1);
        set_payload(object, 0, 7);
        memory_manager::new_root(&mut scope, Some(object))
    };
    memory_manager::young_collect(rgc);
    root
}

fn load(fixture: &mut MutatorFixture, root: RootHandle) -> ObjectReference {
    let mut scope = fixture.mutator.enter();
    memory_manager::root_load(&mut scope, root).unwrap()
}

#[test]
pub fn objects_at_the_threshold_are_promoted() {
    serial_test(|| {
        let mut fixture = promote_everything();
        let rgc = fixture.rgc;
        let root = promoted_object(&mut fixture, 1);
        let object = load(&mut fixture, root);
        assert!(rgc.get_heap().is_in_old(object.to_raw_address()));
        assert_eq!(get_payload(object, 0), 7);
        // Promoted copies keep their age.
        assert_eq!(MockVM::get_age(object), 0);
    })
}

#[test]
pub fn old_to_young_references_are_found_through_cards() {
    serial_test(|| {
        let mut fixture = promote_everything();
        let rgc = fixture.rgc;
        let root = promoted_object(&mut fixture, 2);
        // Every collection from now on finds an empty census and raises the threshold, so the
        // young object below stays young.
        assert!(rgc.tenuring_threshold() > 0);

        let young = {
            let mut scope = fixture.mutator.enter();
            let old = memory_manager::root_load(&mut scope, root).unwrap();
            let young = alloc_object(&mut scope, 0, 1);
            set_payload(young, 0, 99);
            write_ref(&mut scope, old, 1, Some(young));
            young
        };

        memory_manager::young_collect(rgc);
        let old = load(&mut fixture, root);
        let copy = get_ref(old, 1).unwrap();
        assert_ne!(copy, young);
        assert!(rgc.get_heap().is_in_young(copy.to_raw_address()));
        assert_eq!(get_payload(copy, 0), 99);

        // The card stays dirty while the old object points into the young generation.
        memory_manager::young_collect(rgc);
        let old = load(&mut fixture, root);
        let copy2 = get_ref(old, 1).unwrap();
        assert_ne!(copy2, copy);
        assert_eq!(get_payload(copy2, 0), 99);
        assert_eq!(MockVM::get_age(copy2), 2);
    })
}

#[test]
pub fn array_copy_into_old_object_dirties_cards() {
    serial_test(|| {
        let mut fixture = promote_everything();
        let rgc = fixture.rgc;
        let n = 8;
        let root = promoted_object(&mut fixture, n);
        {
            let mut scope = fixture.mutator.enter();
            let old = memory_manager::root_load(&mut scope, root).unwrap();
            let src = alloc_object(&mut scope, n, 0);
            for i in 0..n {
                let element = alloc_object(&mut scope, 0, 1);
                set_payload(element, 0, i);
                // Young to young: no card is dirtied.
                write_ref(&mut scope, src, i, Some(element));
            }
            memory_manager::array_copy(&mut scope, src, 0, old, 0, n);
        }
        memory_manager::young_collect(rgc);
        let mut scope = fixture.mutator.enter();
        let old = memory_manager::root_load(&mut scope, root).unwrap();
        for i in 0..n {
            let element = get_ref(old, i).unwrap();
            assert!(rgc.get_heap().is_in_young(element.to_raw_address()));
            assert_eq!(get_payload(element, 0), i);
        }
    })
}

#[test]
pub fn array_copy_overlapping_ranges() {
    serial_test(|| {
        let mut fixture = MutatorFixture::create();
        let mut scope = fixture.mutator.enter();
        let array = alloc_object(&mut scope, 6, 0);
        let elements: Vec<ObjectReference> = (0..6)
            .map(|i| {
                let e = alloc_object(&mut scope, 0, 1);
                set_payload(e, 0, i);
                e
            })
            .collect();
        for (i, e) in elements.iter().enumerate() {
            write_ref(&mut scope, array, i, Some(*e));
        }
        // Shift right by two, like memmove.
        memory_manager::array_copy(&mut scope, array, 0, array, 2, 4);
        let payloads: Vec<usize> = (0..6)
            .map(|i| get_payload(get_ref(array, i).unwrap(), 0))
            .collect();
        assert_eq!(payloads, vec![0, 1, 0, 1, 2, 3]);
    })
}
