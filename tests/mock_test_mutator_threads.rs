#![cfg(feature = "mock_test")]

use rgc::memory_manager;
use rgc::util::constants::BYTES_IN_WORD;
use rgc::util::test_util::fixtures::small_heap_builder;
use rgc::util::test_util::mock_vm::{self, MockVM};
use rgc::util::ObjectReference;
use rgc::{AllocationError, Mutator, MutatorScope, RGC};

const THREADS: usize = 3;
const LIST_LEN: usize = 200;
const ROUNDS: usize = 10000;

/// Allocate a mock object, or `None` if the heap is full.
fn try_alloc(
    scope: &mut MutatorScope<'_, MockVM>,
    nrefs: usize,
    payload: usize,
) -> Option<ObjectReference> {
    match memory_manager::alloc(scope, mock_vm::object_words(nrefs, payload) * BYTES_IN_WORD) {
        Ok(start) => Some(mock_vm::init_object(start, nrefs, payload)),
        Err(AllocationError::HeapOutOfMemory) => None,
        Err(e) => panic!("{}", e),
    }
}

fn collect_if_requested(rgc: &'static RGC<MockVM>, mutator: &mut Mutator<MockVM>, force: bool) {
    if force || rgc.is_gc_requested() {
        memory_manager::handle_user_collection_request(rgc, mutator);
    }
}

fn mutator_thread(rgc: &'static RGC<MockVM>, id: usize) {
    let mut mutator = memory_manager::bind_mutator(rgc);
    let root = {
        let mut scope = mutator.enter();
        memory_manager::new_root(&mut scope, None)
    };

    // Grow a list one node per scope, so collections can happen in between.
    let mut i = 0;
    while i < LIST_LEN {
        let done = {
            let mut scope = mutator.enter();
            match try_alloc(&mut scope, 1, 2) {
                Some(node) => {
                    mock_vm::set_payload(node, 0, id);
                    mock_vm::set_payload(node, 1, LIST_LEN - 1 - i);
                    let head = memory_manager::root_load(&mut scope, root);
                    let slot = <MockVM as rgc::vm::Scanning<MockVM>>::slot(node, 0);
                    memory_manager::object_reference_write(&mut scope, slot, head);
                    memory_manager::root_store(&mut scope, root, Some(node));
                    // Some garbage.
                    for _ in 0..ROUNDS / LIST_LEN {
                        if try_alloc(&mut scope, 0, 6).is_none() {
                            break;
                        }
                    }
                    true
                }
                None => false,
            }
        };
        if done {
            i += 1;
        }
        collect_if_requested(rgc, &mut mutator, !done);
    }

    let mut scope = mutator.enter();
    let mut node = memory_manager::root_load(&mut scope, root);
    let mut expected = 0;
    while let Some(n) = node {
        assert_eq!(mock_vm::get_payload(n, 0), id);
        assert_eq!(mock_vm::get_payload(n, 1), expected);
        expected += 1;
        let slot = <MockVM as rgc::vm::Scanning<MockVM>>::slot(n, 0);
        node = memory_manager::object_reference_read(&mut scope, slot);
    }
    assert_eq!(expected, LIST_LEN);
    memory_manager::release_root(&mut scope, root);
}

#[test]
fn mutators_and_young_collections() {
    let rgc: &'static RGC<MockVM> = Box::leak(memory_manager::rgc_init(&small_heap_builder()));
    memory_manager::initialize_collection(rgc);
    std::thread::scope(|s| {
        for id in 0..THREADS {
            s.spawn(move || mutator_thread(rgc, id));
        }
    });
    memory_manager::shutdown_collection(rgc);
    assert!(rgc.young_collections() > 0);
    assert_eq!(rgc.roots().len(), 0);
}
