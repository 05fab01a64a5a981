// Parts of this module are only used by tests behind the `mock_test` feature.
#![allow(dead_code)]

use std::sync::Mutex;

use crate::memory_manager;
use crate::plan::{Mutator, MutatorScope};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::test_util::mock_vm::{self, MockVM};
use crate::util::ObjectReference;
use crate::RGCBuilder;
use crate::RGC;

pub trait FixtureContent {
    fn create() -> Self;
}

/// SerialFixture ensures all `with_fixture()` calls will be executed serially.
pub struct SerialFixture<T: FixtureContent> {
    content: Mutex<Option<Box<T>>>,
}

impl<T: FixtureContent> SerialFixture<T> {
    pub fn new() -> Self {
        Self {
            content: Mutex::new(None),
        }
    }

    pub fn with_fixture_mut<F: FnOnce(&mut T)>(&self, func: F) {
        let mut c = self
            .content
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if c.is_none() {
            *c = Some(Box::new(T::create()));
        }
        func(c.as_mut().unwrap())
    }
}

impl<T: FixtureContent> Default for SerialFixture<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for a small heap: 64 regions of 64 KiB, two workers.
pub fn small_heap_builder() -> RGCBuilder {
    let mut builder = RGCBuilder::new_no_env_vars();
    for (name, value) in [
        ("threads", "2"),
        ("log_region_size", "16"),
        ("heap_size", "4194304"),
        ("young_regions", "8"),
        ("tlab_size", "4096"),
        ("gclab_size", "4096"),
        ("array_chunk_size", "16"),
        ("satb_buffer_size", "64"),
        ("dirty_card_buffer_size", "64"),
        ("work_stealing_hard_spins", "64"),
        ("work_stealing_yields_before_sleep", "10"),
    ] {
        assert!(builder.set_option(name, value), "{} = {}", name, value);
    }
    builder
}

pub struct RGCFixture {
    pub rgc: &'static RGC<MockVM>,
}

impl FixtureContent for RGCFixture {
    fn create() -> Self {
        Self::create_with_builder(|_| {})
    }
}

impl RGCFixture {
    pub fn create_with_builder<F>(with_builder: F) -> Self
    where
        F: FnOnce(&mut RGCBuilder),
    {
        let mut builder = small_heap_builder();
        with_builder(&mut builder);
        let rgc = memory_manager::rgc_init::<MockVM>(&builder);
        RGCFixture {
            rgc: Box::leak(rgc),
        }
    }
}

pub struct MutatorFixture {
    pub rgc: &'static RGC<MockVM>,
    pub mutator: Box<Mutator<MockVM>>,
}

impl FixtureContent for MutatorFixture {
    fn create() -> Self {
        Self::create_with_builder(|_| {})
    }
}

impl MutatorFixture {
    pub fn create_with_builder<F>(with_builder: F) -> Self
    where
        F: FnOnce(&mut RGCBuilder),
    {
        let rgc = RGCFixture::create_with_builder(with_builder).rgc;
        let mutator = memory_manager::bind_mutator(rgc);
        Self { rgc, mutator }
    }
}

unsafe impl Send for MutatorFixture {}

/// Allocate and format a mock object with `nrefs` reference slots and `payload` payload words.
pub fn alloc_object(
    scope: &mut MutatorScope<'_, MockVM>,
    nrefs: usize,
    payload: usize,
) -> ObjectReference {
    let bytes = mock_vm::object_words(nrefs, payload) * BYTES_IN_WORD;
    let start = memory_manager::alloc(scope, bytes).expect("Out of memory in a test");
    mock_vm::init_object(start, nrefs, payload)
}

/// Store `target` into the `index`-th slot of `object` through the write barrier.
pub fn write_ref(
    scope: &mut MutatorScope<'_, MockVM>,
    object: ObjectReference,
    index: usize,
    target: Option<ObjectReference>,
) {
    use crate::vm::Scanning;
    let slot = <MockVM as Scanning<MockVM>>::slot(object, index);
    memory_manager::object_reference_write(scope, slot, target)
}

/// Load the `index`-th slot of `object` through the load-reference barrier.
pub fn read_ref(
    scope: &mut MutatorScope<'_, MockVM>,
    object: ObjectReference,
    index: usize,
) -> Option<ObjectReference> {
    use crate::vm::Scanning;
    let slot = <MockVM as Scanning<MockVM>>::slot(object, index);
    memory_manager::object_reference_read(scope, slot)
}
