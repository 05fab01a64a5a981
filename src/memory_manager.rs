//! VM-to-RGC interface: safe Rust APIs.
//!
//! A binding creates one [`RGC`] instance with [`rgc_init`], leaks it to get a `'static`
//! reference, and binds a [`Mutator`] per thread. All heap accesses happen inside a
//! [`MutatorScope`], which a mutator enters with [`Mutator::enter`]. Collections only start
//! when no scope is open, so object references loaded in a scope must not be used after it.
//! Objects that have to stay alive across scopes are kept in root handles.
//!
//! The barrier functions here are the slow paths of the barriers a compiler would inline. A
//! binding without a compiler calls them for every reference access.

use crate::build_info;
use crate::plan::generational::{self, YoungCollectionSummary};
use crate::plan::satb::satb_enqueue_shared;
use crate::plan::{concurrent, AllocationError, CycleOutcome, Mutator, MutatorScope};
use crate::util::copy::EvacuationTracker;
use crate::util::options::CollectorMode;
use crate::util::roots::RootHandle;
use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::{Scanning, VMBinding};
use crate::{RGCBuilder, RGC};

/// Initialize an RGC instance from a builder. Reserves the heap and attempts to initialize
/// the logger.
///
/// Note that this returns a box. The mutator and collection APIs need a `&'static RGC`, so
/// bindings usually leak the box or keep the instance in a lazily initialized static.
pub fn rgc_init<VM: VMBinding>(builder: &RGCBuilder) -> Box<RGC<VM>> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("RGC initialized the logger."),
        Err(_) => debug!(
            "RGC failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    info!(
        "Initializing RGC {} ({}, features: {})",
        build_info::RGC_PKG_VERSION,
        build_info::RGC_PROFILE,
        build_info::RGC_FEATURES
    );
    Box::new(builder.build())
}

/// Start the threads that run alongside mutators. In generational mode this is the refinement
/// thread, which processes completed dirty card buffers.
pub fn initialize_collection<VM: VMBinding>(rgc: &'static RGC<VM>) {
    if rgc.options.collector_mode == CollectorMode::Generational {
        rgc.spawn_refinement_thread();
    }
}

/// Request the threads started by `initialize_collection` to stop, and wait for them.
pub fn shutdown_collection<VM: VMBinding>(rgc: &RGC<VM>) {
    rgc.stop_refinement_thread();
}

/// Process an option.
///
/// Arguments:
/// * `builder`: The reference to an RGC builder.
/// * `name`: The name of the option.
/// * `value`: The value of the option (as a string).
pub fn process(builder: &mut RGCBuilder, name: &str, value: &str) -> bool {
    builder.set_option(name, value)
}

/// Request an RGC mutator for a mutator thread.
pub fn bind_mutator<VM: VMBinding>(rgc: &'static RGC<VM>) -> Box<Mutator<VM>> {
    let mutator = Box::new(Mutator::new(rgc));
    trace!("Bound a mutator");
    mutator
}

/// Reclaim a mutator that is no longer needed. Its buffers are published first.
pub fn destroy_mutator<VM: VMBinding>(mut mutator: Box<Mutator<VM>>) {
    flush_mutator(&mut mutator);
}

/// Publish the thread-local buffers of a mutator and retire its allocation buffer. Leaving a
/// scope does the same.
pub fn flush_mutator<VM: VMBinding>(mutator: &mut Mutator<VM>) {
    mutator.enter().flush();
}

/// Allocate `size` bytes of zeroed memory for an object. The binding formats the object before
/// the scope ends.
///
/// Arguments:
/// * `scope`: The mutator scope to perform this allocation request.
/// * `size`: The number of bytes required for the object. Rounded up to the object alignment.
pub fn alloc<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    size: usize,
) -> Result<Address, AllocationError> {
    scope.alloc(size)
}

/// Store `target` into `slot`, with the pre- and post-write barriers.
pub fn object_reference_write<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    slot: SimpleSlot,
    target: Option<ObjectReference>,
) {
    scope.barrier().object_reference_write(slot, target)
}

/// Load from `slot` through the load-reference barrier.
pub fn object_reference_read<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    slot: SimpleSlot,
) -> Option<ObjectReference> {
    scope.barrier().object_reference_read(slot)
}

/// Atomically replace the value of `slot` with `new` if it refers to the same object as
/// `expected`. Returns the previous value on success and the current value on failure, both
/// resolved to their to-space copies.
pub fn object_reference_compare_exchange<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    slot: SimpleSlot,
    expected: Option<ObjectReference>,
    new: Option<ObjectReference>,
) -> Result<Option<ObjectReference>, Option<ObjectReference>> {
    scope
        .barrier()
        .object_reference_compare_exchange(slot, expected, new)
}

/// The slow path of the SATB pre-write barrier. Only valid while marking is active.
pub fn satb_enqueue<VM: VMBinding>(scope: &mut MutatorScope<'_, VM>, object: ObjectReference) {
    scope.barrier().satb_enqueue(object)
}

/// The load-reference barrier: resolve `value`, which was loaded from `slot`, to its to-space
/// copy, evacuating it if needed. The slot is healed if given.
pub fn load_reference_barrier<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    value: Option<ObjectReference>,
    slot: Option<SimpleSlot>,
) -> Option<ObjectReference> {
    scope.barrier().load_reference_barrier(value, slot)
}

/// The barrier before copying `len` reference slots from `src[src_start..]` to
/// `dst[dst_start..]`.
pub fn array_copy_pre<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    src: ObjectReference,
    src_start: usize,
    dst: ObjectReference,
    dst_start: usize,
    len: usize,
) {
    scope
        .barrier()
        .array_copy_pre(src, src_start, dst, dst_start, len)
}

/// The barrier after copying `len` reference slots into `dst[dst_start..]`.
pub fn array_copy_post<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    dst: ObjectReference,
    dst_start: usize,
    len: usize,
) {
    scope.barrier().array_copy_post(dst, dst_start, len)
}

/// Copy `len` reference slots from `src[src_start..]` to `dst[dst_start..]` with both
/// barriers. Overlapping ranges in the same object are handled like `memmove`.
pub fn array_copy<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    src: ObjectReference,
    src_start: usize,
    dst: ObjectReference,
    dst_start: usize,
    len: usize,
) {
    debug_assert!(src_start + len <= VM::VMScanning::num_slots(src));
    debug_assert!(dst_start + len <= VM::VMScanning::num_slots(dst));
    array_copy_pre(scope, src, src_start, dst, dst_start, len);
    let copy_one = |i: usize| {
        let value = VM::VMScanning::slot(src, src_start + i).load();
        VM::VMScanning::slot(dst, dst_start + i).store(value);
    };
    if src == dst && src_start < dst_start {
        (0..len).rev().for_each(copy_one);
    } else {
        (0..len).for_each(copy_one);
    }
    array_copy_post(scope, dst, dst_start, len);
}

/// The VM requests a collection, e.g. because allocation failed or
/// [`RGC::is_gc_requested`] is set. In generational mode this runs a young collection; in
/// concurrent mode it runs a whole concurrent cycle. Returns true if the collection freed all
/// of its collection set.
///
/// The mutator must not be in a scope. Its buffers were published when it left its last one.
pub fn handle_user_collection_request<VM: VMBinding>(
    rgc: &'static RGC<VM>,
    mutator: &mut Mutator<VM>,
) -> bool {
    debug_assert!(std::ptr::eq(rgc, mutator.rgc()));
    match rgc.options.collector_mode {
        CollectorMode::Generational => young_collect(rgc).failed_regions == 0,
        CollectorMode::Concurrent => concurrent_collect(rgc) == CycleOutcome::Completed,
    }
}

/// Run a young collection. Only meaningful in generational mode.
pub fn young_collect<VM: VMBinding>(rgc: &'static RGC<VM>) -> YoungCollectionSummary {
    debug_assert_eq!(rgc.options.collector_mode, CollectorMode::Generational);
    generational::collect(rgc)
}

/// Run a concurrent cycle on the calling thread, which must not be in a mutator scope.
pub fn concurrent_collect<VM: VMBinding>(rgc: &'static RGC<VM>) -> CycleOutcome {
    concurrent::collect(rgc)
}

/// Create a root handle holding `value`.
pub fn new_root<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    value: Option<ObjectReference>,
) -> RootHandle {
    scope.rgc().roots.allocate(value)
}

/// Load the object a root handle refers to.
pub fn root_load<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    handle: RootHandle,
) -> Option<ObjectReference> {
    let slot = scope.rgc().roots.slot(handle);
    scope.barrier().object_reference_read(slot)
}

/// Store `value` into a root handle. The old value is logged while marking.
pub fn root_store<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    handle: RootHandle,
    value: Option<ObjectReference>,
) {
    let slot = scope.rgc().roots.slot(handle);
    let barrier = scope.barrier();
    barrier.satb_pre_write(slot.load());
    slot.store(value);
}

/// Release a root handle. The object it held is logged while marking.
pub fn release_root<VM: VMBinding>(scope: &mut MutatorScope<'_, VM>, handle: RootHandle) {
    let rgc = scope.rgc();
    scope.barrier().satb_pre_write(rgc.roots.load(handle));
    rgc.roots.release(handle);
}

/// Return the canonical object for the string `s`. If there is none, `candidate` becomes the
/// canonical object. The result stays valid until the scope ends.
pub fn intern_string<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    s: &str,
    candidate: ObjectReference,
) -> ObjectReference {
    let rgc = scope.rgc();
    let mut table = rgc.string_dedup_table.lock().unwrap();
    match table.lookup_slot(s).and_then(|slot| keep_weak_referent(scope, slot)) {
        Some(object) => object,
        None => table.intern(s, || candidate),
    }
}

/// Look up the canonical object for `s` without creating one.
pub fn lookup_string<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    s: &str,
) -> Option<ObjectReference> {
    let rgc = scope.rgc();
    let table = rgc.string_dedup_table.lock().unwrap();
    table
        .lookup_slot(s)
        .and_then(|slot| keep_weak_referent(scope, slot))
}

/// Add a string that is never removed, e.g. from a persisted snapshot. Its object is a root.
pub fn insert_shared_string<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    s: &str,
    value: ObjectReference,
) {
    scope
        .rgc()
        .string_dedup_table
        .lock()
        .unwrap()
        .insert_shared(s, value)
}

/// Return the cached protection domain object for `key`. If there is none, `candidate` is
/// cached.
pub fn intern_protection_domain<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    key: u64,
    candidate: ObjectReference,
) -> ObjectReference {
    let rgc = scope.rgc();
    let mut table = rgc.protection_domain_cache.lock().unwrap();
    match table
        .lookup_slot(key)
        .and_then(|slot| keep_weak_referent(scope, slot))
    {
        Some(object) => object,
        None => table.intern(key, || candidate),
    }
}

/// Look up the cached protection domain object for `key`.
pub fn lookup_protection_domain<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    key: u64,
) -> Option<ObjectReference> {
    let rgc = scope.rgc();
    let table = rgc.protection_domain_cache.lock().unwrap();
    table
        .lookup_slot(key)
        .and_then(|slot| keep_weak_referent(scope, slot))
}

/// Hand out the referent of a weak table entry. While marking, the referent may not have been
/// found yet and would be unlinked at final mark, so it is logged as if a reference to it had
/// been overwritten.
fn keep_weak_referent<VM: VMBinding>(
    scope: &mut MutatorScope<'_, VM>,
    slot: SimpleSlot,
) -> Option<ObjectReference> {
    let rgc = scope.rgc();
    let barrier = scope.barrier();
    let object = barrier.object_reference_read(slot)?;
    if rgc.gc_state.is_marking() {
        barrier.satb_enqueue(object);
    }
    Some(object)
}

/// Log `object` for marking from a thread that has no mutator. Does nothing unless marking is
/// active.
pub fn satb_enqueue_without_mutator<VM: VMBinding>(rgc: &RGC<VM>, object: ObjectReference) {
    if rgc.gc_state.is_marking() {
        satb_enqueue_shared(&rgc.heap, &rgc.satb_mark_queue_set, object);
    }
}

/// Return the number of bytes in use, including allocation buffers.
pub fn used_bytes<VM: VMBinding>(rgc: &RGC<VM>) -> usize {
    rgc.heap.used_bytes()
}

/// Return the number of free regions.
pub fn free_regions<VM: VMBinding>(rgc: &RGC<VM>) -> usize {
    rgc.heap.free_regions()
}

/// Return the total heap size in bytes.
pub fn total_bytes<VM: VMBinding>(rgc: &RGC<VM>) -> usize {
    rgc.heap.num_regions() * rgc.heap.region_size()
}

/// Return the starting address of the heap.
pub fn starting_heap_address<VM: VMBinding>(rgc: &RGC<VM>) -> Address {
    rgc.heap.start()
}

/// Return the ending address of the heap.
pub fn last_heap_address<VM: VMBinding>(rgc: &RGC<VM>) -> Address {
    rgc.heap.end()
}

/// Is `object` in a region that is currently in use?
pub fn is_in_heap<VM: VMBinding>(rgc: &RGC<VM>, object: ObjectReference) -> bool {
    let addr = object.to_raw_address();
    rgc.heap.contains(addr) && rgc.heap.region_of(addr).is_active()
}

/// Evacuation statistics gathered since the last collection ended.
pub fn evacuation_stats<VM: VMBinding>(rgc: &RGC<VM>) -> EvacuationTracker {
    rgc.evacuation_stats.snapshot()
}
