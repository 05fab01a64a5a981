//! The collector instance.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::plan::gc_state::GcState;
use crate::plan::satb::{new_satb_mark_queue_set, SATBMarkQueueSet};
use crate::policy::region::{Affiliation, RegionSpace};
use crate::scheduler::WorkerGroup;
use crate::util::copy::{AgeTable, EvacuationStats};
use crate::util::options::Options;
use crate::util::roots::RootTable;
use crate::util::safepoint::SafepointSynchronizer;
use crate::util::weak_table::{ProtectionDomainCache, StringDedupTable};
use crate::vm::VMBinding;

/// Builds an [`RGC`] instance. Options are read from `RGC_*` environment variables first and
/// can then be overridden programmatically.
pub struct RGCBuilder {
    pub options: Options,
}

impl RGCBuilder {
    pub fn new() -> Self {
        RGCBuilder {
            options: Options::default(),
        }
    }

    /// Like `new`, but ignores `RGC_*` environment variables.
    pub fn new_no_env_vars() -> Self {
        RGCBuilder {
            options: Options::new(),
        }
    }

    /// Set an option. Returns false if the name is unknown or the value is invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Create the collector. Panics if the heap cannot be reserved.
    pub fn build<VM: VMBinding>(&self) -> RGC<VM> {
        RGC::new(Arc::new(self.options.clone()))
    }
}

impl Default for RGCBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An RGC instance: the heap, its side tables, the barrier queue sets, and the collectors.
pub struct RGC<VM: VMBinding> {
    pub(crate) options: Arc<Options>,
    pub(crate) heap: RegionSpace<VM>,
    pub(crate) gc_state: GcState,
    pub(crate) satb_mark_queue_set: SATBMarkQueueSet,
    pub(crate) safepoint: SafepointSynchronizer,
    pub(crate) roots: RootTable,
    pub(crate) string_dedup_table: Mutex<StringDedupTable>,
    pub(crate) protection_domain_cache: Mutex<ProtectionDomainCache>,
    pub(crate) workers: WorkerGroup,
    pub(crate) evacuation_stats: EvacuationStats,
    /// Survivor census of the running young collection.
    pub(crate) age_table: Mutex<AgeTable>,
    tenuring_threshold: AtomicUsize,
    /// Held for the whole of a collection. Young collections and concurrent cycles never
    /// overlap.
    pub(crate) collection_lock: Mutex<()>,
    gc_requested: AtomicBool,
    young_collections: AtomicUsize,
    concurrent_cycles: AtomicUsize,
    refinement_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<VM: VMBinding> RGC<VM> {
    pub fn new(options: Arc<Options>) -> Self {
        let heap = RegionSpace::new(&options).unwrap_or_else(|| {
            panic!(
                "Failed to reserve a heap of {} bytes with {}-byte regions",
                options.heap_size,
                1usize << options.log_region_size
            )
        });
        info!(
            "Heap: {} regions of {} bytes, {} workers, {:?} mode",
            heap.num_regions(),
            heap.region_size(),
            options.threads,
            options.collector_mode
        );
        RGC {
            satb_mark_queue_set: new_satb_mark_queue_set(&options),
            workers: WorkerGroup::new(options.threads),
            tenuring_threshold: AtomicUsize::new(options.initial_tenuring_threshold),
            heap,
            gc_state: GcState::new(),
            safepoint: SafepointSynchronizer::new(),
            roots: RootTable::new(),
            string_dedup_table: Mutex::new(StringDedupTable::default()),
            protection_domain_cache: Mutex::new(ProtectionDomainCache::default()),
            evacuation_stats: EvacuationStats::default(),
            age_table: Mutex::new(AgeTable::new()),
            collection_lock: Mutex::new(()),
            gc_requested: AtomicBool::new(false),
            young_collections: AtomicUsize::new(0),
            concurrent_cycles: AtomicUsize::new(0),
            refinement_thread: Mutex::new(None),
            options,
        }
    }

    pub fn get_options(&self) -> &Options {
        &self.options
    }

    pub fn get_heap(&self) -> &RegionSpace<VM> {
        &self.heap
    }

    pub fn gc_state(&self) -> &GcState {
        &self.gc_state
    }

    pub fn safepoint(&self) -> &SafepointSynchronizer {
        &self.safepoint
    }

    pub fn roots(&self) -> &RootTable {
        &self.roots
    }

    pub fn evacuation_stats(&self) -> &EvacuationStats {
        &self.evacuation_stats
    }

    /// The age at which young collections promote objects.
    pub fn tenuring_threshold(&self) -> usize {
        self.tenuring_threshold.load(Ordering::Relaxed)
    }

    pub(crate) fn set_tenuring_threshold(&self, threshold: usize) {
        self.tenuring_threshold.store(threshold, Ordering::Relaxed)
    }

    /// Has allocation filled the young generation?
    pub fn is_gc_requested(&self) -> bool {
        self.gc_requested.load(Ordering::Relaxed)
    }

    pub(crate) fn check_gc_request(&self) {
        if self.heap.count_regions(Affiliation::Young) >= self.options.young_regions
            && !self.gc_requested.swap(true, Ordering::Relaxed)
        {
            debug!("Young generation is full, requesting a collection");
        }
    }

    pub(crate) fn clear_gc_request(&self) {
        self.gc_requested.store(false, Ordering::Relaxed);
    }

    pub fn young_collections(&self) -> usize {
        self.young_collections.load(Ordering::Relaxed)
    }

    pub(crate) fn count_young_collection(&self) -> usize {
        self.young_collections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn concurrent_cycles(&self) -> usize {
        self.concurrent_cycles.load(Ordering::Relaxed)
    }

    pub(crate) fn count_concurrent_cycle(&self) -> usize {
        self.concurrent_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start the thread that processes completed dirty card buffers while mutators run.
    pub fn spawn_refinement_thread(&'static self) {
        let mut handle = self.refinement_thread.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let thread = std::thread::Builder::new()
            .name("RGC Refinement".to_string())
            .spawn(move || {
                let qset = self.heap.remset().dirty_card_queue_set();
                while qset.wait_until_non_empty() {
                    let _section = self.safepoint.enter();
                    self.heap.remset().refine_completed_buffers();
                }
                debug!("Refinement thread exits");
            })
            .expect("Failed to spawn the refinement thread");
        *handle = Some(thread);
    }

    /// Stop the refinement thread, if it is running, and wait for it.
    pub fn stop_refinement_thread(&self) {
        let handle = self.refinement_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            self.heap.remset().dirty_card_queue_set().cancel_wait();
            if handle.join().is_err() {
                warn!("The refinement thread panicked");
            }
        }
    }
}
