//! Per-thread mutator state.
//!
//! A mutator touches the heap only inside a [`MutatorScope`]. Pauses cannot happen while a
//! scope is open, and object references are only valid within the scope that loaded them.
//! Objects that must survive across scopes are kept in root handles.

use crate::plan::barriers::RegionalBarrier;
use crate::policy::region::{Affiliation, LocalAllocBuffer};
use crate::util::constants::{BYTES_IN_WORD, OBJECT_ALIGNMENT};
use crate::util::conversions::raw_align_up;
use crate::util::memory;
use crate::util::options::CollectorMode;
use crate::util::safepoint::SafepointCriticalSection;
use crate::util::Address;
use crate::vm::VMBinding;
use crate::RGC;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    /// No free region is left. A collection may help.
    HeapOutOfMemory,
    /// The object does not fit in a region.
    ObjectTooLarge,
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationError::HeapOutOfMemory => write!(f, "heap out of memory"),
            AllocationError::ObjectTooLarge => write!(f, "object larger than a region"),
        }
    }
}

impl std::error::Error for AllocationError {}

/// The thread-local state of a mutator: barrier buffers and the TLAB.
pub struct Mutator<VM: VMBinding> {
    rgc: &'static RGC<VM>,
    pub(crate) barrier: RegionalBarrier<VM>,
    tlab: LocalAllocBuffer,
}

impl<VM: VMBinding> Mutator<VM> {
    pub fn new(rgc: &'static RGC<VM>) -> Self {
        let affiliation = match rgc.options.collector_mode {
            CollectorMode::Generational => Affiliation::Young,
            CollectorMode::Concurrent => Affiliation::Old,
        };
        Self {
            rgc,
            barrier: RegionalBarrier::new(rgc),
            tlab: LocalAllocBuffer::new(affiliation),
        }
    }

    pub fn rgc(&self) -> &'static RGC<VM> {
        self.rgc
    }

    /// Enter a safepoint scope. Blocks while a pause is running.
    pub fn enter(&mut self) -> MutatorScope<'_, VM> {
        let section = self.rgc.safepoint.enter();
        MutatorScope {
            mutator: self,
            _section: section,
        }
    }
}

/// A mutator inside a safepoint scope. Dropping it publishes the thread-local buffers and lets
/// pauses proceed.
pub struct MutatorScope<'a, VM: VMBinding> {
    mutator: &'a mut Mutator<VM>,
    // Dropped after `drop` has flushed the mutator.
    _section: SafepointCriticalSection<'static>,
}

impl<VM: VMBinding> MutatorScope<'_, VM> {
    pub fn rgc(&self) -> &'static RGC<VM> {
        self.mutator.rgc
    }

    pub fn barrier(&mut self) -> &mut RegionalBarrier<VM> {
        &mut self.mutator.barrier
    }

    /// Allocate `bytes` of zeroed memory.
    pub fn alloc(&mut self, bytes: usize) -> Result<Address, AllocationError> {
        let bytes = raw_align_up(bytes.max(OBJECT_ALIGNMENT), OBJECT_ALIGNMENT);
        let addr = match self.mutator.tlab.alloc(bytes) {
            Some(addr) => addr,
            None => self.alloc_slow(bytes)?,
        };
        unsafe { memory::zero_words(addr, bytes / BYTES_IN_WORD) };
        Ok(addr)
    }

    #[cold]
    fn alloc_slow(&mut self, bytes: usize) -> Result<Address, AllocationError> {
        let rgc = self.mutator.rgc;
        if bytes > rgc.heap.region_size() {
            return Err(AllocationError::ObjectTooLarge);
        }
        let tlab_size = raw_align_up(rgc.options.tlab_size, OBJECT_ALIGNMENT);
        let affiliation = self.mutator.tlab.affiliation();
        let result = if bytes > tlab_size / 4 {
            rgc.heap.allocate_shared(affiliation, bytes)
        } else {
            self.mutator.tlab.retire::<VM>();
            rgc.heap
                .allocate_lab(affiliation, bytes, tlab_size.min(rgc.heap.region_size()))
                .and_then(|chunk| {
                    self.mutator.tlab.set(chunk.start, chunk.end);
                    self.mutator.tlab.alloc(bytes)
                })
        };
        rgc.check_gc_request();
        result.ok_or_else(|| {
            debug!("Allocation of {} bytes failed", bytes);
            AllocationError::HeapOutOfMemory
        })
    }

    /// Publish the barrier buffers and retire the allocation buffers.
    pub fn flush(&mut self) {
        self.mutator.tlab.retire::<VM>();
        self.mutator.barrier.flush();
    }
}

impl<VM: VMBinding> Drop for MutatorScope<'_, VM> {
    fn drop(&mut self) {
        self.flush();
    }
}
