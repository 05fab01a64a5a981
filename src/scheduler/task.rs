//! Task encodings for the work-stealing queues.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::{NoUninit, Zeroable};

use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;

const TAG_BITS: usize = 2;
const TAG_MASK: usize = (1 << TAG_BITS) - 1;
const TAG_OBJECT: usize = 0;
const TAG_SLOT: usize = 1;
const TAG_PARTIAL_ARRAY: usize = 2;
const TAG_REGION: usize = 3;

/// A task in a worker's queue, packed into one word.
///
/// Objects and slots are word aligned, so the low two bits are free for a tag. Partial-array
/// states and regions are identified by an index shifted past the tag.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, NoUninit, Zeroable)]
pub struct ScannerTask(usize);

static_assertions::assert_eq_size!(ScannerTask, usize);

/// The decoded form of a [`ScannerTask`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScannerTaskKind {
    /// Scan the slots of an object.
    Object(ObjectReference),
    /// Process the reference in a slot.
    Slot(SimpleSlot),
    /// Scan the next chunk of a large object.
    PartialArray(PartialArrayHandle),
    /// Process the region with this index.
    Region(usize),
}

impl ScannerTask {
    pub fn object(object: ObjectReference) -> Self {
        Self(object.to_raw_address().as_usize() | TAG_OBJECT)
    }

    pub fn slot(slot: SimpleSlot) -> Self {
        Self(slot.as_address().as_usize() | TAG_SLOT)
    }

    pub fn partial_array(handle: PartialArrayHandle) -> Self {
        Self((handle.0 << TAG_BITS) | TAG_PARTIAL_ARRAY)
    }

    pub fn region(index: usize) -> Self {
        Self((index << TAG_BITS) | TAG_REGION)
    }

    pub fn kind(self) -> ScannerTaskKind {
        debug_assert!(self.0 != 0, "Empty task");
        let payload = self.0 & !TAG_MASK;
        match self.0 & TAG_MASK {
            TAG_OBJECT => ScannerTaskKind::Object(unsafe {
                ObjectReference::from_raw_address_unchecked(Address::from_usize(payload))
            }),
            TAG_SLOT => {
                ScannerTaskKind::Slot(SimpleSlot::from_address(unsafe { Address::from_usize(payload) }))
            }
            TAG_PARTIAL_ARRAY => {
                ScannerTaskKind::PartialArray(PartialArrayHandle(self.0 >> TAG_BITS))
            }
            _ => ScannerTaskKind::Region(self.0 >> TAG_BITS),
        }
    }
}

impl std::fmt::Debug for ScannerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            write!(f, "ScannerTask(empty)")
        } else {
            write!(f, "{:?}", self.kind())
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartialArrayHandle(usize);

/// Progress of the chunked scan of one large object.
struct PartialArrayState {
    object: ObjectReference,
    length: usize,
    next_index: AtomicUsize,
    /// Tasks that still refer to this state.
    pending: AtomicUsize,
}

/// Arena of [`PartialArrayState`]s shared by the workers of a phase.
///
/// The first chunk of a large object is scanned by the worker that found it. That worker
/// registers the rest with [`PartialArrayStates::start`] and pushes one task per remaining
/// chunk. Each task claims one chunk; the last one to finish frees the state.
pub struct PartialArrayStates {
    chunk_size: usize,
    states: spin::Mutex<(Vec<Option<PartialArrayState>>, Vec<usize>)>,
}

impl PartialArrayStates {
    pub fn new(chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            chunk_size,
            states: spin::Mutex::new((vec![], vec![])),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of tasks needed for the chunks after the first one.
    pub fn remaining_chunks(&self, length: usize) -> usize {
        length.div_ceil(self.chunk_size).saturating_sub(1)
    }

    /// Register a large object whose first chunk has been claimed by the caller. Returns the
    /// handle and the number of tasks to push, or `None` if the object fits in one chunk.
    pub fn start(
        &self,
        object: ObjectReference,
        length: usize,
    ) -> Option<(PartialArrayHandle, usize)> {
        let n_tasks = self.remaining_chunks(length);
        if n_tasks == 0 {
            return None;
        }
        let state = PartialArrayState {
            object,
            length,
            next_index: AtomicUsize::new(self.chunk_size),
            pending: AtomicUsize::new(n_tasks),
        };
        let mut guard = self.states.lock();
        let (states, free) = &mut *guard;
        let index = match free.pop() {
            Some(index) => {
                states[index] = Some(state);
                index
            }
            None => {
                states.push(Some(state));
                states.len() - 1
            }
        };
        trace!("Split {} ({} slots) into {} more chunks", object, length, n_tasks);
        Some((PartialArrayHandle(index), n_tasks))
    }

    /// Claim the next chunk for a task. The caller must call [`PartialArrayStates::finish`]
    /// afterwards.
    pub fn claim(&self, handle: PartialArrayHandle) -> (ObjectReference, Range<usize>) {
        let guard = self.states.lock();
        let state = guard.0[handle.0].as_ref().expect("Stale partial array handle");
        let start = state.next_index.fetch_add(self.chunk_size, Ordering::Relaxed);
        debug_assert!(start < state.length);
        (state.object, start..(start + self.chunk_size).min(state.length))
    }

    /// A task is done with its chunk. Frees the state after the last chunk.
    pub fn finish(&self, handle: PartialArrayHandle) {
        let mut guard = self.states.lock();
        let (states, free) = &mut *guard;
        let last = states[handle.0]
            .as_ref()
            .is_some_and(|s| s.pending.fetch_sub(1, Ordering::Relaxed) == 1);
        if last {
            states[handle.0] = None;
            free.push(handle.0);
        }
    }

    /// Number of large objects still being scanned.
    pub fn active(&self) -> usize {
        let guard = self.states.lock();
        guard.0.len() - guard.1.len()
    }
}
