//! Root handles: slots outside the heap that the VM uses to keep objects alive.
//!
//! Slots are allocated in fixed-size chunks that never move, so a handle maps to a stable
//! address that collectors can update in place.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::SlotVisitor;

const ROOT_CHUNK_SIZE: usize = 256;

type RootChunk = [AtomicUsize; ROOT_CHUNK_SIZE];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootHandle(usize);

impl RootHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Default)]
pub struct RootTable {
    chunks: spin::RwLock<Vec<Box<RootChunk>>>,
    /// Released handles and the number of handles ever allocated.
    free: spin::Mutex<(Vec<RootHandle>, usize)>,
    allocated: AtomicUsize,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a root handle that holds `value`.
    pub fn allocate(&self, value: Option<ObjectReference>) -> RootHandle {
        let handle = {
            let mut free = self.free.lock();
            match free.0.pop() {
                Some(handle) => handle,
                None => {
                    let handle = RootHandle(free.1);
                    free.1 += 1;
                    if handle.0 % ROOT_CHUNK_SIZE == 0 {
                        let chunk: Box<RootChunk> =
                            Box::new(std::array::from_fn(|_| AtomicUsize::new(0)));
                        self.chunks.write().push(chunk);
                    }
                    handle
                }
            }
        };
        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.slot(handle).store(value);
        handle
    }

    /// Release a handle. Its slot is cleared and may be handed out again.
    pub fn release(&self, handle: RootHandle) {
        self.slot(handle).store(None);
        self.allocated.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().0.push(handle);
    }

    pub fn slot(&self, handle: RootHandle) -> SimpleSlot {
        let chunks = self.chunks.read();
        let word = &chunks[handle.0 / ROOT_CHUNK_SIZE][handle.0 % ROOT_CHUNK_SIZE];
        SimpleSlot::from_address(Address::from_ref(word))
    }

    pub fn load(&self, handle: RootHandle) -> Option<ObjectReference> {
        self.slot(handle).load()
    }

    /// Visit every slot that holds an object.
    pub fn slots_do<V: SlotVisitor>(&self, visitor: &mut V) {
        let chunks = self.chunks.read();
        for word in chunks.iter().flat_map(|c| c.iter()) {
            if word.load(Ordering::Acquire) != 0 {
                visitor.visit_slot(SimpleSlot::from_address(Address::from_ref(word)));
            }
        }
    }

    /// All slots that hold an object.
    pub fn slots(&self) -> Vec<SimpleSlot> {
        let mut slots = vec![];
        self.slots_do(&mut |s: SimpleSlot| slots.push(s));
        slots
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
