//! Unbounded spill-over storage for task queues.

use atomic_refcell::AtomicRefCell;
use bytemuck::NoUninit;
use crossbeam::deque::Steal;

use super::queue::GenericTaskQueue;
use crate::util::constants::{OVERFLOW_MAX_CACHE_SIZE, OVERFLOW_SEGMENT_SIZE, TASKQUEUE_SIZE};

/// Index of a segment in the arena of a [`SegmentedStack`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct SegmentHandle(usize);

struct Segment<E> {
    elems: Vec<E>,
    prev: Option<SegmentHandle>,
}

/// A stack made of fixed-size segments. Segments live in an arena and are linked through
/// handles. Emptied segments go to a free list, and up to `max_cache_size` of them keep their
/// storage for reuse.
pub struct SegmentedStack<E> {
    segments: Vec<Segment<E>>,
    /// The segment holding the top of the stack.
    current: Option<SegmentHandle>,
    free: Vec<SegmentHandle>,
    /// Number of segments in `free` that still own their storage.
    cache_size: usize,
    /// Number of elements in the segments below `current`.
    full_segments_len: usize,
    segment_size: usize,
    max_cache_size: usize,
}

impl<E> Default for SegmentedStack<E> {
    fn default() -> Self {
        Self::new(OVERFLOW_SEGMENT_SIZE, OVERFLOW_MAX_CACHE_SIZE)
    }
}

impl<E> SegmentedStack<E> {
    pub fn new(segment_size: usize, max_cache_size: usize) -> Self {
        debug_assert!(segment_size > 0);
        Self {
            segments: vec![],
            current: None,
            free: vec![],
            cache_size: 0,
            full_segments_len: 0,
            segment_size,
            max_cache_size,
        }
    }

    fn alloc_segment(&mut self, prev: Option<SegmentHandle>) -> SegmentHandle {
        if let Some(handle) = self.free.pop() {
            let segment = &mut self.segments[handle.0];
            if segment.elems.capacity() > 0 {
                self.cache_size -= 1;
            } else {
                segment.elems.reserve_exact(self.segment_size);
            }
            segment.prev = prev;
            handle
        } else {
            self.segments.push(Segment {
                elems: Vec::with_capacity(self.segment_size),
                prev,
            });
            SegmentHandle(self.segments.len() - 1)
        }
    }

    fn free_segment(&mut self, handle: SegmentHandle) {
        let segment = &mut self.segments[handle.0];
        debug_assert!(segment.elems.is_empty());
        segment.prev = None;
        // Segments with storage sit at the end of the free list and are reused first.
        if self.cache_size < self.max_cache_size {
            self.cache_size += 1;
            self.free.push(handle);
        } else {
            segment.elems = Vec::new();
            self.free.insert(0, handle);
        }
    }

    pub fn push(&mut self, e: E) {
        let current = match self.current {
            Some(h) if self.segments[h.0].elems.len() < self.segment_size => h,
            Some(h) => {
                self.full_segments_len += self.segment_size;
                let next = self.alloc_segment(Some(h));
                self.current = Some(next);
                next
            }
            None => {
                let next = self.alloc_segment(None);
                self.current = Some(next);
                next
            }
        };
        self.segments[current.0].elems.push(e);
    }

    pub fn pop(&mut self) -> Option<E> {
        let current = self.current?;
        let segment = &mut self.segments[current.0];
        let e = segment.elems.pop();
        debug_assert!(e.is_some(), "the current segment is never empty");
        if segment.elems.is_empty() {
            let prev = segment.prev;
            self.free_segment(current);
            self.current = prev;
            if prev.is_some() {
                self.full_segments_len -= self.segment_size;
            }
        }
        e
    }

    pub fn len(&self) -> usize {
        self.full_segments_len + self.current.map_or(0, |h| self.segments[h.0].elems.len())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Remove all elements. Freed segments are cached as usual.
    pub fn clear(&mut self) {
        while let Some(h) = self.current {
            self.segments[h.0].elems.clear();
            self.current = self.segments[h.0].prev;
            self.free_segment(h);
        }
        self.full_segments_len = 0;
    }

    /// Number of freed segments that still own their storage.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

/// A task queue whose pushes never fail: tasks that do not fit in the bounded queue go to an
/// owner-private overflow stack. Thieves only see the bounded queue.
pub struct OverflowTaskQueue<E: Copy + NoUninit, const N: usize = TASKQUEUE_SIZE> {
    taskqueue: GenericTaskQueue<E, N>,
    overflow_stack: AtomicRefCell<SegmentedStack<E>>,
}

impl<E: Copy + NoUninit + Default, const N: usize> Default for OverflowTaskQueue<E, N> {
    fn default() -> Self {
        Self {
            taskqueue: GenericTaskQueue::new(),
            overflow_stack: AtomicRefCell::new(SegmentedStack::default()),
        }
    }
}

impl<E: Copy + NoUninit, const N: usize> OverflowTaskQueue<E, N> {
    delegate::delegate! {
        to self.taskqueue {
            pub fn pop_local(&self) -> Option<E>;
            pub fn pop_global(&self) -> Steal<E>;
            pub fn size(&self) -> usize;
            pub fn max_elems(&self) -> usize;
            #[call(is_empty)]
            pub fn taskqueue_empty(&self) -> bool;
        }
    }

    /// Push `t`, spilling to the overflow stack if the task queue is full. Owner only.
    pub fn push(&self, t: E) {
        if !self.taskqueue.push(t) {
            self.overflow_stack.borrow_mut().push(t);
        }
    }

    /// Push `t` to the task queue only. Returns false if it is full. Owner only.
    pub fn try_push_to_taskqueue(&self, t: E) -> bool {
        self.taskqueue.push(t)
    }

    /// Pop from the overflow stack. Owner only.
    pub fn pop_overflow(&self) -> Option<E> {
        self.overflow_stack.borrow_mut().pop()
    }

    pub fn overflow_empty(&self) -> bool {
        self.overflow_stack.borrow().is_empty()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow_stack.borrow().len()
    }

    /// True only if both the task queue and the overflow stack are empty. Owner only.
    pub fn is_empty(&self) -> bool {
        self.taskqueue_empty() && self.overflow_empty()
    }

    /// Pop one task, preferring the overflow stack. Before taking from the overflow stack, move
    /// as many of its tasks as fit into the task queue, where thieves can see them.
    pub fn pop(&self) -> Option<E> {
        {
            let mut overflow = self.overflow_stack.borrow_mut();
            while let Some(t) = overflow.pop() {
                if !self.taskqueue.push(t) {
                    return Some(t);
                }
            }
        }
        self.taskqueue.pop_local()
    }

    /// Drop all tasks. Owner only, while no thread can steal.
    pub fn set_empty(&self) {
        self.taskqueue.set_empty();
        self.overflow_stack.borrow_mut().clear();
    }
}
