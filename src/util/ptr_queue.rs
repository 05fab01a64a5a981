//! Per-thread logging buffers and the shared set of completed buffers.
//!
//! A [`PtrQueue`] is owned by one thread. It fills its buffer from the top index down, so
//! `enqueue` is a decrement and a store. When the index reaches zero the buffer is filtered and
//! either kept (if filtering freed enough room) or published to the [`PtrQueueSet`], where GC
//! threads pick it up. Buffers are recycled through a bounded free list.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use bytemuck::Zeroable;

use crate::util::rust_util::unlikely;

/// A published buffer. Its entries are `buf[index..]`.
pub struct BufferNode<T> {
    buf: Box<[T]>,
    index: usize,
}

impl<T> BufferNode<T> {
    pub fn entries(&self) -> &[T] {
        &self.buf[self.index..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CompletedBuffers<T> {
    buffers: VecDeque<BufferNode<T>>,
    cancelled: bool,
}

/// The shared side of a family of [`PtrQueue`]s.
pub struct PtrQueueSet<T: Copy + Zeroable + Send> {
    buffer_size: usize,
    /// A filtered buffer whose index is below this is published. Otherwise it is reused.
    enqueue_threshold_index: usize,
    process_completed_threshold: usize,
    completed: Mutex<CompletedBuffers<T>>,
    completed_cond: Condvar,
    num_completed: AtomicUsize,
    free_list: Mutex<Vec<Box<[T]>>>,
    max_free_buffers: usize,
    active: AtomicBool,
    /// Bumped by `request_force_flush`. A queue that sees a new value publishes its buffer on
    /// its next enqueue.
    flush_epoch: AtomicUsize,
}

impl<T: Copy + Zeroable + Send> PtrQueueSet<T> {
    /// The number of free buffers kept for reuse.
    pub const DEFAULT_MAX_FREE_BUFFERS: usize = 64;

    pub fn new(
        buffer_size: usize,
        enqueue_threshold_percent: usize,
        process_completed_threshold: usize,
    ) -> Self {
        debug_assert!(buffer_size > 0);
        debug_assert!(enqueue_threshold_percent <= 100);
        Self {
            buffer_size,
            enqueue_threshold_index: buffer_size * (100 - enqueue_threshold_percent) / 100,
            process_completed_threshold,
            completed: Mutex::new(CompletedBuffers {
                buffers: VecDeque::new(),
                cancelled: false,
            }),
            completed_cond: Condvar::new(),
            num_completed: AtomicUsize::new(0),
            free_list: Mutex::new(vec![]),
            max_free_buffers: Self::DEFAULT_MAX_FREE_BUFFERS,
            active: AtomicBool::new(false),
            flush_epoch: AtomicUsize::new(0),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn enqueue_threshold_index(&self) -> usize {
        self.enqueue_threshold_index
    }

    pub fn process_completed_buffers_threshold(&self) -> usize {
        self.process_completed_threshold
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed)
    }

    pub fn allocate_buffer(&self) -> Box<[T]> {
        if let Some(buf) = self.free_list.lock().unwrap().pop() {
            return buf;
        }
        vec![T::zeroed(); self.buffer_size].into_boxed_slice()
    }

    pub fn release_buffer(&self, buf: Box<[T]>) {
        let mut free = self.free_list.lock().unwrap();
        if free.len() < self.max_free_buffers {
            free.push(buf);
        }
    }

    pub fn free_buffers_num(&self) -> usize {
        self.free_list.lock().unwrap().len()
    }

    pub fn enqueue_completed_buffer(&self, node: BufferNode<T>) {
        debug_assert!(!node.is_empty());
        let mut completed = self.completed.lock().unwrap();
        completed.buffers.push_back(node);
        let n = self.num_completed.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.process_completed_threshold {
            self.completed_cond.notify_all();
        }
    }

    pub fn completed_buffers_num(&self) -> usize {
        self.num_completed.load(Ordering::Relaxed)
    }

    /// Are there more completed buffers than the processing threshold?
    pub fn process_completed_buffers(&self) -> bool {
        self.completed_buffers_num() > self.process_completed_threshold
    }

    /// Block until there are more completed buffers than the processing threshold. Returns
    /// false if the wait was cancelled.
    pub fn wait_until_non_empty(&self) -> bool {
        let mut completed = self.completed.lock().unwrap();
        while !completed.cancelled
            && self.num_completed.load(Ordering::Relaxed) <= self.process_completed_threshold
        {
            completed = self.completed_cond.wait(completed).unwrap();
        }
        !completed.cancelled
    }

    /// Wake up every thread in `wait_until_non_empty` and make further waits return at once.
    pub fn cancel_wait(&self) {
        let mut completed = self.completed.lock().unwrap();
        completed.cancelled = true;
        self.completed_cond.notify_all();
    }

    pub fn is_wait_cancelled(&self) -> bool {
        self.completed.lock().unwrap().cancelled
    }

    /// Drop all completed buffers without processing them.
    pub fn abandon_completed_buffers(&self) {
        let buffers = {
            let mut completed = self.completed.lock().unwrap();
            self.num_completed.store(0, Ordering::Relaxed);
            std::mem::take(&mut completed.buffers)
        };
        for node in buffers {
            self.release_buffer(node.buf);
        }
    }

    /// Take one completed buffer and call `f` on its entries. Returns false if there was no
    /// completed buffer.
    pub fn apply_closure_to_completed_buffer<F: FnMut(&[T])>(&self, mut f: F) -> bool {
        let node = {
            let mut completed = self.completed.lock().unwrap();
            let node = completed.buffers.pop_front();
            if node.is_some() {
                self.num_completed.fetch_sub(1, Ordering::Relaxed);
            }
            node
        };
        match node {
            Some(node) => {
                f(node.entries());
                self.release_buffer(node.buf);
                true
            }
            None => false,
        }
    }

    /// Make every queue publish its buffer on its next enqueue, even if the buffer is not
    /// full.
    pub fn request_force_flush(&self) {
        self.flush_epoch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_epoch(&self) -> usize {
        self.flush_epoch.load(Ordering::Relaxed)
    }
}

/// A thread-local logging buffer.
pub struct PtrQueue<T: Copy + Zeroable + Send> {
    buf: Option<Box<[T]>>,
    /// Entries live in `buf[index..]`. Zero means full (or no buffer).
    index: usize,
    flush_epoch: usize,
}

impl<T: Copy + Zeroable + Send> PtrQueue<T> {
    pub fn new(qset: &PtrQueueSet<T>) -> Self {
        Self {
            buf: None,
            index: 0,
            flush_epoch: qset.flush_epoch(),
        }
    }

    /// Number of entries in the buffer.
    pub fn size(&self) -> usize {
        self.buf.as_ref().map_or(0, |buf| buf.len() - self.index)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn enqueue(&mut self, qset: &PtrQueueSet<T>, value: T) {
        self.enqueue_filtered(qset, value, |_| true)
    }

    /// Add `value`. If the buffer is full, entries for which `keep` returns false are dropped
    /// before deciding whether to publish the buffer.
    #[inline(always)]
    pub fn enqueue_filtered<F: FnMut(&T) -> bool>(
        &mut self,
        qset: &PtrQueueSet<T>,
        value: T,
        keep: F,
    ) {
        if unlikely(self.flush_epoch != qset.flush_epoch()) {
            self.flush_epoch = qset.flush_epoch();
            self.flush(qset);
        }
        if self.index == 0 {
            self.handle_zero_index(qset, keep);
        }
        debug_assert!(self.index > 0);
        self.index -= 1;
        if let Some(buf) = self.buf.as_mut() {
            buf[self.index] = value;
        }
    }

    fn handle_zero_index<F: FnMut(&T) -> bool>(&mut self, qset: &PtrQueueSet<T>, mut keep: F) {
        let Some(mut buf) = self.buf.take() else {
            self.buf = Some(qset.allocate_buffer());
            self.index = qset.buffer_size();
            return;
        };
        // Compact the retained entries towards the end of the buffer.
        let mut dst = buf.len();
        for src in (0..buf.len()).rev() {
            if keep(&buf[src]) {
                dst -= 1;
                buf[dst] = buf[src];
            }
        }
        if dst == 0 || dst < qset.enqueue_threshold_index() {
            trace!("Publish buffer with {} entries", buf.len() - dst);
            qset.enqueue_completed_buffer(BufferNode { buf, index: dst });
            self.buf = Some(qset.allocate_buffer());
            self.index = qset.buffer_size();
        } else {
            self.buf = Some(buf);
            self.index = dst;
        }
    }

    /// Publish the buffer if it has entries. An empty buffer goes back to the free list.
    pub fn flush(&mut self, qset: &PtrQueueSet<T>) {
        if let Some(buf) = self.buf.take() {
            if self.index < buf.len() {
                qset.enqueue_completed_buffer(BufferNode {
                    buf,
                    index: self.index,
                });
            } else {
                qset.release_buffer(buf);
            }
        }
        self.index = 0;
    }

    /// Drop all entries without publishing them.
    pub fn reset(&mut self) {
        if let Some(buf) = self.buf.as_ref() {
            self.index = buf.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use std::sync::Arc;

    fn drain(qset: &PtrQueueSet<usize>) -> Vec<usize> {
        let mut out = vec![];
        while qset.apply_closure_to_completed_buffer(|entries| out.extend_from_slice(entries)) {}
        out
    }

    #[test]
    fn full_buffer_is_published() {
        let qset = PtrQueueSet::new(4, 60, 0);
        let mut q = PtrQueue::new(&qset);
        for i in 1..=4 {
            q.enqueue(&qset, i);
        }
        assert_eq!(q.size(), 4);
        assert_eq!(qset.completed_buffers_num(), 0);
        q.enqueue(&qset, 5);
        assert_eq!(qset.completed_buffers_num(), 1);
        assert_eq!(q.size(), 1);
        assert_eq!(drain(&qset), vec![4, 3, 2, 1]);
        assert_eq!(qset.completed_buffers_num(), 0);
    }

    #[test]
    fn filtered_buffer_is_reused() {
        // Publish only if more than 50% of a 10-entry buffer survives filtering.
        let qset = PtrQueueSet::new(10, 50, 0);
        let mut q = PtrQueue::new(&qset);
        for i in 0..10 {
            q.enqueue(&qset, i);
        }
        // Odd entries are filtered out, leaving 5, which is not above the threshold.
        q.enqueue_filtered(&qset, 100, |v| v % 2 == 0);
        assert_eq!(qset.completed_buffers_num(), 0);
        assert_eq!(q.size(), 6);

        q.flush(&qset);
        let mut entries = drain(&qset);
        entries.sort_unstable();
        assert_eq!(entries, vec![0, 2, 4, 6, 8, 100]);
    }

    #[test]
    fn force_flush_publishes_partial_buffer() {
        let qset = PtrQueueSet::new(16, 60, 0);
        let mut q = PtrQueue::new(&qset);
        q.enqueue(&qset, 1);
        q.enqueue(&qset, 2);
        assert_eq!(qset.completed_buffers_num(), 0);
        qset.request_force_flush();
        q.enqueue(&qset, 3);
        assert_eq!(qset.completed_buffers_num(), 1);
        assert_eq!(q.size(), 1);
        assert_eq!(drain(&qset), vec![2, 1]);
    }

    #[test]
    fn flush_and_abandon() {
        let qset = PtrQueueSet::new(8, 60, 0);
        let mut q = PtrQueue::new(&qset);
        q.flush(&qset);
        assert_eq!(qset.completed_buffers_num(), 0);
        q.enqueue(&qset, 7);
        q.flush(&qset);
        assert!(q.is_empty());
        assert_eq!(qset.completed_buffers_num(), 1);
        qset.abandon_completed_buffers();
        assert_eq!(qset.completed_buffers_num(), 0);
        assert!(drain(&qset).is_empty());
        assert_eq!(qset.free_buffers_num(), 1);
    }

    #[test]
    fn wait_until_non_empty_and_cancel() {
        panic_after(10_000, || {
            let qset = Arc::new(PtrQueueSet::<usize>::new(2, 60, 1));
            let waiter = {
                let qset = qset.clone();
                std::thread::spawn(move || qset.wait_until_non_empty())
            };
            let mut q = PtrQueue::new(&qset);
            for i in 0..6 {
                q.enqueue(&qset, i);
            }
            // Two buffers are published, which is above the threshold of one.
            assert!(waiter.join().unwrap());

            qset.abandon_completed_buffers();
            let waiter = {
                let qset = qset.clone();
                std::thread::spawn(move || qset.wait_until_non_empty())
            };
            qset.cancel_wait();
            assert!(!waiter.join().unwrap());
            assert!(qset.is_wait_cancelled());
        })
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 1000;
        let qset = PtrQueueSet::new(32, 60, 0);
        crossbeam::thread::scope(|s| {
            for t in 0..THREADS {
                let qset = &qset;
                s.spawn(move |_| {
                    let mut q = PtrQueue::new(qset);
                    for i in 0..PER_THREAD {
                        q.enqueue(qset, t * PER_THREAD + i);
                    }
                    q.flush(qset);
                });
            }
        })
        .unwrap();
        let mut entries = drain(&qset);
        entries.sort_unstable();
        assert_eq!(entries, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }
}
