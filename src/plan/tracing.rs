//! Helpers shared by the parallel tracing phases.

use std::ops::Range;

use crate::scheduler::task::PartialArrayHandle;
use crate::scheduler::{PartialArrayStates, ScannerTask, ScannerTaskQueue, ScannerTaskQueueSet};
use crate::util::{Address, ObjectReference};
use crate::vm::slot::SimpleSlot;
use crate::vm::{Scanning, VMBinding};

/// Visit the slots of `object`. Large objects are split: the first chunk is visited now, and
/// one partial-array task per remaining chunk is pushed to `queue`.
pub(crate) fn scan_object<VM: VMBinding, F: FnMut(SimpleSlot)>(
    partial_arrays: &PartialArrayStates,
    queue: &ScannerTaskQueue,
    object: ObjectReference,
    mut f: F,
) {
    let n_slots = VM::VMScanning::num_slots(object);
    let chunk = partial_arrays.chunk_size();
    if n_slots <= chunk {
        VM::VMScanning::scan_object(object, &mut f);
        return;
    }
    if let Some((handle, n_tasks)) = partial_arrays.start(object, n_slots) {
        for _ in 0..n_tasks {
            queue.push(ScannerTask::partial_array(handle));
        }
    }
    VM::VMScanning::scan_object_range(object, 0, chunk, &mut f);
}

/// Visit the slots of the chunk claimed by a partial-array task.
pub(crate) fn scan_partial_array<VM: VMBinding, F: FnMut(SimpleSlot)>(
    partial_arrays: &PartialArrayStates,
    handle: PartialArrayHandle,
    mut f: F,
) {
    let (object, range) = partial_arrays.claim(handle);
    VM::VMScanning::scan_object_range(object, range.start, range.end, &mut f);
    partial_arrays.finish(handle);
}

/// Spread the initial tasks of a phase over the queues. Must be called before the workers
/// start.
pub(crate) fn distribute_tasks<I: IntoIterator<Item = ScannerTask>>(
    queues: &ScannerTaskQueueSet,
    tasks: I,
) -> usize {
    let n = queues.size();
    let mut count = 0;
    for (i, task) in tasks.into_iter().enumerate() {
        queues.queue(i % n).push(task);
        count += 1;
    }
    count
}

/// Index of the range in `ranges` (sorted, disjoint) that ends after `addr`.
fn first_range_ending_after(ranges: &[Range<Address>], addr: Address) -> usize {
    ranges.partition_point(|r| r.end <= addr)
}

/// Does any of the sorted, disjoint `ranges` contain `addr`?
pub(crate) fn ranges_contain(ranges: &[Range<Address>], addr: Address) -> bool {
    let i = first_range_ending_after(ranges, addr);
    i < ranges.len() && ranges[i].start <= addr
}

/// Does any of the sorted, disjoint `ranges` overlap `[start, end)`?
pub(crate) fn ranges_overlap(ranges: &[Range<Address>], start: Address, end: Address) -> bool {
    let i = first_range_ending_after(ranges, start);
    i < ranges.len() && ranges[i].start < end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::{self, MockHeap, MockVM};

    fn addr(v: usize) -> Address {
        unsafe { Address::from_usize(v) }
    }

    #[test]
    fn range_queries() {
        let ranges = vec![addr(0x100)..addr(0x200), addr(0x400)..addr(0x600)];
        assert!(!ranges_contain(&ranges, addr(0xf8)));
        assert!(ranges_contain(&ranges, addr(0x100)));
        assert!(!ranges_contain(&ranges, addr(0x200)));
        assert!(ranges_contain(&ranges, addr(0x5f8)));
        assert!(!ranges_contain(&ranges, addr(0x600)));
        assert!(ranges_overlap(&ranges, addr(0x1f0), addr(0x300)));
        assert!(!ranges_overlap(&ranges, addr(0x200), addr(0x400)));
        assert!(ranges_overlap(&ranges, addr(0x300), addr(0x410)));
        assert!(!ranges_overlap(&[], addr(0), addr(0x1000)));
    }

    #[test]
    fn large_objects_are_chunked() {
        let heap = MockHeap::new(4096);
        let big = heap.object(25, 0);
        let small = heap.object(3, 0);
        for i in 0..25 {
            mock_vm::set_ref(big, i, Some(small));
        }
        let partial_arrays = PartialArrayStates::new(10);
        let queue = ScannerTaskQueue::default();

        let mut visited = 0;
        scan_object::<MockVM, _>(&partial_arrays, &queue, big, |_| visited += 1);
        assert_eq!(visited, 10);
        let mut tasks = 0;
        while let Some(task) = queue.pop() {
            tasks += 1;
            let crate::scheduler::ScannerTaskKind::PartialArray(handle) = task.kind() else {
                panic!("unexpected task {:?}", task);
            };
            scan_partial_array::<MockVM, _>(&partial_arrays, handle, |_| visited += 1);
        }
        assert_eq!(tasks, 2);
        assert_eq!(visited, 25);
        assert_eq!(partial_arrays.active(), 0);

        scan_object::<MockVM, _>(&partial_arrays, &queue, small, |_| visited += 1);
        assert_eq!(visited, 28);
        assert!(queue.is_empty());
    }
}
