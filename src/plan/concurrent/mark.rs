use std::marker::PhantomData;

use crate::plan::satb::SATBMarkQueueSet;
use crate::plan::tracing::{scan_object, scan_partial_array};
use crate::scheduler::{
    drain_with_stealing, GCWorker, GangTask, PartialArrayStates, ScannerTask, ScannerTaskKind,
    ScannerTaskQueueSet, TaskTerminator, TerminatorTerminator,
};
use crate::util::ObjectReference;
use crate::vm::slot::SimpleSlot;
use crate::vm::{ObjectModel, VMBinding};

/// Marks everything reachable from `roots` and from the completed SATB buffers.
///
/// Used for both the concurrent marking phase and the final-mark pause. Workers mark an object
/// when they push it, so each object is scanned once.
pub(super) struct MarkTask<'a, VM: VMBinding> {
    pub queues: &'a ScannerTaskQueueSet,
    pub terminator: &'a TaskTerminator<'a>,
    pub partial_arrays: &'a PartialArrayStates,
    pub roots: &'a [ObjectReference],
    pub phantom: PhantomData<VM>,
}

/// Pulls a waiting worker out of termination when mutators have published SATB buffers.
struct SATBBuffersAvailable<'a>(&'a SATBMarkQueueSet);

impl TerminatorTerminator for SATBBuffersAvailable<'_> {
    fn should_exit_termination(&self) -> bool {
        self.0.completed_buffers_num() > 0
    }
}

impl<VM: VMBinding> GangTask<VM> for MarkTask<'_, VM> {
    fn name(&self) -> &'static str {
        "Mark"
    }

    fn work(&self, worker: &mut GCWorker<VM>) {
        let rgc = worker.rgc();
        let heap = &rgc.heap;
        let ordinal = worker.ordinal;
        let queue = self.queues.queue(ordinal);
        let mark = |object: ObjectReference| {
            if heap.mark_object(object) {
                queue.push(ScannerTask::object(object));
            }
        };
        let visit_slot = |slot: SimpleSlot| {
            if let Some(object) = slot.load() {
                mark(object);
            }
        };

        for object in self.roots.iter().skip(ordinal).step_by(self.queues.size()) {
            mark(*object);
        }

        let satb = &rgc.satb_mark_queue_set;
        let satb_buffers_available = SATBBuffersAvailable(satb);
        let mut seed = worker.seed;
        drain_with_stealing(
            self.queues,
            self.terminator,
            ordinal,
            &mut seed,
            Some(&satb_buffers_available),
            || {
                satb.apply_closure_to_completed_buffer(|entries| {
                    for addr in entries {
                        mark(VM::VMObjectModel::address_to_ref(*addr));
                    }
                })
            },
            |task| match task.kind() {
                ScannerTaskKind::Object(object) => {
                    scan_object::<VM, _>(self.partial_arrays, queue, object, visit_slot)
                }
                ScannerTaskKind::PartialArray(handle) => {
                    scan_partial_array::<VM, _>(self.partial_arrays, handle, visit_slot)
                }
                kind => unreachable!("Unexpected marking task {:?}", kind),
            },
        );
        worker.seed = seed;
    }
}
