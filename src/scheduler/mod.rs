//! Parallel work distribution: work-stealing task queues, termination detection, and the
//! worker group that runs parallel phases.

pub mod overflow;
pub mod queue;
pub mod queue_set;
pub mod task;
pub mod terminator;
mod worker;

pub use self::overflow::OverflowTaskQueue;
pub use self::queue::GenericTaskQueue;
pub use self::queue_set::{GenericTaskQueueSet, ParkMiller};
pub use self::task::{PartialArrayStates, ScannerTask, ScannerTaskKind};
pub use self::terminator::{TaskTerminator, TerminatorBackoff, TerminatorTerminator};
pub use self::worker::{GCWorker, GangTask, WorkerGroup};

pub type ScannerTaskQueue = OverflowTaskQueue<ScannerTask>;
pub type ScannerTaskQueueSet = GenericTaskQueueSet<ScannerTaskQueue>;

/// The work loop of one worker in a parallel phase.
///
/// The worker drains its own queue, then asks `refill` for more work (e.g. completed SATB
/// buffers), then steals. It leaves the loop when the terminator agrees that every worker is
/// out of work.
pub fn drain_with_stealing<R, P>(
    queues: &ScannerTaskQueueSet,
    terminator: &TaskTerminator,
    worker_id: usize,
    seed: &mut ParkMiller,
    terminator_terminator: Option<&dyn TerminatorTerminator>,
    mut refill: R,
    mut process: P,
) where
    R: FnMut() -> bool,
    P: FnMut(ScannerTask),
{
    let queue = queues.queue(worker_id);
    loop {
        while let Some(task) = queue.pop() {
            process(task);
        }
        if refill() {
            continue;
        }
        if let Some(task) = queues.steal(worker_id, seed) {
            process(task);
            continue;
        }
        if terminator.offer_termination(terminator_terminator) {
            break;
        }
    }
}
