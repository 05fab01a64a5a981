use crate::scheduler::queue_set::ParkMiller;
use crate::util::copy::GCWorkerCopyContext;
use crate::vm::VMBinding;
use crate::RGC;

/// A unit of parallel work. Every worker of the group runs `work` once.
pub trait GangTask<VM: VMBinding>: Sync {
    fn name(&self) -> &'static str;
    fn work(&self, worker: &mut GCWorker<VM>);
}

/// A GC worker. This part is privately owned by a worker thread for the duration of a task.
pub struct GCWorker<VM: VMBinding> {
    pub ordinal: usize,
    /// Random source for choosing steal victims.
    pub seed: ParkMiller,
    copy: GCWorkerCopyContext<VM>,
    rgc: &'static RGC<VM>,
}

impl<VM: VMBinding> GCWorker<VM> {
    pub fn new(ordinal: usize, rgc: &'static RGC<VM>) -> Self {
        Self {
            ordinal,
            seed: ParkMiller::new(ParkMiller::DEFAULT_SEED + ordinal as i32),
            copy: GCWorkerCopyContext::new(rgc),
            rgc,
        }
    }

    pub fn get_copy_context_mut(&mut self) -> &mut GCWorkerCopyContext<VM> {
        &mut self.copy
    }

    pub fn rgc(&self) -> &'static RGC<VM> {
        self.rgc
    }

    /// Publish thread-local state at the end of a task.
    pub fn flush(&mut self) {
        self.copy.flush();
    }
}

/// A fixed group of worker threads. Each task runs on freshly scoped threads, so a task may
/// borrow data from the caller's stack.
pub struct WorkerGroup {
    n_workers: usize,
}

impl WorkerGroup {
    pub fn new(n_workers: usize) -> Self {
        debug_assert!(n_workers > 0);
        Self { n_workers }
    }

    pub fn active_workers(&self) -> usize {
        self.n_workers
    }

    /// Run `task` on every worker and wait for all of them. A panic in any worker is
    /// propagated to the caller.
    pub fn run_task<VM: VMBinding>(&self, rgc: &'static RGC<VM>, task: &dyn GangTask<VM>) {
        debug!("Run {} on {} workers", task.name(), self.n_workers);
        let result = crossbeam::thread::scope(|s| {
            for ordinal in 0..self.n_workers {
                s.builder()
                    .name(format!("RGC Worker {}", ordinal))
                    .spawn(move |_| {
                        let mut worker = GCWorker::new(ordinal, rgc);
                        task.work(&mut worker);
                        worker.flush();
                    })
                    .expect("Failed to spawn a GC worker");
            }
        });
        if let Err(e) = result {
            std::panic::resume_unwind(e);
        }
        trace!("{} done", task.name());
    }
}
