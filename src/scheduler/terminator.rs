use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::queue_set::TaskQueueSetSuper;
use crate::util::options::Options;

/// An extra exit condition for [`TaskTerminator::offer_termination`], checked while a worker
/// waits for termination.
pub trait TerminatorTerminator: Sync {
    /// Should the waiting worker go back to work even though the task queues look empty?
    fn should_exit_termination(&self) -> bool;
}

/// Backoff parameters used while a worker waits in the terminator.
#[derive(Copy, Clone, Debug)]
pub struct TerminatorBackoff {
    pub hard_spins: usize,
    pub spin_to_yield_ratio: usize,
    pub yields_before_sleep: usize,
    pub sleep_millis: u64,
}

impl TerminatorBackoff {
    pub fn from_options(options: &Options) -> Self {
        Self {
            hard_spins: options.work_stealing_hard_spins,
            spin_to_yield_ratio: options.work_stealing_spin_to_yield_ratio,
            yields_before_sleep: options.work_stealing_yields_before_sleep,
            sleep_millis: options.work_stealing_sleep_millis,
        }
    }
}

impl Default for TerminatorBackoff {
    fn default() -> Self {
        Self::from_options(&Options::new())
    }
}

/// Distributed termination detection for a parallel phase.
///
/// A worker that runs out of work offers termination. It then waits until either every worker
/// has offered (the phase is over) or work shows up again in some queue (it withdraws its offer
/// and goes stealing). Withdrawal is a CAS that refuses once all workers have offered, so no
/// worker returns `false` after another one has observed termination.
pub struct TaskTerminator<'a> {
    n_threads: usize,
    queue_set: &'a dyn TaskQueueSetSuper,
    offered_termination: AtomicUsize,
    backoff: TerminatorBackoff,
}

impl<'a> TaskTerminator<'a> {
    pub fn new(
        n_threads: usize,
        queue_set: &'a dyn TaskQueueSetSuper,
        backoff: TerminatorBackoff,
    ) -> Self {
        debug_assert!(n_threads > 0);
        Self {
            n_threads,
            queue_set,
            offered_termination: AtomicUsize::new(0),
            backoff,
        }
    }

    fn exit_termination(&self, terminator: Option<&dyn TerminatorTerminator>) -> bool {
        self.queue_set.peek() || terminator.is_some_and(|t| t.should_exit_termination())
    }

    /// Withdraw this worker's offer. Returns false if termination was already reached.
    fn try_withdraw(&self) -> bool {
        let mut offered = self.offered_termination.load(Ordering::SeqCst);
        loop {
            if offered == self.n_threads {
                return false;
            }
            match self.offered_termination.compare_exchange(
                offered,
                offered - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(witness) => offered = witness,
            }
        }
    }

    /// The current worker has no more work. Returns true once all workers agree that the phase
    /// is complete, or false if this worker should look for more work.
    pub fn offer_termination(&self, terminator: Option<&dyn TerminatorTerminator>) -> bool {
        debug_assert!(
            self.offered_termination.load(Ordering::SeqCst) < self.n_threads,
            "Invariant"
        );

        // Single worker, done
        if self.n_threads == 1 {
            self.offered_termination.store(1, Ordering::SeqCst);
            return true;
        }

        self.offered_termination.fetch_add(1, Ordering::SeqCst);

        let hard_spin_start = self
            .backoff
            .hard_spins
            .checked_shr(self.backoff.spin_to_yield_ratio as u32)
            .unwrap_or(0)
            .max(1);
        let mut hard_spin_limit = hard_spin_start;
        let mut hard_spin_count = 0;
        let mut yield_count = 0;
        loop {
            if self.offered_termination.load(Ordering::SeqCst) == self.n_threads {
                return true;
            }

            if yield_count <= self.backoff.yields_before_sleep {
                // Do a yield or hardspin. For purposes of deciding whether to sleep, count this
                // as a yield.
                yield_count += 1;
                // Periodically call yield() instead spinning. After spin_to_yield_ratio spins,
                // do a yield() call and reset the counts and starting limit.
                if hard_spin_count > self.backoff.spin_to_yield_ratio {
                    std::thread::yield_now();
                    hard_spin_count = 0;
                    hard_spin_limit = hard_spin_start;
                } else {
                    // Hard spin this time. Increase the hard spinning period but only up to a
                    // limit.
                    hard_spin_limit = (2 * hard_spin_limit).min(self.backoff.hard_spins.max(1));
                    for _ in 0..hard_spin_limit {
                        std::hint::spin_loop();
                    }
                    hard_spin_count += 1;
                }
            } else {
                std::thread::sleep(Duration::from_millis(self.backoff.sleep_millis));
            }

            if self.exit_termination(terminator) {
                if self.try_withdraw() {
                    return false;
                } else {
                    return true;
                }
            }
        }
    }

    /// Have all workers offered termination?
    pub fn is_terminated(&self) -> bool {
        self.offered_termination.load(Ordering::SeqCst) == self.n_threads
    }

    /// Prepare for another phase with `n_threads` workers. No worker may be inside
    /// `offer_termination`.
    pub fn reset_for_reuse(&mut self, n_threads: usize) {
        debug_assert!(n_threads > 0);
        self.offered_termination.store(0, Ordering::SeqCst);
        self.n_threads = n_threads;
    }
}
