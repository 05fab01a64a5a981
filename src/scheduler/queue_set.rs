use bytemuck::NoUninit;
use crossbeam::deque::Steal;

use super::overflow::OverflowTaskQueue;
use super::queue::GenericTaskQueue;

/// The part of a task queue that other threads may use.
pub trait StealableQueue: Send + Sync {
    type Elem;

    fn pop_global(&self) -> Steal<Self::Elem>;
    fn size(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<E: Copy + NoUninit + Send, const N: usize> StealableQueue for GenericTaskQueue<E, N> {
    type Elem = E;

    fn pop_global(&self) -> Steal<E> {
        GenericTaskQueue::pop_global(self)
    }

    fn size(&self) -> usize {
        GenericTaskQueue::size(self)
    }
}

impl<E: Copy + NoUninit + Send + Sync, const N: usize> StealableQueue for OverflowTaskQueue<E, N> {
    type Elem = E;

    fn pop_global(&self) -> Steal<E> {
        OverflowTaskQueue::pop_global(self)
    }

    /// The size of the stealable part only.
    fn size(&self) -> usize {
        OverflowTaskQueue::size(self)
    }
}

/// The Park-Miller "minimal standard" generator, computed with Schrage's method so that no
/// intermediate value overflows 32 bits.
#[derive(Clone, Copy, Debug)]
pub struct ParkMiller {
    seed: i32,
}

impl ParkMiller {
    const A: i32 = 16807;
    const M: i32 = 2147483647;
    /// M div A
    const Q: i32 = 127773;
    /// M mod A
    const R: i32 = 2836;

    /// The default seed of a worker's random source.
    pub const DEFAULT_SEED: i32 = 17;

    pub fn new(seed: i32) -> Self {
        debug_assert!(seed > 0 && seed < Self::M);
        Self { seed }
    }

    pub fn next(&mut self) -> u32 {
        let hi = self.seed / Self::Q;
        let lo = self.seed % Self::Q;
        let test = Self::A * lo - Self::R * hi;
        self.seed = if test > 0 { test } else { test + Self::M };
        self.seed as u32
    }
}

impl Default for ParkMiller {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

/// Queue-set operations the terminator needs, independent of the element type.
pub trait TaskQueueSetSuper: Sync {
    /// Does any queue appear to have work? Best effort.
    fn peek(&self) -> bool;
    /// The total number of stealable tasks. Best effort.
    fn tasks(&self) -> usize;
}

/// The task queues of all workers in a parallel phase. Queue `i` is owned by worker `i`.
pub struct GenericTaskQueueSet<Q: StealableQueue> {
    queues: Vec<Q>,
}

impl<Q: StealableQueue + Default> GenericTaskQueueSet<Q> {
    /// Create a set of `n` empty queues.
    pub fn new(n: usize) -> Self {
        debug_assert!(n > 0);
        Self {
            queues: (0..n).map(|_| Q::default()).collect(),
        }
    }
}

impl<Q: StealableQueue> GenericTaskQueueSet<Q> {
    /// Bind a queue to worker `i`. Setup time only.
    pub fn register_queue(&mut self, i: usize, q: Q) {
        self.queues[i] = q;
    }

    pub fn queue(&self, i: usize) -> &Q {
        &self.queues[i]
    }

    /// The number of queues.
    pub fn size(&self) -> usize {
        self.queues.len()
    }

    /// Pick two distinct random peers of `queue_num` and try to steal from the one that appears
    /// larger.
    pub fn steal_best_of_2(&self, queue_num: usize, seed: &mut ParkMiller) -> Steal<Q::Elem> {
        let n = self.queues.len();
        if n > 2 {
            let mut k1 = queue_num;
            while k1 == queue_num {
                k1 = seed.next() as usize % n;
            }
            let mut k2 = queue_num;
            while k2 == queue_num || k2 == k1 {
                k2 = seed.next() as usize % n;
            }
            // Sample both and try the larger.
            let sz1 = self.queues[k1].size();
            let sz2 = self.queues[k2].size();
            if sz2 > sz1 {
                self.queues[k2].pop_global()
            } else if sz1 > 0 {
                self.queues[k1].pop_global()
            } else {
                Steal::Empty
            }
        } else if n == 2 {
            // Just try the other one.
            self.queues[(queue_num + 1) % 2].pop_global()
        } else {
            debug_assert_eq!(n, 1, "can't be zero.");
            Steal::Empty
        }
    }

    /// Try up to `2 * n` rounds of best-of-2 stealing.
    pub fn steal(&self, queue_num: usize, seed: &mut ParkMiller) -> Option<Q::Elem> {
        let num_retries = 2 * self.queues.len();
        for _ in 0..num_retries {
            if let Steal::Success(t) = self.steal_best_of_2(queue_num, seed) {
                return Some(t);
            }
        }
        None
    }
}

impl<Q: StealableQueue> TaskQueueSetSuper for GenericTaskQueueSet<Q> {
    fn peek(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    fn tasks(&self) -> usize {
        self.queues.iter().map(|q| q.size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Queue = GenericTaskQueue<usize, 16>;

    #[test]
    fn park_miller_sequence() {
        // The minimal standard generator started from 1 reaches 1043618065 after 10000 steps.
        let mut rng = ParkMiller::new(1);
        let mut last = 0;
        for _ in 0..10000 {
            last = rng.next();
        }
        assert_eq!(last, 1043618065);
    }

    #[test]
    fn steal_from_the_only_peer() {
        let set: GenericTaskQueueSet<Queue> = GenericTaskQueueSet::new(2);
        set.queue(0).push(1);
        set.queue(0).push(2);
        let mut seed = ParkMiller::default();
        // The thief gets the oldest task, the owner still gets the newest one.
        assert_eq!(set.steal(1, &mut seed), Some(1));
        assert_eq!(set.queue(0).pop_local(), Some(2));
        assert_eq!(set.steal(1, &mut seed), None);
        assert!(!set.peek());
    }

    #[test]
    fn single_queue_cannot_steal() {
        let set: GenericTaskQueueSet<Queue> = GenericTaskQueueSet::new(1);
        set.queue(0).push(1);
        let mut seed = ParkMiller::default();
        assert_eq!(set.steal_best_of_2(0, &mut seed), Steal::Empty);
        assert!(set.peek());
        assert_eq!(set.tasks(), 1);
    }

    #[test]
    fn steal_never_takes_from_self() {
        let set: GenericTaskQueueSet<Queue> = GenericTaskQueueSet::new(4);
        set.queue(0).push(10);
        let mut seed = ParkMiller::default();
        assert_eq!(set.steal(0, &mut seed), None);

        set.queue(3).push(30);
        assert_eq!(set.steal(0, &mut seed), Some(30));
        assert_eq!(set.tasks(), 1);
    }

    #[test]
    fn register_queue_replaces_queue() {
        let mut set: GenericTaskQueueSet<Queue> = GenericTaskQueueSet::new(2);
        let q = Queue::new();
        q.push(5);
        set.register_queue(1, q);
        assert_eq!(set.size(), 2);
        let mut seed = ParkMiller::default();
        assert_eq!(set.steal(0, &mut seed), Some(5));
    }
}
