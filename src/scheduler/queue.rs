//! A bounded work-stealing deque.
//!
//! The owner pushes and pops at `bottom`; thieves take from `top`. `bottom` is written only by
//! the owner. `top` is packed with a `tag` into a single word ([`Age`]) that both the owner
//! (when taking the last element) and thieves update with a CAS. The tag is bumped whenever
//! `top` wraps around or the owner claims the last element, so a stale CAS can never succeed.
//!
//! Two index values are reserved to tell an empty queue from a full one while a pop races with
//! a steal, so at most `N - 2` elements are stored. A dirty size of `N - 1` is the transient
//! representation of an empty queue after the owner lost the last element to a thief.

use atomic::Atomic;
use bytemuck::NoUninit;
use crossbeam::deque::Steal;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use crate::util::constants::TASKQUEUE_SIZE;
use crate::util::rust_util::likely;

/// The `(top, tag)` pair of a task queue, packed into one `u64` for CAS.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Age {
    pub top: u32,
    pub tag: u32,
}

impl Age {
    pub const fn new(top: u32, tag: u32) -> Age {
        Age { top, tag }
    }

    const fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.top as u64
    }

    const fn unpack(word: u64) -> Age {
        Age {
            top: word as u32,
            tag: (word >> 32) as u32,
        }
    }
}

/// A task queue with capacity `N`.
///
/// Elements are copied in and out of `Atomic` slots: a thief may read a slot that the owner is
/// concurrently overwriting, and discards the value when its CAS on `age` fails.
pub struct GenericTaskQueue<E: Copy + NoUninit, const N: usize = TASKQUEUE_SIZE> {
    bottom: CachePadded<AtomicU32>,
    age: CachePadded<AtomicU64>,
    elems: Box<[Atomic<E>]>,
}

impl<E: Copy + NoUninit + Default, const N: usize> Default for GenericTaskQueue<E, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Copy + NoUninit + Default, const N: usize> GenericTaskQueue<E, N> {
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_VALID;
        let elems = (0..N).map(|_| Atomic::new(E::default())).collect();
        Self {
            bottom: CachePadded::new(AtomicU32::new(0)),
            age: CachePadded::new(AtomicU64::new(Age::default().pack())),
            elems,
        }
    }
}

impl<E: Copy + NoUninit, const N: usize> GenericTaskQueue<E, N> {
    const CAPACITY_IS_VALID: () = assert!(
        N.is_power_of_two() && N >= 4 && N <= (1 << 31),
        "task queue capacity must be a power of two"
    );
    const MOD_N_MASK: u32 = (N - 1) as u32;

    /// The capacity of the circular buffer.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The maximum number of elements that can be stored.
    pub const fn max_elems(&self) -> usize {
        N - 2
    }

    const fn increment_index(ind: u32) -> u32 {
        (ind + 1) & Self::MOD_N_MASK
    }

    const fn decrement_index(ind: u32) -> u32 {
        ind.wrapping_sub(1) & Self::MOD_N_MASK
    }

    /// Returns a number in the range [0..N). If the result is "N-1", it should be interpreted
    /// as 0.
    const fn dirty_size(bot: u32, top: u32) -> u32 {
        bot.wrapping_sub(top) & Self::MOD_N_MASK
    }

    /// Returns the size corresponding to the given "bot" and "top".
    const fn clean_size(bot: u32, top: u32) -> u32 {
        let sz = Self::dirty_size(bot, top);
        // Has the queue "wrapped", so that bottom is less than top? There's a complicated
        // special case here. A pair of threads could perform pop_local and pop_global operations
        // concurrently, starting from a state in which _bottom == _top+1. The pop_local could
        // succeed in decrementing _bottom, and the pop_global in incrementing _top (in which case
        // the pop_global will be awarded the contested queue element.) The resulting state must
        // be interpreted as an empty queue. (We only need to worry about one such event: only
        // the queue owner performs pop_local's, and several concurrent threads attempting to
        // perform the pop_global will all perform the same CAS, and only one can succeed.) Any
        // stealing thread that reads after either the increment or decrement will see an empty
        // queue, and will not join the competitors. The "sz == -1" / "sz == N-1" state will not
        // be modified by concurrent threads, so the owner thread can reset the state to
        // _bottom == top so subsequent pushes will be performed normally.
        if sz == (N - 1) as u32 {
            0
        } else {
            sz
        }
    }

    fn age_relaxed(&self) -> Age {
        Age::unpack(self.age.load(Ordering::Relaxed))
    }

    fn age_top_relaxed(&self) -> u32 {
        self.age_relaxed().top
    }

    fn set_age_relaxed(&self, age: Age) {
        self.age.store(age.pack(), Ordering::Relaxed)
    }

    fn cmpxchg_age(&self, old_age: Age, new_age: Age) -> Age {
        match self.age.compare_exchange(
            old_age.pack(),
            new_age.pack(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(v) | Err(v) => Age::unpack(v),
        }
    }

    fn bottom_relaxed(&self) -> u32 {
        self.bottom.load(Ordering::Relaxed)
    }

    fn bottom_acquire(&self) -> u32 {
        self.bottom.load(Ordering::Acquire)
    }

    fn release_set_bottom(&self, new_bottom: u32) {
        self.bottom.store(new_bottom, Ordering::Release)
    }

    fn set_bottom_relaxed(&self, new_bottom: u32) {
        self.bottom.store(new_bottom, Ordering::Relaxed)
    }

    fn write_elem(&self, index: u32, e: E) {
        self.elems[index as usize].store(e, Ordering::Relaxed)
    }

    fn read_elem(&self, index: u32) -> E {
        self.elems[index as usize].load(Ordering::Relaxed)
    }

    /// Push `t` onto the queue. Owner only. Returns false if the queue is full; the caller must
    /// keep the task somewhere else.
    pub fn push(&self, t: E) -> bool {
        let local_bot = self.bottom_relaxed();
        debug_assert!((local_bot as usize) < N, "_bottom out of range.");
        let top = self.age_top_relaxed();
        let dirty_n_elems = Self::dirty_size(local_bot, top);
        debug_assert!((dirty_n_elems as usize) < N, "n_elems out of range.");
        if likely((dirty_n_elems as usize) < self.max_elems()) {
            // The release store of bottom publishes the element.
            self.write_elem(local_bot, t);
            self.release_set_bottom(Self::increment_index(local_bot));
            true
        } else {
            self.push_slow(t, dirty_n_elems)
        }
    }

    #[cold]
    fn push_slow(&self, t: E, dirty_n_elems: u32) -> bool {
        if dirty_n_elems == (N - 1) as u32 {
            // Actually means 0, so do the push.
            let local_bot = self.bottom_relaxed();
            self.write_elem(local_bot, t);
            self.release_set_bottom(Self::increment_index(local_bot));
            return true;
        }
        false
    }

    /// Pop the most recently pushed element. Owner only.
    pub fn pop_local(&self) -> Option<E> {
        let mut local_bot = self.bottom_relaxed();
        // This value cannot be N-1. That can only occur as a result of the assignment to bottom
        // in this method. If it does, this method resets the size to 0 before the next call
        // (which is sequential, since this is pop_local.)
        let dirty_n_elems = Self::dirty_size(local_bot, self.age_top_relaxed());
        debug_assert!(
            dirty_n_elems != (N - 1) as u32,
            "Shouldn't be possible..."
        );
        if dirty_n_elems == 0 {
            return None;
        }
        local_bot = Self::decrement_index(local_bot);
        self.set_bottom_relaxed(local_bot);
        // This is necessary to prevent any read below from being reordered before the store
        // just above.
        fence(Ordering::SeqCst);
        let t = self.read_elem(local_bot);
        // This is a second read of "age"; the "size()" above is the first. If there's still at
        // least one element in the queue, based on the "_bottom" and "age" we've read, then there
        // can be no interference with a "pop_global" operation, and we're done.
        let tp = self.age_top_relaxed();
        if Self::clean_size(local_bot, tp) > 0 {
            debug_assert!(Self::dirty_size(local_bot, tp) != (N - 1) as u32, "sanity");
            Some(t)
        } else {
            // Otherwise, the queue contained exactly one element; we take the slow path.
            let old_age = Age::unpack(self.age.load(Ordering::Acquire));
            if self.pop_local_slow(local_bot, old_age) {
                Some(t)
            } else {
                None
            }
        }
    }

    #[cold]
    fn pop_local_slow(&self, local_bot: u32, old_age: Age) -> bool {
        // This queue was observed to contain exactly one element; either this thread will claim
        // it, or a competing "pop_global". In either case, the queue will be logically empty
        // afterwards. Create a new Age value that represents the empty queue for the given value
        // of "_bottom". (We must also increment "tag" because of the case where "bottom == 1",
        // "top == 0". A pop_global could read the queue element in that case, then have the
        // owner thread do a pop followed by another push. Without the incrementing of "tag", the
        // pop_global's CAS could succeed, allowing it to believe it has claimed the stale
        // element.)
        let new_age = Age::new(local_bot, old_age.tag.wrapping_add(1));
        // Perhaps a competing pop_global has already incremented "top", in which case it wins
        // the element.
        if local_bot == old_age.top {
            // No competing pop_global has yet incremented "top"; we'll try to install new_age,
            // thus claiming the element.
            let temp_age = self.cmpxchg_age(old_age, new_age);
            if temp_age == old_age {
                // We win.
                debug_assert!(
                    Self::dirty_size(local_bot, self.age_top_relaxed()) != (N - 1) as u32,
                    "sanity"
                );
                return true;
            }
        }
        // We lose; a competing pop_global got the element. But the queue is empty and top is
        // greater than bottom. Fix this representation of the empty queue to become the
        // canonical one.
        self.set_age_relaxed(new_age);
        debug_assert!(
            Self::dirty_size(local_bot, self.age_top_relaxed()) != (N - 1) as u32,
            "sanity"
        );
        false
    }

    /// Steal the least recently pushed element. Any thread. Never spins: a lost race is reported
    /// as `Steal::Retry`.
    pub fn pop_global(&self) -> Steal<E> {
        let old_age = self.age_relaxed();
        // A full fence here guarantees that bottom is not older than age, which is crucial for
        // the correctness of the algorithm.
        fence(Ordering::SeqCst);
        let local_bot = self.bottom_acquire();
        let n_elems = Self::clean_size(local_bot, old_age.top);
        if n_elems == 0 {
            return Steal::Empty;
        }

        let t = self.read_elem(old_age.top);
        let mut new_age = old_age;
        new_age.top = Self::increment_index(new_age.top);
        if new_age.top == 0 {
            new_age.tag = new_age.tag.wrapping_add(1);
        }
        let res_age = self.cmpxchg_age(old_age, new_age);

        // Note that using "_bottom" here might fail, since a pop_local might have decremented it.
        debug_assert!(
            Self::dirty_size(local_bot, new_age.top) != (N - 1) as u32,
            "sanity"
        );
        if res_age == old_age {
            Steal::Success(t)
        } else {
            Steal::Retry
        }
    }

    /// Return an estimate of the number of elements in the queue. The result may be stale when
    /// other threads are stealing.
    pub fn size(&self) -> usize {
        Self::clean_size(self.bottom_relaxed(), self.age_top_relaxed()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Make the queue empty. Owner only, while no thread can steal from it.
    pub fn set_empty(&self) {
        self.set_bottom_relaxed(0);
        self.set_age_relaxed(Age::default());
    }

    /// Reset the queue for reuse in another phase. Owner only, while no thread can steal.
    pub fn reset(&self) {
        debug_assert!(self.is_empty(), "reset a non-empty task queue");
        self.set_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    type SmallQueue = GenericTaskQueue<usize, 8>;

    #[test]
    fn age_packing() {
        let age = Age::new(0x1234, 0xdead_beef);
        assert_eq!(Age::unpack(age.pack()), age);
    }

    #[test]
    fn owner_is_lifo_and_bounded() {
        let q = SmallQueue::new();
        assert_eq!(q.capacity(), 8);
        assert_eq!(q.max_elems(), 6);
        for i in 1..=6 {
            assert!(q.push(i));
            assert_eq!(q.size(), i);
        }
        assert!(!q.push(7));
        for i in (1..=6).rev() {
            assert_eq!(q.pop_local(), Some(i));
        }
        assert_eq!(q.pop_local(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn thief_is_fifo() {
        let q = SmallQueue::new();
        assert!(q.push(1));
        assert!(q.push(2));
        assert_eq!(q.pop_global(), Steal::Success(1));
        assert_eq!(q.pop_local(), Some(2));
        assert_eq!(q.pop_global(), Steal::Empty);
    }

    #[test]
    fn wrap_around() {
        let q = SmallQueue::new();
        for round in 0..20 {
            for i in 0..5 {
                assert!(q.push(round * 10 + i));
            }
            assert_eq!(q.pop_global(), Steal::Success(round * 10));
            assert_eq!(q.pop_global(), Steal::Success(round * 10 + 1));
            for i in (2..5).rev() {
                assert_eq!(q.pop_local(), Some(round * 10 + i));
            }
            assert!(q.is_empty());
        }
    }

    #[test]
    fn size_tracks_pushes_minus_pops() {
        use rand::Rng;
        let mut rng = rand::rng();
        let q = SmallQueue::new();
        let mut expected = 0usize;
        for _ in 0..1000 {
            if rng.random_bool(0.5) {
                if q.push(expected) {
                    expected += 1;
                } else {
                    assert_eq!(expected, q.max_elems());
                }
            } else if q.pop_local().is_some() {
                expected -= 1;
            } else {
                assert_eq!(expected, 0);
            }
            assert_eq!(q.size(), expected);
        }
    }

    #[test]
    fn set_empty_resets_queue() {
        let q = SmallQueue::new();
        q.push(1);
        q.push(2);
        q.set_empty();
        assert!(q.is_empty());
        assert!(q.push(3));
        assert_eq!(q.pop_local(), Some(3));
    }

    /// One owner pushes and pops while several thieves steal. Every task is delivered exactly
    /// once.
    #[test]
    fn work_is_conserved_under_stealing() {
        const TASKS: usize = 100_000;
        const THIEVES: usize = 3;
        let q: GenericTaskQueue<usize, 64> = GenericTaskQueue::new();
        let done = AtomicBool::new(false);

        let (owned, stolen) = crossbeam::thread::scope(|s| {
            let thieves: Vec<_> = (0..THIEVES)
                .map(|_| {
                    s.spawn(|_| {
                        let mut got = vec![];
                        loop {
                            match q.pop_global() {
                                Steal::Success(t) => got.push(t),
                                Steal::Retry => {}
                                Steal::Empty => {
                                    if done.load(Ordering::SeqCst) {
                                        break;
                                    }
                                    std::hint::spin_loop();
                                }
                            }
                        }
                        got
                    })
                })
                .collect();

            let mut owned = vec![];
            let mut next = 0;
            while next < TASKS {
                if q.push(next) {
                    next += 1;
                } else if let Some(t) = q.pop_local() {
                    owned.push(t);
                }
                if next % 3 == 0 {
                    if let Some(t) = q.pop_local() {
                        owned.push(t);
                    }
                }
            }
            while let Some(t) = q.pop_local() {
                owned.push(t);
            }
            done.store(true, Ordering::SeqCst);

            let stolen: Vec<usize> = thieves
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect();
            (owned, stolen)
        })
        .unwrap();

        let mut seen = HashSet::new();
        for t in owned.iter().chain(stolen.iter()) {
            assert!(seen.insert(*t), "task {} delivered twice", t);
        }
        assert_eq!(seen.len(), TASKS);
        assert!(q.is_empty());
    }
}
