//! Safepoint synchronization between mutators and collection pauses.
//!
//! Mutators run inside a shared critical section. A pause takes the lock exclusively, so it
//! only starts once every mutator has left its section, and no mutator enters a new one until
//! the pause ends. Every pause bumps the safepoint id.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct SafepointSynchronizer {
    lock: RwLock<()>,
    safepoint_id: AtomicUsize,
    at_safepoint: AtomicBool,
}

/// Held by a thread that runs outside safepoints, e.g. a mutator inside a scope.
pub type SafepointCriticalSection<'a> = RwLockReadGuard<'a, ()>;

/// A running pause. Mutators are excluded until it is dropped.
pub struct SafepointPause<'a> {
    sync: &'a SafepointSynchronizer,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for SafepointPause<'_> {
    fn drop(&mut self) {
        self.sync.at_safepoint.store(false, Ordering::Release);
        trace!("Leave safepoint {}", self.sync.safepoint_id());
    }
}

impl Default for SafepointSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SafepointSynchronizer {
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(()),
            safepoint_id: AtomicUsize::new(0),
            at_safepoint: AtomicBool::new(false),
        }
    }

    /// Enter a critical section that excludes pauses.
    pub fn enter(&self) -> SafepointCriticalSection<'_> {
        self.lock.read().unwrap()
    }

    /// Stop the world. Blocks until every critical section has been left.
    pub fn begin_pause(&self) -> SafepointPause<'_> {
        debug_assert!(
            NoSafepointVerifier::depth() == 0,
            "Safepoint requested inside a NoSafepointVerifier scope"
        );
        let guard = self.lock.write().unwrap();
        let id = self.safepoint_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.at_safepoint.store(true, Ordering::Release);
        trace!("Enter safepoint {}", id);
        SafepointPause {
            sync: self,
            _guard: guard,
        }
    }

    /// The number of pauses so far.
    pub fn safepoint_id(&self) -> usize {
        self.safepoint_id.load(Ordering::Acquire)
    }

    pub fn is_at_safepoint(&self) -> bool {
        self.at_safepoint.load(Ordering::Acquire)
    }
}

thread_local! {
    static NO_SAFEPOINT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Asserts that no safepoint happens while it is alive.
///
/// References loaded from the heap are only valid until the next safepoint. Code that holds
/// such references across calls can create a verifier to check it does not cross one.
pub struct NoSafepointVerifier<'a> {
    sync: &'a SafepointSynchronizer,
    safepoint_id: usize,
}

impl<'a> NoSafepointVerifier<'a> {
    pub fn new(sync: &'a SafepointSynchronizer) -> Self {
        NO_SAFEPOINT_DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            sync,
            safepoint_id: sync.safepoint_id(),
        }
    }

    /// The number of verifiers alive on the current thread.
    pub fn depth() -> usize {
        NO_SAFEPOINT_DEPTH.with(|d| d.get())
    }

    /// Check that no safepoint happened since the verifier was created.
    pub fn verify(&self) {
        debug_assert_eq!(
            self.safepoint_id,
            self.sync.safepoint_id(),
            "A safepoint happened inside a NoSafepointVerifier scope"
        );
    }
}

impl Drop for NoSafepointVerifier<'_> {
    fn drop(&mut self) {
        NO_SAFEPOINT_DEPTH.with(|d| d.set(d.get() - 1));
        if !std::thread::panicking() {
            self.verify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pause_waits_for_critical_sections() {
        let sync = SafepointSynchronizer::new();
        let paused = AtomicBool::new(false);
        std::thread::scope(|s| {
            let section = sync.enter();
            s.spawn(|| {
                let _pause = sync.begin_pause();
                paused.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!paused.load(Ordering::SeqCst));
            drop(section);
        });
        assert!(paused.load(Ordering::SeqCst));
        assert_eq!(sync.safepoint_id(), 1);
        assert!(!sync.is_at_safepoint());
    }

    #[test]
    fn verifier_tracks_nesting() {
        let sync = SafepointSynchronizer::new();
        assert_eq!(NoSafepointVerifier::depth(), 0);
        {
            let _a = NoSafepointVerifier::new(&sync);
            let b = NoSafepointVerifier::new(&sync);
            assert_eq!(NoSafepointVerifier::depth(), 2);
            b.verify();
        }
        assert_eq!(NoSafepointVerifier::depth(), 0);
        drop(sync.begin_pause());
        assert_eq!(sync.safepoint_id(), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn verifier_detects_safepoint() {
        let sync = SafepointSynchronizer::new();
        let v = NoSafepointVerifier::new(&sync);
        // Simulate a pause driven by another thread.
        std::thread::scope(|s| {
            s.spawn(|| drop(sync.begin_pause()));
        });
        v.verify();
    }
}
