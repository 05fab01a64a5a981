//! Helpers shared by unit tests, mock tests and benchmarks.

use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub mod fixtures;
pub mod mock_vm;

/// Run `f` on a new thread and panic if it does not finish within `millis` milliseconds. Used
/// to turn a hang in a termination protocol into a test failure.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}

lazy_static! {
    // Held by tests that build collector instances or touch process-wide state.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

/// Run `f` while holding the global test lock.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock. The remaining tests still run.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `test`, then `cleanup`, then re-raise any panic from `test`.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}
