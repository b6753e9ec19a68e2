//! A tracked OS thread: a join handle plus a cooperative terminate signal
//! the pool and the thread itself both hold, used to decide when a thread
//! has become a "zombie" (spec.md's `MAX_THREAD_TERM_SECS`).

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Instant,
};

use parking_lot::Mutex;

/// The part of a tracked thread that the thread itself needs a clone of, so
/// it can check `should_terminate()` without taking a lock on the pool's
/// worker list.
#[derive(Default)]
pub struct TerminateSignal {
    terminate: AtomicBool,
    requested_at: Mutex<Option<Instant>>,
}

impl TerminateSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Idempotent: only the first call records the request time.
    pub fn request_terminate(&self) {
        if !self.terminate.swap(true, Ordering::SeqCst) {
            *self.requested_at.lock() = Some(Instant::now());
        }
    }

    pub fn age(&self) -> Option<std::time::Duration> {
        self.requested_at.lock().map(|at| at.elapsed())
    }
}

pub struct ThreadHandle {
    name: String,
    join: Mutex<Option<JoinHandle<()>>>,
    signal: Arc<TerminateSignal>,
}

impl ThreadHandle {
    pub fn new(name: String, join: JoinHandle<()>, signal: Arc<TerminateSignal>) -> Self {
        Self { name, join: Mutex::new(Some(join)), signal }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should_terminate(&self) -> bool {
        self.signal.should_terminate()
    }

    pub fn request_terminate(&self) {
        self.signal.request_terminate();
    }

    pub fn terminate_age(&self) -> Option<std::time::Duration> {
        self.signal.age()
    }

    pub fn is_finished(&self) -> bool {
        self.join.lock().as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Joins the underlying thread if it is still tracked. Returns `false`
    /// if the thread panicked.
    pub fn join(&self) -> bool {
        match self.join.lock().take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }

    /// Detaches the thread: it keeps running free-standing and is no longer
    /// tracked by the pool. This is the Rust-safe substitute for "force
    /// kill" (spec.md §9 Design Notes; see `DESIGN.md`'s Open Question
    /// resolution) — there is no safe way to terminate another OS thread
    /// mid-syscall, so the pool simply stops waiting on it.
    pub fn detach(&self) {
        self.join.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_age_grows_after_request() {
        let signal = TerminateSignal::new();
        let handle = ThreadHandle::new("t".into(), std::thread::spawn(|| {}), signal);
        assert!(handle.terminate_age().is_none());

        handle.request_terminate();
        let first = handle.terminate_age().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = handle.terminate_age().unwrap();

        assert!(second > first);
        handle.join();
    }
}
