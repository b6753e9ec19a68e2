//! A sleep that can be woken early.
//!
//! Re-expresses spec.md §9's "interruptible sleep" guidance directly: a
//! condition variable with a deadline, broadcast on interrupt, rather than
//! a raw OS sleep that a terminate flag can't shorten. Assistor threads
//! (spec.md §4.6) and the scheduler thread both sleep in slices no longer
//! than 500 ms so a terminate flag is observed promptly even without an
//! explicit interrupt.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const MAX_SLICE: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct InterruptibleSleep {
    interrupted: Mutex<bool>,
    condvar: Condvar,
}

impl InterruptibleSleep {
    pub fn new() -> Self {
        Self { interrupted: Mutex::new(false), condvar: Condvar::new() }
    }

    /// Sleeps up to `duration`, in slices no longer than 500 ms, returning
    /// early if [`interrupt`](Self::interrupt) is called or `should_stop`
    /// starts returning `true`.
    pub fn sleep(&self, duration: Duration, should_stop: impl Fn() -> bool) {
        let mut remaining = duration;
        let mut interrupted = self.interrupted.lock();
        *interrupted = false;

        while remaining > Duration::ZERO {
            if *interrupted || should_stop() {
                break;
            }
            let slice = remaining.min(MAX_SLICE);
            let result = self.condvar.wait_for(&mut interrupted, slice);
            remaining = remaining.saturating_sub(slice);
            if !result.timed_out() || *interrupted {
                break;
            }
        }
    }

    /// Wakes any thread currently in [`sleep`](Self::sleep) immediately.
    pub fn interrupt(&self) {
        *self.interrupted.lock() = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn interrupt_cuts_sleep_short() {
        let sleeper = Arc::new(InterruptibleSleep::new());
        let waker = sleeper.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.interrupt();
        });

        let start = Instant::now();
        sleeper.sleep(Duration::from_secs(5), || false);
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn should_stop_cuts_sleep_short() {
        let sleeper = InterruptibleSleep::new();
        let start = Instant::now();
        sleeper.sleep(Duration::from_secs(5), || true);
        assert!(start.elapsed() < Duration::from_millis(600));
    }
}
