//! The assistor thread pool (spec.md §4.8): `assistorThreadCount`
//! long-running business threads with interruptible sleep, used for
//! background work that isn't tied to a single request (cache warmers,
//! connection reapers, periodic flushes that don't fit the calendar-aligned
//! scheduler).

use std::sync::Arc;

use tracing::info;

use crate::business::Business;
use crate::sync::{InterruptibleSleep, TerminateSignal, ThreadHandle};

/// Handed to `Business::assistor_thread_execute` so the business loop can
/// tell when it should stop, and can sleep in a way the pool can interrupt
/// on shutdown instead of always running its sleep to completion.
pub struct AssistorHandle {
    index: usize,
    signal: Arc<TerminateSignal>,
    sleep: Arc<InterruptibleSleep>,
}

impl AssistorHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_terminating(&self) -> bool {
        self.signal.should_terminate()
    }

    /// Sleeps up to `duration`, waking early if the pool is shutting down.
    pub fn interruptible_sleep(&self, duration: std::time::Duration) {
        let signal = self.signal.clone();
        self.sleep.sleep(duration, move || signal.should_terminate());
    }
}

pub struct AssistorPool {
    threads: Vec<ThreadHandle>,
}

impl AssistorPool {
    pub fn start(count: usize, business: Arc<dyn Business>) -> Self {
        info!(count, "starting assistor thread pool");

        let threads = (0..count)
            .map(|index| {
                let signal = TerminateSignal::new();
                let sleep = Arc::new(InterruptibleSleep::new());
                let handle = AssistorHandle { index, signal: signal.clone(), sleep: sleep.clone() };

                let business = business.clone();
                let name = format!("assistor-{index}");
                let join = std::thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        business.assistor_thread_execute(&handle, index);
                        info!(assistor = index, "assistor thread exiting");
                    })
                    .expect("failed to spawn assistor thread");

                ThreadHandle::new(name, join, signal)
            })
            .collect();

        Self { threads }
    }

    pub fn active_count(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_finished()).count()
    }

    /// Requests every assistor to stop and joins it up to `join_budget`,
    /// detaching any that are still blocked past that.
    pub fn shutdown(&mut self, join_budget: std::time::Duration) {
        for thread in &self.threads {
            thread.request_terminate();
        }

        let deadline = std::time::Instant::now() + join_budget;
        for thread in self.threads.drain(..) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let started = std::time::Instant::now();
            while !thread.is_finished() && started.elapsed() < remaining {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }

            if thread.is_finished() {
                thread.join();
            } else {
                thread.detach();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct LoopingBusiness(Arc<AtomicUsize>);

    impl Business for LoopingBusiness {
        fn dispatch_udp_packet(&self, _w: &crate::udp::UdpWorkerHandle, _g: usize, _p: &[u8], _peer: SocketAddr) {}

        fn assistor_thread_execute(&self, thread: &AssistorHandle, _assistor_index: usize) {
            while !thread.is_terminating() {
                self.0.fetch_add(1, Ordering::SeqCst);
                thread.interruptible_sleep(Duration::from_secs(30));
            }
        }
    }

    #[test]
    fn shutdown_interrupts_sleeping_assistors() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let business: Arc<dyn Business> = Arc::new(LoopingBusiness(ticks.clone()));
        let mut pool = AssistorPool::start(2, business);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while ticks.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        let start = std::time::Instant::now();
        pool.shutdown(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(2), "shutdown should interrupt the 30s sleep, not wait it out");
    }
}
