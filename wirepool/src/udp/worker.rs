//! Dynamically sized UDP worker pool (spec.md §4.4).
//!
//! Adapted from the teacher's worker/shutdown machinery
//! (`xitca_server::worker`): a live-count tracked via the worker list itself
//! (`workers.lock().len()`), a timeout-bounded drain loop on shutdown, and a
//! "before kill" hook are all teacher patterns, generalized here from
//! single-threaded async tasks to real OS threads with cooperative
//! termination plus detach-and-abandon for the ones that refuse to stop in
//! time.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::queue::UdpRequestQueue;
use crate::{
    business::Business,
    options::UdpGroupOptions,
    sync::{TerminateSignal, ThreadHandle},
};

/// How long a worker may sit with its terminate flag raised before the pool
/// gives up waiting and detaches it (spec.md's `MAX_THREAD_TERM_SECS`).
pub fn default_max_thread_term() -> Duration {
    Duration::from_secs(30)
}

/// Times a worker's business callback invocation and flags the worker to
/// exit if it overruns the configured ceiling.
#[derive(Default)]
pub struct ThreadTimeoutChecker {
    started_at: Mutex<Option<Instant>>,
}

impl ThreadTimeoutChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    pub fn leave(&self) {
        *self.started_at.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.started_at.lock().is_some()
    }

    /// `true` if currently inside a callback that has exceeded `timeout`.
    /// `timeout == 0` (disabled) always returns `false` (spec.md §8).
    pub fn check(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else { return false };
        match *self.started_at.lock() {
            Some(started) => started.elapsed() > timeout,
            None => false,
        }
    }
}

/// Handed to `Business::dispatch_udp_packet` so the handler can see which
/// group and worker it is running in.
pub struct UdpWorkerHandle {
    pub group_index: usize,
    pub worker_name: String,
}

struct WorkerEntry {
    thread: ThreadHandle,
    timeout_checker: Arc<ThreadTimeoutChecker>,
}

impl WorkerEntry {
    fn is_idle(&self) -> bool {
        !self.timeout_checker.is_started()
    }
}

pub struct UdpWorkerPool {
    group_index: usize,
    queue: Arc<UdpRequestQueue>,
    business: Arc<dyn Business>,
    min_threads: usize,
    max_threads: usize,
    worker_timeout: Option<Duration>,
    max_thread_term: Duration,
    workers: Mutex<Vec<Arc<WorkerEntry>>>,
    next_worker_id: AtomicU64,
    shutting_down: AtomicBool,
    forced_kills: AtomicU64,
}

impl UdpWorkerPool {
    pub fn new(
        group_index: usize,
        queue: Arc<UdpRequestQueue>,
        business: Arc<dyn Business>,
        options: &UdpGroupOptions,
        worker_timeout: Option<Duration>,
        max_thread_term: Duration,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            group_index,
            queue,
            business,
            min_threads: options.min_worker_threads,
            max_threads: options.max_worker_threads,
            worker_timeout,
            max_thread_term,
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            forced_kills: AtomicU64::new(0),
        });

        for _ in 0..pool.min_threads {
            pool.spawn_worker();
        }

        pool
    }

    pub fn active_threads(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn forced_kills(&self) -> u64 {
        self.forced_kills.load(Ordering::SeqCst)
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("udp-worker-g{}-{}", self.group_index, id);
        let timeout_checker = Arc::new(ThreadTimeoutChecker::new());
        let signal = TerminateSignal::new();

        let pool = self.clone();
        let checker_for_thread = timeout_checker.clone();
        let signal_for_thread = signal.clone();
        let thread_name = name.clone();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || pool.run_worker(thread_name, checker_for_thread, signal_for_thread))
            .expect("failed to spawn udp worker thread");

        self.workers
            .lock()
            .push(Arc::new(WorkerEntry { thread: ThreadHandle::new(name, join, signal), timeout_checker }));
    }

    fn run_worker(self: Arc<Self>, worker_name: String, timeout_checker: Arc<ThreadTimeoutChecker>, signal: Arc<TerminateSignal>) {
        let handle = UdpWorkerHandle { group_index: self.group_index, worker_name: worker_name.clone() };

        loop {
            if signal.should_terminate() || self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let should_stop = || signal.should_terminate() || self.shutting_down.load(Ordering::SeqCst);
            let Some(packet) = self.queue.dequeue(&should_stop) else { break };

            timeout_checker.enter();
            let business = self.business.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                business.dispatch_udp_packet(&handle, self.group_index, &packet.payload, packet.peer);
            }));
            timeout_checker.leave();

            if result.is_err() {
                warn!(worker = %worker_name, "udp worker callback panicked, packet dropped");
            }
        }

        info!(worker = %worker_name, "udp worker exiting");
    }

    /// Invoked once per `adjustThreadInterval` by the lifecycle controller
    /// (spec.md §4.4 steps 1-5).
    pub fn adjust_thread_count(self: &Arc<Self>, queue_alert_line: usize) {
        self.reap_zombies();

        let workers = self.workers.lock().clone();
        let idle_count = workers.iter().filter(|w| w.is_idle()).count();
        let current = workers.len();

        if self.queue.len() > queue_alert_line && idle_count == 0 && current < self.max_threads {
            let grow_by = ((current / 4).max(1)).min(self.max_threads - current);
            for _ in 0..grow_by {
                self.spawn_worker();
            }
        } else if idle_count > 1 && current > self.min_threads {
            let shrink_by = (idle_count - 1).min(current - self.min_threads);
            let mut requested = 0;
            for worker in workers.iter().filter(|w| w.is_idle()) {
                if requested >= shrink_by {
                    break;
                }
                worker.thread.request_terminate();
                requested += 1;
            }
            self.queue.wakeup_waiting(requested);
        }

        self.check_thread_timeout();
    }

    fn check_thread_timeout(&self) {
        for worker in self.workers.lock().iter() {
            if !worker.is_idle() && worker.timeout_checker.check(self.worker_timeout) {
                worker.thread.request_terminate();
            }
        }
    }

    fn reap_zombies(&self) {
        let mut workers = self.workers.lock();
        let mut i = 0;
        while i < workers.len() {
            let worker = workers[i].clone();
            let zombie = worker.thread.terminate_age().is_some_and(|age| age > self.max_thread_term);
            let finished = worker.thread.is_finished();

            if finished {
                worker.thread.join();
                workers.remove(i);
            } else if zombie {
                self.business_before_kill(&worker);
                worker.thread.detach();
                self.forced_kills.fetch_add(1, Ordering::SeqCst);
                workers.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// User-overridable hook run immediately before a worker is detached as
    /// a zombie, so the business can release whatever it still holds.
    fn business_before_kill(&self, worker: &WorkerEntry) {
        warn!(worker = worker.thread.name(), "force-killing zombie udp worker");
        let handle = UdpWorkerHandle { group_index: self.group_index, worker_name: worker.thread.name().to_string() };
        self.business.before_worker_kill(&handle);
    }

    /// Tears down this pool: flags shutdown, wakes every waiter, and joins
    /// workers up to `join_budget`, detaching any still running after that.
    pub fn shutdown(self: &Arc<Self>, join_budget: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.queue.shutdown();

        let deadline = Instant::now() + join_budget;
        loop {
            let remaining: Vec<_> = self
                .workers
                .lock()
                .iter()
                .filter(|w| !w.thread.is_finished())
                .cloned()
                .collect();

            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            if worker.thread.is_finished() {
                worker.thread.join();
            } else {
                self.business_before_kill(&worker);
                worker.thread.detach();
                self.forced_kills.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
