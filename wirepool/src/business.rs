//! The plugin surface the engine drives: one [`Business`] instance per
//! process, plus an optional [`ModuleAggregator`] of independent
//! [`ServerModule`]s that compose by fan-out rather than by subclassing a
//! business base (spec.md §9's re-architecture guidance).

use std::net::SocketAddr;

use crate::{error::EngineError, options::Options, tcp::connection::TcpConnection, udp::worker::UdpWorkerHandle};

/// Lifecycle phases reported through [`Business::on_startup_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    BeforeStart,
    AfterStart,
    StartFail,
}

/// Why a TCP connection went away. Unifies spec.md §9's "on connection" /
/// "on error" dual path under one callback.
#[derive(Debug)]
pub enum DisconnectReason {
    PeerClosed,
    Shutdown,
    Error(EngineError),
}

/// The business-object interface the engine is built against (spec.md §6).
///
/// Implementors are `Send + Sync`: callbacks are invoked from listener,
/// worker, assistor, and scheduler threads concurrently.
pub trait Business: Send + Sync + 'static {
    fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn finalize(&self) {}

    /// Returns `false` to reject the argument list (causing startup to abort).
    fn parse_arguments(&self, args: &[String]) -> bool {
        let _ = args;
        true
    }

    fn app_version(&self) -> String {
        String::from("unknown")
    }

    fn app_help(&self) -> String {
        String::new()
    }

    fn on_startup_state(&self, state: StartupState) {
        let _ = state;
    }

    fn init_options(&self, options: &mut Options) {
        let _ = options;
    }

    /// Classifies a UDP datagram into a group index, or `None` to drop it
    /// (spec.md's `-1` sentinel). Default routes everything to group 0.
    fn classify_udp_packet(&self, buf: &[u8]) -> Option<usize> {
        let _ = buf;
        Some(0)
    }

    /// Handles one dequeued UDP packet. Runs inside a worker's timeout-checked
    /// scope (spec.md §4.4).
    fn dispatch_udp_packet(&self, worker: &UdpWorkerHandle, group_index: usize, payload: &[u8], peer: SocketAddr);

    /// Runs immediately before the pool detaches a worker that overran
    /// `MAX_THREAD_TERM_SECS` (spec.md §4.4's `beforeKill()`), so the
    /// business can release whatever the stuck callback still holds.
    fn before_worker_kill(&self, worker: &UdpWorkerHandle) {
        let _ = worker;
    }

    fn on_tcp_connect(&self, conn: &TcpConnection) {
        let _ = conn;
    }

    /// Fires exactly once per connection (spec.md §8), replacing the
    /// deprecated dual connect-error/disconnect path.
    fn on_tcp_disconnect(&self, conn: &TcpConnection, reason: DisconnectReason) {
        let _ = (conn, reason);
    }

    fn on_tcp_recv_complete(&self, conn: &TcpConnection, buf: &[u8]) {
        let _ = (conn, buf);
    }

    fn on_tcp_send_complete(&self, conn: &TcpConnection) {
        let _ = conn;
    }

    /// Runs on one of the engine's assistor threads until `thread.is_terminating()`.
    fn assistor_thread_execute(&self, thread: &crate::assistor::AssistorHandle, assistor_index: usize) {
        let _ = (thread, assistor_index);
    }

    /// Runs once per second on the engine's daemon/maintenance thread.
    fn daemon_thread_execute(&self, second_count: u64) {
        let _ = second_count;
    }

    /// Dispatched from the lifecycle main loop when SIGUSR1/SIGUSR2 arrives
    /// (spec.md §6's "User (dispatched to registered callbacks)" signal
    /// disposition), carrying the raw signal number so one handler can tell
    /// the two apart.
    fn on_user_signal(&self, signal: i32) {
        let _ = signal;
    }
}

/// A composable plugin run alongside the business object. Unlike `Business`
/// there is one instance of this per feature, not per process — the
/// [`ModuleAggregator`] fans init/finalize out to all of them instead of the
/// business having to subclass a module base.
pub trait ServerModule: Send + Sync {
    fn on_init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_finalize(&self) {}
}

/// Runs each registered [`ServerModule`]'s hooks in registration order on
/// init, and in reverse order on finalize, matching the lifecycle
/// controller's own reverse-unwind-on-failure policy (spec.md §4.7).
#[derive(Default)]
pub struct ModuleAggregator {
    modules: Vec<Box<dyn ServerModule>>,
}

impl ModuleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn ServerModule>) {
        self.modules.push(module);
    }

    pub fn init_all(&self) -> Result<(), EngineError> {
        for module in &self.modules {
            module.on_init()?;
        }
        Ok(())
    }

    pub fn finalize_all(&self) {
        for module in self.modules.iter().rev() {
            module.on_finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule(&'static AtomicUsize);

    impl ServerModule for CountingModule {
        fn on_init(&self) -> Result<(), EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_finalize(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn aggregator_runs_all_modules() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let mut agg = ModuleAggregator::new();
        agg.register(Box::new(CountingModule(&COUNTER)));
        agg.register(Box::new(CountingModule(&COUNTER)));

        agg.init_all().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 2);

        agg.finalize_all();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);
    }
}
