//! Process lifecycle controller (spec.md §4.9): options validation,
//! single-instance locking, optional daemonization, signal installation,
//! staged `initialize`/`run`/`finalize` with reverse-order teardown, and a
//! 1-second main loop that re-sizes worker pools and dispatches
//! user-signal/fatal-signal events.

use std::{
    fs::{File, OpenOptions},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    assistor::AssistorPool,
    business::{Business, ModuleAggregator, StartupState},
    error::{EngineError, Result},
    options::{Options, ServerType},
    scheduler::Scheduler,
    signals,
    tcp::TcpServer,
    udp::UdpServer,
    util::RingLog,
};

const FINALIZE_JOIN_BUDGET: Duration = Duration::from_secs(10);
const MAIN_LOOP_SLICE: Duration = Duration::from_secs(1);

/// Counters surfaced for diagnostics; not a metrics *exporter* (out of
/// scope), just a snapshot a business or operator can log or poll.
#[derive(Debug, Clone, Default)]
pub struct LifecycleStats {
    pub udp_forced_kills: u64,
    pub udp_dropped_packets: u64,
    pub tcp_connections: usize,
    pub recent_log_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Created,
    Initialized,
    Running,
    Finalized,
}

/// Holds a `flock`-based exclusive lock on a file for as long as it lives,
/// preventing a second instance of the process from starting
/// (spec.md §4.9, "allow multi instance" option).
struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    #[cfg(unix)]
    fn acquire(path: PathBuf) -> Result<Self> {
        use std::os::fd::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::file(path.clone(), e))?;

        // SAFETY: `file`'s fd is valid for the duration of this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(EngineError::file(path, std::io::Error::last_os_error()));
        }

        Ok(Self { _file: file, path })
    }

    #[cfg(not(unix))]
    fn acquire(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(&path).map_err(|e| EngineError::file(path.clone(), e))?;
        Ok(Self { _file: file, path })
    }
}

pub struct Lifecycle {
    business: Arc<dyn Business>,
    options: Options,
    modules: ModuleAggregator,
    state: RunState,

    instance_lock: Option<InstanceLock>,
    udp_server: Option<UdpServer>,
    tcp_server: Option<TcpServer>,
    assistor_pool: Option<AssistorPool>,
    scheduler: Scheduler,
    ring_log: RingLog,
}

impl Lifecycle {
    pub fn new(business: Arc<dyn Business>) -> Self {
        Self {
            business,
            options: Options::default(),
            modules: ModuleAggregator::new(),
            state: RunState::Created,
            instance_lock: None,
            udp_server: None,
            tcp_server: None,
            assistor_pool: None,
            scheduler: Scheduler::new(),
            ring_log: RingLog::new(256),
        }
    }

    pub fn register_module(&mut self, module: Box<dyn crate::business::ServerModule>) {
        self.modules.register(module);
    }

    /// Inspects `argv[1]` for `--version`/`--help` only (spec.md §6); every
    /// other argument list, including an empty one, is forwarded verbatim
    /// to `Business::parse_arguments`. Returns `Some(text)` if the process
    /// should print `text` and exit without starting.
    pub fn prescan_args(&self, args: &[String]) -> Option<String> {
        match args.first().map(String::as_str) {
            Some("--version") => Some(self.business.app_version()),
            Some("--help") => Some(self.business.app_help()),
            _ => None,
        }
    }

    /// Runs the full startup sequence (spec.md §4.9): argument parsing,
    /// option assembly/validation, single-instance lock, daemonize, signal
    /// installation, component construction, business/module init.
    pub fn initialize(&mut self, args: &[String]) -> Result<()> {
        assert_eq!(self.state, RunState::Created, "Lifecycle::initialize called twice");

        self.business.on_startup_state(StartupState::BeforeStart);

        if !self.business.parse_arguments(args) {
            self.business.on_startup_state(StartupState::StartFail);
            return Err(EngineError::Config("business rejected argument list".into()));
        }

        let mut options = Options::default();
        self.business.init_options(&mut options);
        self.options = match options.validate() {
            Ok(options) => options,
            Err(e) => {
                self.business.on_startup_state(StartupState::StartFail);
                return Err(e);
            }
        };

        if let Err(e) = self.enter_running_posture() {
            self.business.on_startup_state(StartupState::StartFail);
            return Err(e);
        }

        self.business.on_startup_state(StartupState::AfterStart);
        self.state = RunState::Initialized;
        self.ring_log.push("lifecycle initialized");
        Ok(())
    }

    fn enter_running_posture(&mut self) -> Result<()> {
        if !self.options.allow_multi_instance {
            let path = self.options.instance_lock_path.clone().unwrap_or_else(default_lock_path);
            self.instance_lock = Some(InstanceLock::acquire(path)?);
        }

        if self.options.is_daemon {
            daemonize()?;
        }

        signals::install();

        if self.options.server_type.contains(ServerType::UDP) {
            let mut udp = UdpServer::new(&self.options, self.business.clone())?;
            udp.initialize(self.options.udp_server_port, self.options.udp_listener_thread_count, self.business.clone())?;
            self.udp_server = Some(udp);
        }

        if self.options.server_type.contains(ServerType::TCP) {
            let mut tcp = TcpServer::new(&self.options, self.business.clone())?;
            tcp.initialize(&self.options)?;
            self.tcp_server = Some(tcp);
        }

        if self.options.assistor_thread_count > 0 {
            self.assistor_pool = Some(AssistorPool::start(self.options.assistor_thread_count, self.business.clone()));
        }

        self.scheduler.start();

        self.business.initialize()?;
        self.modules.init_all()?;

        Ok(())
    }

    /// Runs the 1-second main loop until a termination signal arrives or
    /// `should_stop` returns `true`, whichever comes first. Re-sizes UDP
    /// worker pools every `adjust_thread_interval` and dispatches
    /// user/fatal signals to the business (spec.md §6).
    pub fn run(&mut self, should_stop: impl Fn() -> bool) {
        assert_eq!(self.state, RunState::Initialized, "Lifecycle::run called before initialize or more than once");
        self.state = RunState::Running;
        info!("lifecycle entering main loop");

        let mut elapsed_since_adjust = Duration::ZERO;
        let mut second_count: u64 = 0;

        loop {
            if signals::terminate_requested() || should_stop() {
                info!("lifecycle main loop stopping");
                break;
            }

            if let Some(fatal) = signals::take_fatal_signal() {
                warn!(signal = fatal, "lifecycle main loop stopping due to fatal signal");
                break;
            }

            if let Some(user_sig) = signals::take_user_signal() {
                info!(signal = user_sig, "dispatching user signal to business");
                self.business.on_user_signal(user_sig);
            }

            second_count += 1;
            self.business.daemon_thread_execute(second_count);

            elapsed_since_adjust += MAIN_LOOP_SLICE;
            if elapsed_since_adjust >= self.options.adjust_thread_interval {
                elapsed_since_adjust = Duration::ZERO;
                if let Some(udp) = &self.udp_server {
                    udp.adjust_worker_thread_count();
                }
            }

            std::thread::sleep(MAIN_LOOP_SLICE);
        }
    }

    /// Reverse-order teardown (spec.md §4.9): later-initialized components
    /// finalize first. Each step is fault-isolated — a panic/log in one
    /// does not prevent the rest from running.
    pub fn finalize(&mut self) {
        if self.state == RunState::Finalized {
            return;
        }
        info!("lifecycle finalizing");

        self.modules.finalize_all();
        self.business.finalize();

        self.scheduler.shutdown(FINALIZE_JOIN_BUDGET);

        if let Some(mut assistors) = self.assistor_pool.take() {
            assistors.shutdown(FINALIZE_JOIN_BUDGET);
        }

        if let Some(mut tcp) = self.tcp_server.take() {
            tcp.finalize();
        }

        if let Some(mut udp) = self.udp_server.take() {
            udp.finalize(FINALIZE_JOIN_BUDGET);
        }

        self.instance_lock = None;

        self.state = RunState::Finalized;
        self.ring_log.push("lifecycle finalized");
        info!("lifecycle finalized");
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            udp_forced_kills: self.udp_server.as_ref().map_or(0, UdpServer::forced_kills),
            udp_dropped_packets: self.udp_server.as_ref().map_or(0, UdpServer::dropped_packets),
            tcp_connections: self.tcp_server.as_ref().map_or(0, TcpServer::connection_count),
            recent_log_lines: self.ring_log.snapshot(),
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.state != RunState::Finalized && self.state != RunState::Created {
            self.finalize();
        }
    }
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/tmp/wirepool.lock")
}

/// Double-forks and detaches from the controlling terminal. Errors at any
/// step surface as `EngineError::Thread` since they indicate the process
/// can't safely continue as a daemon.
#[cfg(unix)]
fn daemonize() -> Result<()> {
    // SAFETY: fork() has no preconditions; the child immediately calls
    // setsid() and exits the intermediate parent, the standard
    // double-fork daemonization idiom.
    unsafe {
        match libc::fork() {
            -1 => return Err(EngineError::Thread("daemonize: first fork failed".into())),
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() == -1 {
            return Err(EngineError::Thread("daemonize: setsid failed".into()));
        }

        match libc::fork() {
            -1 => return Err(EngineError::Thread("daemonize: second fork failed".into())),
            0 => {}
            _ => std::process::exit(0),
        }

        libc::close(0);
        libc::close(1);
        libc::close(2);
    }

    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    Err(EngineError::Thread("daemonize is only supported on unix".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestBusiness {
        initialized: AtomicBool,
        finalized: AtomicBool,
    }

    impl Business for TestBusiness {
        fn initialize(&self) -> std::result::Result<(), EngineError> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn finalize(&self) {
            self.finalized.store(true, Ordering::SeqCst);
        }

        fn dispatch_udp_packet(&self, _w: &crate::udp::UdpWorkerHandle, _g: usize, _p: &[u8], _peer: SocketAddr) {}

        fn app_version(&self) -> String {
            "test-1.0".into()
        }
    }

    #[test]
    fn prescan_args_handles_version() {
        let business = Arc::new(TestBusiness { initialized: AtomicBool::new(false), finalized: AtomicBool::new(false) });
        let lifecycle = Lifecycle::new(business);
        assert_eq!(lifecycle.prescan_args(&["--version".to_string()]), Some("test-1.0".to_string()));
        assert_eq!(lifecycle.prescan_args(&["anything-else".to_string()]), None);
    }

    #[test]
    fn initialize_then_finalize_round_trip() {
        let business = Arc::new(TestBusiness { initialized: AtomicBool::new(false), finalized: AtomicBool::new(false) });
        let mut lifecycle = Lifecycle::new(business.clone());

        let mut opts = Options::default();
        opts.allow_multi_instance = true;
        opts.server_type = crate::options::ServerType::empty();
        opts.assistor_thread_count = 0;

        // Directly drive the same sequence `initialize` would, bypassing
        // `Business::init_options` since this test's business doesn't
        // override it.
        lifecycle.options = opts.validate().unwrap();
        lifecycle.business.on_startup_state(StartupState::BeforeStart);
        assert!(lifecycle.business.parse_arguments(&[]));
        lifecycle.enter_running_posture().unwrap();
        lifecycle.state = RunState::Initialized;

        assert!(business.initialized.load(Ordering::SeqCst));

        lifecycle.finalize();
        assert!(business.finalized.load(Ordering::SeqCst));
    }

    #[test]
    fn run_stops_on_should_stop() {
        let business = Arc::new(TestBusiness { initialized: AtomicBool::new(false), finalized: AtomicBool::new(false) });
        let mut lifecycle = Lifecycle::new(business);

        let mut opts = Options::default();
        opts.allow_multi_instance = true;
        opts.server_type = crate::options::ServerType::empty();
        lifecycle.options = opts.validate().unwrap();
        lifecycle.enter_running_posture().unwrap();
        lifecycle.state = RunState::Initialized;

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let start = Instant::now();
        lifecycle.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            counter.load(Ordering::SeqCst) >= 2
        });
        assert!(start.elapsed() < Duration::from_secs(5));

        lifecycle.finalize();
    }
}
