//! Engine configuration.
//!
//! `Options` is assembled by the business in [`crate::business::Business::init_options`]
//! and validated/clamped by [`Lifecycle::initialize`](crate::lifecycle::Lifecycle::initialize).
//! The engine never loads it from a file or environment — that remains the
//! business's job.

use std::{path::PathBuf, time::Duration};

bitflags::bitflags! {
    /// Which transports this process runs. A business can enable either or both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerType: u8 {
        const UDP = 0b01;
        const TCP = 0b10;
    }
}

/// What happens to an enqueued packet when its group's queue is already at
/// capacity. Resolves the Open Question in spec.md §9 by making the choice
/// an explicit, documented option instead of an implicit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOverflowPolicy {
    /// Discard the oldest queued packet, then enqueue the new one. Matches
    /// spec.md §4.3's stated contract and is the default.
    #[default]
    DropHead,
    /// Discard the incoming packet instead, leaving the queue untouched.
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct UdpGroupOptions {
    pub request_queue_capacity: usize,
    pub min_worker_threads: usize,
    pub max_worker_threads: usize,
    pub overflow_policy: QueueOverflowPolicy,
}

impl Default for UdpGroupOptions {
    fn default() -> Self {
        Self {
            request_queue_capacity: 1024,
            min_worker_threads: 2,
            max_worker_threads: 16,
            overflow_policy: QueueOverflowPolicy::DropHead,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpServerOptions {
    pub tcp_server_port: u16,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub log_file_name: String,
    pub log_new_file_daily: bool,

    pub is_daemon: bool,
    pub allow_multi_instance: bool,
    /// Path to the `flock`-based single-instance lock file. `None` picks
    /// `/tmp/<process-name>.lock` at initialize time.
    pub instance_lock_path: Option<PathBuf>,

    pub server_type: ServerType,
    pub adjust_thread_interval: Duration,
    pub assistor_thread_count: usize,

    pub udp_server_port: u16,
    pub udp_listener_thread_count: usize,
    pub udp_groups: Vec<UdpGroupOptions>,
    pub udp_request_eff_wait_time: Duration,
    pub udp_worker_thread_timeout: Option<Duration>,
    pub udp_request_queue_alert_line: usize,

    pub tcp_servers: Vec<TcpServerOptions>,
    pub tcp_event_loop_count: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_file_name: String::new(),
            log_new_file_daily: false,
            is_daemon: false,
            allow_multi_instance: false,
            instance_lock_path: None,
            server_type: ServerType::UDP | ServerType::TCP,
            adjust_thread_interval: Duration::from_secs(5),
            assistor_thread_count: 0,
            udp_server_port: 0,
            udp_listener_thread_count: 1,
            udp_groups: vec![UdpGroupOptions::default()],
            udp_request_eff_wait_time: Duration::from_secs(5),
            udp_worker_thread_timeout: None,
            udp_request_queue_alert_line: 512,
            tcp_servers: Vec::new(),
            tcp_event_loop_count: 1,
        }
    }
}

impl Options {
    /// Clamps fields that spec.md documents a clampable floor/ceiling for,
    /// and rejects (`EngineError::Config`) fields that have no sensible
    /// clamp (e.g. a group whose max is below its min).
    pub fn validate(mut self) -> crate::error::Result<Self> {
        use crate::error::EngineError;

        if self.adjust_thread_interval < Duration::from_secs(1) {
            self.adjust_thread_interval = Duration::from_secs(1);
        }

        if self.server_type.contains(ServerType::UDP) {
            if self.udp_listener_thread_count == 0 {
                return Err(EngineError::Config("udpListenerThreadCount must be >= 1".into()));
            }
            if self.udp_groups.is_empty() {
                return Err(EngineError::Config("udpRequestGroupCount must be >= 1".into()));
            }
            if self.udp_request_eff_wait_time.is_zero() {
                return Err(EngineError::Config("udpRequestEffWaitTime must be > 0".into()));
            }
            if self.udp_request_queue_alert_line == 0 {
                return Err(EngineError::Config("udpRequestQueueAlertLine must be >= 1".into()));
            }
            for (idx, group) in self.udp_groups.iter().enumerate() {
                if group.request_queue_capacity == 0 {
                    return Err(EngineError::Config(format!("group {idx}: requestQueueCapacity must be >= 1")));
                }
                if group.min_worker_threads == 0 {
                    return Err(EngineError::Config(format!("group {idx}: minWorkerThreads must be >= 1")));
                }
                if group.max_worker_threads < group.min_worker_threads {
                    return Err(EngineError::Config(format!(
                        "group {idx}: maxWorkerThreads ({}) must be >= minWorkerThreads ({})",
                        group.max_worker_threads, group.min_worker_threads
                    )));
                }
            }
        }

        if self.server_type.contains(ServerType::TCP) && self.tcp_event_loop_count == 0 {
            return Err(EngineError::Config("tcpEventLoopCount must be >= 1".into()));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_adjust_interval_floor() {
        let opts = Options {
            adjust_thread_interval: Duration::from_millis(0),
            ..Options::default()
        };
        let opts = opts.validate().unwrap();
        assert_eq!(opts.adjust_thread_interval, Duration::from_secs(1));
    }

    #[test]
    fn rejects_inverted_worker_bounds() {
        let opts = Options {
            udp_groups: vec![UdpGroupOptions {
                min_worker_threads: 8,
                max_worker_threads: 2,
                ..UdpGroupOptions::default()
            }],
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }
}
