//! Wires a [`UdpListenerPool`] to its [`UdpGroup`]s (spec.md §2 dataflow:
//! listener → classifier → group queue → worker pool).

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{business::Business, error::Result, options::Options};

use super::{group::UdpGroup, listener::UdpListenerPool};

pub struct UdpServer {
    groups: Arc<Vec<UdpGroup>>,
    listeners: Option<UdpListenerPool>,
    queue_alert_line: usize,
}

impl UdpServer {
    pub fn new(options: &Options, business: Arc<dyn Business>) -> Result<Self> {
        let groups = options
            .udp_groups
            .iter()
            .enumerate()
            .map(|(idx, group_opts)| {
                UdpGroup::new(
                    idx,
                    group_opts,
                    options.udp_request_eff_wait_time,
                    business.clone(),
                    options.udp_worker_thread_timeout,
                    super::worker::default_max_thread_term(),
                )
            })
            .collect::<Vec<_>>();

        Ok(Self { groups: Arc::new(groups), listeners: None, queue_alert_line: options.udp_request_queue_alert_line })
    }

    pub fn initialize(&mut self, port: u16, listener_thread_count: usize, business: Arc<dyn Business>) -> crate::error::Result<()> {
        let pool = UdpListenerPool::start(port, listener_thread_count, business, self.groups.clone())
            .map_err(|e| crate::error::EngineError::network("udp listener bind/start", e))?;
        info!(port = pool.local_port().unwrap_or(port), "udp server initialized");
        self.listeners = Some(pool);
        Ok(())
    }

    /// Invoked by the lifecycle controller once per `adjustThreadInterval`.
    pub fn adjust_worker_thread_count(&self) {
        for group in self.groups.iter() {
            group.pool.adjust_thread_count(self.queue_alert_line);
        }
    }

    pub fn forced_kills(&self) -> u64 {
        self.groups.iter().map(|g| g.pool.forced_kills()).sum()
    }

    pub fn dropped_packets(&self) -> u64 {
        self.groups.iter().map(|g| g.dropped_packets()).sum()
    }

    pub fn finalize(&mut self, join_budget: Duration) {
        if let Some(listeners) = self.listeners.take() {
            listeners.stop();
        }
        for group in self.groups.iter() {
            group.shutdown(join_budget);
        }
        info!("udp server finalized");
    }
}
