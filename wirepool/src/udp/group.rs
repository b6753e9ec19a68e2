//! A (queue, worker-pool) pair keyed by a stable group index (spec.md §3).

use std::{sync::Arc, time::Duration};

use crate::{business::Business, options::UdpGroupOptions};

use super::{queue::UdpRequestQueue, worker::UdpWorkerPool};

pub struct UdpGroup {
    pub index: usize,
    pub queue: Arc<UdpRequestQueue>,
    pub pool: Arc<UdpWorkerPool>,
}

impl UdpGroup {
    pub fn new(
        index: usize,
        options: &UdpGroupOptions,
        eff_wait_time: Duration,
        business: Arc<dyn Business>,
        worker_timeout: Option<Duration>,
        max_thread_term: Duration,
    ) -> Self {
        let queue = Arc::new(UdpRequestQueue::new(
            options.request_queue_capacity,
            eff_wait_time,
            options.overflow_policy,
        ));
        let pool = UdpWorkerPool::new(index, queue.clone(), business, options, worker_timeout, max_thread_term);
        Self { index, queue, pool }
    }

    pub fn shutdown(&self, join_budget: Duration) {
        self.pool.shutdown(join_budget);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.queue.dropped_for_capacity() + self.queue.dropped_for_age()
    }
}
