//! Bounded per-group FIFO of [`UdpPacket`]s (spec.md §3/§4.3).

use std::{collections::VecDeque, time::Duration};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::packet::UdpPacket;
use crate::options::QueueOverflowPolicy;

struct Inner {
    packets: VecDeque<UdpPacket>,
    shutting_down: bool,
    dropped_for_capacity: u64,
    dropped_for_age: u64,
}

pub struct UdpRequestQueue {
    capacity: usize,
    max_wait: Duration,
    overflow_policy: QueueOverflowPolicy,
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl UdpRequestQueue {
    pub fn new(capacity: usize, max_wait: Duration, overflow_policy: QueueOverflowPolicy) -> Self {
        Self {
            capacity,
            max_wait,
            overflow_policy,
            inner: Mutex::new(Inner {
                packets: VecDeque::with_capacity(capacity),
                shutting_down: false,
                dropped_for_capacity: 0,
                dropped_for_age: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `packet`. If the queue is already at `capacity`, applies the
    /// configured overflow policy so `count` never exceeds `capacity`.
    pub fn enqueue(&self, packet: UdpPacket) {
        let mut inner = self.inner.lock();

        if inner.packets.len() >= self.capacity {
            match self.overflow_policy {
                QueueOverflowPolicy::DropHead => {
                    inner.packets.pop_front();
                    inner.dropped_for_capacity += 1;
                    inner.packets.push_back(packet);
                }
                QueueOverflowPolicy::DropNewest => {
                    inner.dropped_for_capacity += 1;
                    debug!("udp queue full, dropping newest packet");
                    return;
                }
            }
        } else {
            inner.packets.push_back(packet);
        }

        self.not_empty.notify_one();
    }

    /// Blocks until a packet is available, the queue shuts down, or
    /// `should_stop` starts returning `true`, then pops from the head.
    /// Packets older than `max_wait` are discarded and the next one is
    /// tried (spec.md §4.3).
    ///
    /// `should_stop` exists so a worker whose terminate flag has been
    /// raised (pool shrink, spec.md §4.4 step 3) actually wakes up and
    /// returns instead of re-parking on the condvar forever: a bare
    /// `notify_one` on an empty, non-shut-down queue would otherwise just
    /// put the caller straight back to sleep.
    pub fn dequeue(&self, should_stop: &dyn Fn() -> bool) -> Option<UdpPacket> {
        let mut inner = self.inner.lock();

        loop {
            while inner.packets.is_empty() && !inner.shutting_down {
                if should_stop() {
                    return None;
                }
                self.not_empty.wait_for(&mut inner, Duration::from_millis(200));
            }

            let Some(packet) = inner.packets.pop_front() else {
                return None;
            };

            if packet.age() > self.max_wait {
                inner.dropped_for_age += 1;
                debug!(age_ms = packet.age().as_millis(), "dropping aged udp packet");
                continue;
            }

            return Some(packet);
        }
    }

    /// Wakes up to `n` blocked `dequeue` callers (used on pool shrink and
    /// shutdown); they observe empty-and-shutdown and return `None`.
    pub fn wakeup_waiting(&self, n: usize) {
        for _ in 0..n {
            self.not_empty.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.inner.lock().shutting_down = true;
        self.not_empty.notify_all();
    }

    pub fn clear(&self) {
        self.inner.lock().packets.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_for_capacity(&self) -> u64 {
        self.inner.lock().dropped_for_capacity
    }

    pub fn dropped_for_age(&self) -> u64 {
        self.inner.lock().dropped_for_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn addr() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1234)
    }

    #[test]
    fn drop_head_keeps_count_at_capacity() {
        let queue = UdpRequestQueue::new(2, Duration::from_secs(60), QueueOverflowPolicy::DropHead);
        queue.enqueue(UdpPacket::new(b"a", addr()));
        queue.enqueue(UdpPacket::new(b"b", addr()));
        queue.enqueue(UdpPacket::new(b"c", addr()));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(&|| false).unwrap().payload.as_ref(), b"b");
        assert_eq!(queue.dequeue(&|| false).unwrap().payload.as_ref(), b"c");
        assert_eq!(queue.dropped_for_capacity(), 1);
    }

    #[test]
    fn drop_newest_leaves_queue_untouched() {
        let queue = UdpRequestQueue::new(1, Duration::from_secs(60), QueueOverflowPolicy::DropNewest);
        queue.enqueue(UdpPacket::new(b"a", addr()));
        queue.enqueue(UdpPacket::new(b"b", addr()));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(&|| false).unwrap().payload.as_ref(), b"a");
    }

    #[test]
    fn aged_packets_are_skipped_on_dequeue() {
        let queue = UdpRequestQueue::new(4, Duration::from_millis(10), QueueOverflowPolicy::DropHead);
        queue.enqueue(UdpPacket::new(b"stale", addr()));
        std::thread::sleep(Duration::from_millis(30));
        queue.enqueue(UdpPacket::new(b"fresh", addr()));

        let packet = queue.dequeue(&|| false).unwrap();
        assert_eq!(packet.payload.as_ref(), b"fresh");
        assert_eq!(queue.dropped_for_age(), 1);
    }

    #[test]
    fn dequeue_after_shutdown_returns_none() {
        let queue = UdpRequestQueue::new(4, Duration::from_secs(60), QueueOverflowPolicy::DropHead);
        queue.shutdown();
        assert!(queue.dequeue(&|| false).is_none());
    }
}
