//! A single received UDP datagram, owned by value as it moves from listener
//! to queue to worker (spec.md §9's value-typed-ownership guidance).

use std::{net::SocketAddr, time::Instant};

#[derive(Debug)]
pub struct UdpPacket {
    pub payload: Box<[u8]>,
    pub received_at: Instant,
    pub peer: SocketAddr,
}

impl UdpPacket {
    pub fn new(payload: &[u8], peer: SocketAddr) -> Self {
        Self { payload: payload.into(), received_at: Instant::now(), peer }
    }

    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}
