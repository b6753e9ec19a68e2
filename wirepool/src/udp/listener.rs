//! UDP listener pool: `K` threads doing `select`+`recvfrom`, classifying
//! each datagram and handing it to the matching group's queue (spec.md
//! §4.2).

use std::{
    net::UdpSocket,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, error, info};
use wirepool_io::{error as io_error, socket};

use super::{group::UdpGroup, packet::UdpPacket};
use crate::business::Business;

const RECV_BUF_SIZE: usize = 8 * 1024;
const SELECT_SLICE: Duration = Duration::from_millis(100);

pub struct UdpListenerPool {
    socket: Arc<UdpSocket>,
    threads: Vec<std::thread::JoinHandle<()>>,
    terminated: Arc<AtomicBool>,
}

impl UdpListenerPool {
    pub fn start(port: u16, thread_count: usize, business: Arc<dyn Business>, groups: Arc<Vec<UdpGroup>>) -> std::io::Result<Self> {
        let addr = std::net::SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port);
        let std_socket = socket::bind_udp(addr)?;
        let socket = Arc::new(std_socket);
        let terminated = Arc::new(AtomicBool::new(false));

        info!(port, thread_count, "starting udp listener pool");

        let threads = (0..thread_count.max(1))
            .map(|idx| {
                let socket = socket.clone();
                let business = business.clone();
                let groups = groups.clone();
                let terminated = terminated.clone();
                std::thread::Builder::new()
                    .name(format!("udp-listener-{idx}"))
                    .spawn(move || listener_loop(socket, business, groups, terminated))
                    .expect("failed to spawn udp listener thread")
            })
            .collect();

        Ok(Self { socket, threads, terminated })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        self.socket.local_addr().map(|a| a.port())
    }

    pub fn stop(self) {
        self.terminated.store(true, Ordering::SeqCst);
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

fn listener_loop(socket: Arc<UdpSocket>, business: Arc<dyn Business>, groups: Arc<Vec<UdpGroup>>, terminated: Arc<AtomicBool>) {
    socket::raise_thread_priority();
    let mut buf = [0u8; RECV_BUF_SIZE];

    while !terminated.load(Ordering::SeqCst) {
        match socket::wait_readable(socket.as_raw_fd(), SELECT_SLICE) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!(error = %e, "udp listener select failed, stopping");
                return;
            }
        }

        match socket.recv_from(&mut buf) {
            Ok((0, _)) => continue,
            Ok((n, peer)) => dispatch(&business, &groups, &buf[..n], peer),
            Err(e) if io_error::is_recoverable(&e) => continue,
            // A UDP socket reporting ConnectionReset is a delayed ICMP
            // port-unreachable from a prior send, not a real failure of
            // this listener (see wirepool_io::socket::suppress_icmp_port_unreachable).
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                error!(error = %e, "udp recvfrom failed, stopping listener thread");
                return;
            }
        }
    }
}

fn dispatch(business: &Arc<dyn Business>, groups: &[UdpGroup], payload: &[u8], peer: std::net::SocketAddr) {
    let Some(group_index) = business.classify_udp_packet(payload) else {
        debug!(len = payload.len(), "classifier dropped udp packet");
        return;
    };

    match groups.get(group_index) {
        Some(group) => group.queue.enqueue(UdpPacket::new(payload, peer)),
        None => debug!(group_index, "classifier returned out-of-range group index, dropping"),
    }
}
