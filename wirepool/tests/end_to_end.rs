//! End-to-end scenarios driving a real [`Lifecycle`] over real sockets
//! (spec.md §8): UDP classify-and-echo, a dropped (classifier `-1`)
//! packet, and graceful shutdown leaving no connections/threads behind.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wirepool::business::Business;
use wirepool::options::{Options, ServerType, TcpServerOptions};
use wirepool::udp::UdpWorkerHandle;
use wirepool::Lifecycle;

struct EchoOrDropBusiness {
    udp_port: u16,
    tcp_port: u16,
    dispatched: AtomicUsize,
}

impl Business for EchoOrDropBusiness {
    fn init_options(&self, options: &mut Options) {
        options.server_type = ServerType::UDP | ServerType::TCP;
        options.udp_server_port = self.udp_port;
        options.tcp_servers = vec![TcpServerOptions { tcp_server_port: self.tcp_port }];
        options.allow_multi_instance = true;
    }

    fn classify_udp_packet(&self, buf: &[u8]) -> Option<usize> {
        if buf == b"drop-me" {
            None
        } else {
            Some(0)
        }
    }

    fn dispatch_udp_packet(&self, _worker: &UdpWorkerHandle, _group_index: usize, payload: &[u8], peer: SocketAddr) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.send_to(payload, peer).unwrap();
    }

    fn on_tcp_recv_complete(&self, conn: &wirepool::tcp::TcpConnection, buf: &[u8]) {
        let _ = conn.send_buffer(buf, true, Some(Duration::from_secs(2)));
    }
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

#[test]
fn udp_round_trip_and_classifier_drop() {
    let udp_port = free_port();
    let tcp_port = free_port();
    let business = Arc::new(EchoOrDropBusiness {
        udp_port,
        tcp_port,
        dispatched: AtomicUsize::new(0),
    });

    let mut lifecycle = Lifecycle::new(business.clone());
    lifecycle.initialize(&[]).expect("lifecycle initialize");

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    client.send_to(b"drop-me", ("127.0.0.1", udp_port)).unwrap();
    client.send_to(b"echo-me", ("127.0.0.1", udp_port)).unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = client.recv_from(&mut buf).expect("should receive the echoed packet, not the dropped one");
    assert_eq!(&buf[..n], b"echo-me");
    assert_eq!(business.dispatched.load(Ordering::SeqCst), 1);

    lifecycle.finalize();
}

#[test]
fn tcp_echo_round_trip() {
    use std::io::{Read, Write};
    use std::net::TcpStream;

    let udp_port = free_port();
    let tcp_port = free_port();
    let business = Arc::new(EchoOrDropBusiness {
        udp_port,
        tcp_port,
        dispatched: AtomicUsize::new(0),
    });

    let mut lifecycle = Lifecycle::new(business);
    lifecycle.initialize(&[]).expect("lifecycle initialize");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut stream = loop {
        match TcpStream::connect(("127.0.0.1", tcp_port)) {
            Ok(s) => break s,
            Err(_) if std::time::Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("failed to connect: {e}"),
        }
    };

    stream.write_all(b"ping").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    lifecycle.finalize();
}

#[test]
fn finalize_is_idempotent_and_drains_connections() {
    let udp_port = free_port();
    let tcp_port = free_port();
    let business = Arc::new(EchoOrDropBusiness {
        udp_port,
        tcp_port,
        dispatched: AtomicUsize::new(0),
    });

    let mut lifecycle = Lifecycle::new(business);
    lifecycle.initialize(&[]).expect("lifecycle initialize");

    let stats_before = lifecycle.stats();
    assert_eq!(stats_before.tcp_connections, 0);

    lifecycle.finalize();
    lifecycle.finalize();
}
