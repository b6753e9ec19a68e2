//! Minimal echo service: the same bytes received on UDP or TCP are sent
//! straight back to the sender. Demonstrates the smallest possible
//! `Business` implementation driving a `Lifecycle`.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use wirepool::business::Business;
use wirepool::options::{Options, ServerType, TcpServerOptions};
use wirepool::udp::UdpWorkerHandle;
use wirepool::Lifecycle;

#[derive(Parser, Debug)]
#[command(name = "wirepool-echo-demo")]
struct Args {
    #[arg(long, default_value_t = 9000)]
    udp_port: u16,

    #[arg(long, default_value_t = 9001)]
    tcp_port: u16,
}

struct EchoBusiness {
    udp_port: u16,
    tcp_port: u16,
}

impl Business for EchoBusiness {
    fn init_options(&self, options: &mut Options) {
        options.server_type = ServerType::UDP | ServerType::TCP;
        options.udp_server_port = self.udp_port;
        options.tcp_servers = vec![TcpServerOptions { tcp_server_port: self.tcp_port }];
    }

    fn dispatch_udp_packet(&self, worker: &UdpWorkerHandle, _group_index: usize, payload: &[u8], peer: SocketAddr) {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").expect("bind reply socket");
        if let Err(e) = socket.send_to(payload, peer) {
            tracing::warn!(worker = %worker.worker_name, %peer, error = %e, "udp echo reply failed");
        }
    }

    fn on_tcp_recv_complete(&self, conn: &wirepool::tcp::TcpConnection, buf: &[u8]) {
        let _ = conn.send_buffer(buf, true, Some(std::time::Duration::from_secs(5)));
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let business = Arc::new(EchoBusiness { udp_port: args.udp_port, tcp_port: args.tcp_port });
    let mut lifecycle = Lifecycle::new(business);

    if let Err(e) = lifecycle.initialize(&std::env::args().skip(1).collect::<Vec<_>>()) {
        tracing::error!(error = %e, "failed to initialize echo demo");
        std::process::exit(1);
    }

    lifecycle.run(|| false);
    lifecycle.finalize();
}
