//! Wires TCP port listeners to a shared pool of event loops (spec.md
//! §4.6).

use std::sync::Arc;

use tracing::info;

use crate::{business::Business, error::Result, options::Options};

use super::{event_loop::TcpEventLoop, listener::TcpPortListener};

pub struct TcpServer {
    event_loops: Arc<Vec<Arc<TcpEventLoop>>>,
    listeners: Vec<TcpPortListener>,
    business: Arc<dyn Business>,
}

impl TcpServer {
    pub fn new(options: &Options, business: Arc<dyn Business>) -> Result<Self> {
        let event_loops = (0..options.tcp_event_loop_count.max(1))
            .map(|idx| TcpEventLoop::spawn(format!("tcp-eventloop-{idx}"), business.clone()))
            .collect::<Vec<_>>();

        Ok(Self { event_loops: Arc::new(event_loops), listeners: Vec::new(), business })
    }

    pub fn initialize(&mut self, options: &Options) -> Result<()> {
        for server_opts in &options.tcp_servers {
            let listener = TcpPortListener::start(server_opts.tcp_server_port, self.business.clone(), self.event_loops.clone())
                .map_err(|e| crate::error::EngineError::network("tcp listener bind/start", e))?;
            info!(port = listener.local_port().unwrap_or(server_opts.tcp_server_port), "tcp server initialized");
            self.listeners.push(listener);
        }
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.event_loops.iter().map(|e| e.connection_count()).sum()
    }

    pub fn finalize(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.stop();
        }
        for event_loop in self.event_loops.iter() {
            event_loop.shutdown(&self.business);
        }
        info!("tcp server finalized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TcpServerOptions;
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    struct NullBusiness;
    impl Business for NullBusiness {
        fn dispatch_udp_packet(&self, _w: &crate::udp::UdpWorkerHandle, _g: usize, _p: &[u8], _peer: SocketAddr) {}
    }

    #[test]
    fn server_accepts_a_connection() {
        let mut options = Options::default();
        options.tcp_servers = vec![TcpServerOptions { tcp_server_port: 0 }];
        let business: Arc<dyn Business> = Arc::new(NullBusiness);

        let mut server = TcpServer::new(&options, business).unwrap();
        server.initialize(&options).unwrap();
        let port = server.listeners[0].local_port().unwrap();

        let _client = TcpStream::connect(SocketAddr::new(std::net::Ipv4Addr::LOCALHOST.into(), port)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while server.connection_count() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(server.connection_count(), 1);

        server.finalize();
    }
}
