//! TCP accept loop (spec.md §4.6): one thread per configured port doing
//! non-blocking `select`+`accept`, handing each new connection off to one
//! of the server's event loops.

use std::{
    net::TcpListener,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{error, info};
use wirepool_io::{error as io_error, socket};

use super::connection::TcpConnection;
use super::event_loop::TcpEventLoop;
use crate::business::Business;

const ACCEPT_BACKLOG: u32 = 1024;
const SELECT_SLICE: Duration = Duration::from_millis(200);

pub struct TcpPortListener {
    listener: Arc<TcpListener>,
    thread: Option<std::thread::JoinHandle<()>>,
    terminated: Arc<AtomicBool>,
}

impl TcpPortListener {
    pub fn start(port: u16, business: Arc<dyn Business>, event_loops: Arc<Vec<Arc<TcpEventLoop>>>) -> std::io::Result<Self> {
        let addr = std::net::SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port);
        let std_listener = socket::bind_tcp(addr, ACCEPT_BACKLOG)?;
        let listener = Arc::new(std_listener);
        let terminated = Arc::new(AtomicBool::new(false));

        info!(port, "starting tcp port listener");

        let listener_for_thread = listener.clone();
        let terminated_for_thread = terminated.clone();
        let next_loop = AtomicUsize::new(0);
        let thread = std::thread::Builder::new()
            .name(format!("tcp-accept-{port}"))
            .spawn(move || accept_loop(listener_for_thread, business, event_loops, next_loop, terminated_for_thread))
            .expect("failed to spawn tcp accept thread");

        Ok(Self { listener, thread: Some(thread), terminated })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        self.listener.local_addr().map(|a| a.port())
    }

    pub fn stop(mut self) {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn accept_loop(
    listener: Arc<TcpListener>,
    business: Arc<dyn Business>,
    event_loops: Arc<Vec<Arc<TcpEventLoop>>>,
    next_loop: AtomicUsize,
    terminated: Arc<AtomicBool>,
) {
    while !terminated.load(Ordering::SeqCst) {
        match socket::wait_readable(listener.as_raw_fd(), SELECT_SLICE) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!(error = %e, "tcp accept select failed, stopping");
                return;
            }
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let conn = match TcpConnection::new(stream) {
                    Ok(conn) => Arc::new(conn),
                    Err(e) => {
                        error!(error = %e, %peer, "failed to wrap accepted tcp connection");
                        continue;
                    }
                };
                business.on_tcp_connect(&conn);
                let idx = next_loop.fetch_add(1, Ordering::SeqCst) % event_loops.len().max(1);
                event_loops[idx].register(conn);
            }
            Err(e) if io_error::is_recoverable(&e) => continue,
            Err(e) => {
                error!(error = %e, "tcp accept failed, stopping listener thread");
                return;
            }
        }
    }
}
