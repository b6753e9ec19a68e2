//! A single TCP connection (spec.md §3/§4.5 `BaseTcpConnection`).
//!
//! Read and write callbacks on one connection are always serialized by the
//! business (spec.md §5); the engine itself never calls into two callbacks
//! for the same connection concurrently, but the socket operations below
//! are safe to call from whichever single thread the business has chosen to
//! own this connection.

use std::{
    any::Any,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    os::fd::{AsRawFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use wirepool_io::{error as io_error, socket};

/// Outcome of a sync (poll-until-deadline) send/recv: either a byte count,
/// possibly partial if the deadline was hit, or a hard I/O error that has
/// already disconnected the connection.
pub type IoOutcome = Result<usize, io::Error>;

pub struct TcpConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    disconnected: AtomicBool,
    keep_alive: AtomicBool,
    context: Mutex<Option<Box<dyn Any + Send>>>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            stream,
            peer_addr,
            local_addr,
            disconnected: AtomicBool::new(false),
            keep_alive: AtomicBool::new(false),
            context: Mutex::new(None),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.store(keep_alive, Ordering::SeqCst);
        let _ = self.stream.set_nodelay(!keep_alive);
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// Sets the business-owned opaque context carried alongside this
    /// connection (spec.md §3).
    pub fn set_context(&self, context: Box<dyn Any + Send>) {
        *self.context.lock().unwrap() = Some(context);
    }

    pub fn with_context<R>(&self, f: impl FnOnce(Option<&(dyn Any + Send)>) -> R) -> R {
        let guard = self.context.lock().unwrap();
        f(guard.as_deref())
    }

    /// Sends `buf`. In sync mode, polls `select`-style in 250 ms slices
    /// until all bytes are sent, `timeout` elapses, or a hard error occurs;
    /// a deadline hit still returns the partial count, not an error
    /// (spec.md §4.5). In async mode, issues one `send` attempt.
    pub fn send_buffer(&self, buf: &[u8], sync: bool, timeout: Option<Duration>) -> IoOutcome {
        if self.is_disconnected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection already disconnected"));
        }

        if !sync {
            return match (&self.stream).write(buf) {
                Ok(n) => Ok(n),
                Err(e) if io_error::is_recoverable(&e) => Ok(0),
                Err(e) => {
                    self.mark_disconnected();
                    Err(e)
                }
            };
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut sent = 0;
        while sent < buf.len() {
            match (&self.stream).write(&buf[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if io_error::is_recoverable(&e) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            break;
                        }
                        let slice = deadline.saturating_duration_since(Instant::now()).min(Duration::from_millis(250));
                        let _ = socket::wait_writable(self.stream.as_raw_fd(), slice);
                    } else {
                        let _ = socket::wait_writable(self.stream.as_raw_fd(), Duration::from_millis(250));
                    }
                }
                Err(e) => {
                    self.mark_disconnected();
                    return Err(e);
                }
            }
        }
        Ok(sent)
    }

    /// Symmetric to [`send_buffer`](Self::send_buffer).
    pub fn recv_buffer(&self, buf: &mut [u8], sync: bool, timeout: Option<Duration>) -> IoOutcome {
        if self.is_disconnected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection already disconnected"));
        }

        if !sync {
            return match (&self.stream).read(buf) {
                Ok(0) => {
                    self.mark_disconnected();
                    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"))
                }
                Ok(n) => Ok(n),
                Err(e) if io_error::is_recoverable(&e) => Ok(0),
                Err(e) => {
                    self.mark_disconnected();
                    Err(e)
                }
            };
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut received = 0;
        while received < buf.len() {
            match (&self.stream).read(&mut buf[received..]) {
                Ok(0) => {
                    self.mark_disconnected();
                    if received == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
                    }
                    break;
                }
                Ok(n) => received += n,
                Err(e) if io_error::is_recoverable(&e) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            break;
                        }
                        let slice = deadline.saturating_duration_since(Instant::now()).min(Duration::from_millis(250));
                        let _ = socket::wait_readable(self.stream.as_raw_fd(), slice);
                    } else {
                        let _ = socket::wait_readable(self.stream.as_raw_fd(), Duration::from_millis(250));
                    }
                }
                Err(e) => {
                    self.mark_disconnected();
                    return Err(e);
                }
            }
        }
        Ok(received)
    }

    fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Idempotent graceful shutdown: shuts down both directions and marks
    /// the connection disconnected. Safe to call more than once.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl AsRawFd for TcpConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (TcpConnection::new(server).unwrap(), client)
    }

    #[test]
    fn sync_send_recv_round_trip() {
        let (conn, mut client) = pair();
        let n = conn.send_buffer(b"hello", true, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (conn, _client) = pair();
        conn.disconnect();
        conn.disconnect();
        assert!(conn.is_disconnected());
    }

    #[test]
    fn recv_after_peer_close_marks_disconnected() {
        let (conn, client) = pair();
        drop(client);

        let mut buf = [0u8; 16];
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match conn.recv_buffer(&mut buf, true, Some(Duration::from_millis(200))) {
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                _ if Instant::now() < deadline => continue,
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert!(conn.is_disconnected());
    }

    #[test]
    fn context_round_trips() {
        let (conn, _client) = pair();
        conn.set_context(Box::new(42u32));
        conn.with_context(|ctx| {
            assert_eq!(ctx.and_then(|c| c.downcast_ref::<u32>()), Some(&42));
        });
    }
}
