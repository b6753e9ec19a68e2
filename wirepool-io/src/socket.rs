//! Non-blocking TCP/UDP socket primitives.
//!
//! Everything here is synchronous: callers poll readiness with
//! [`wait_readable`]/[`wait_writable`] in bounded slices and retry, which is
//! the shape the engine's listener and worker loops are built around (see
//! `wirepool::udp::listener` and `wirepool::tcp::listener`).

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream, UdpSocket as StdUdpSocket},
    os::fd::{AsRawFd, RawFd},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error;

/// Binds a non-blocking UDP socket, matching the `SO_REUSEADDR` posture the
/// engine's listener pool needs when several listener threads could in
/// principle share a port (spec.md's `udpListenerThreadCount`).
pub fn bind_udp(addr: SocketAddr) -> io::Result<StdUdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    suppress_icmp_port_unreachable(&socket);
    Ok(socket.into())
}

/// Binds a non-blocking TCP listener with the given backlog.
pub fn bind_tcp(addr: SocketAddr, backlog: u32) -> io::Result<StdTcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog as i32)?;
    Ok(socket.into())
}

/// Issues a non-blocking `connect()` and polls it to completion against a
/// deadline, distinguishing `CONNECTING`/`CONNECTED`/`FAILED` as spec.md
/// §4.1 requires.
pub fn connect_async(addr: SocketAddr, deadline: Instant) -> io::Result<StdTcpStream> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => return Ok(socket.into()),
        Err(e) if error::is_connect_in_progress(&e) => {}
        Err(e) => return Err(e),
    }

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect deadline exceeded"));
        }
        if wait_writable(socket.as_raw_fd(), remaining.min(Duration::from_millis(250)))? {
            return match socket.take_error()? {
                Some(e) => Err(e),
                None => Ok(socket.into()),
            };
        }
    }
}

/// Blocks up to `timeout` for `fd` to become readable. Returns `Ok(true)` if
/// it became ready, `Ok(false)` on timeout.
#[cfg(unix)]
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    wait(fd, libc::POLLIN, timeout)
}

/// Blocks up to `timeout` for `fd` to become writable.
#[cfg(unix)]
pub fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    wait(fd, libc::POLLOUT, timeout)
}

/// Polls many file descriptors at once for readability, returning the
/// indices (into `fds`) that are ready. Backs the TCP event loop's "one
/// `select` call covers every connection it owns" shape (spec.md §4.6).
#[cfg(unix)]
pub fn poll_many_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<usize>> {
    if fds.is_empty() {
        std::thread::sleep(timeout.min(Duration::from_millis(50)));
        return Ok(Vec::new());
    }

    let mut pfds: Vec<libc::pollfd> = fds.iter().map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 }).collect();
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: `pfds` is a live Vec of the correct length, nfds matches it.
    let rc = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, millis) };
    match rc {
        -1 => {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                Ok(Vec::new())
            } else {
                Err(e)
            }
        }
        _ => Ok(pfds
            .iter()
            .enumerate()
            .filter(|(_, pfd)| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|(i, _)| i)
            .collect()),
    }
}

#[cfg(unix)]
fn wait(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd { fd, events, revents: 0 };
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: `pfd` is a single stack-local pollfd, nfds matches the slice len.
    let rc = unsafe { libc::poll(&mut pfd as *mut _, 1, millis) };
    match rc {
        -1 => {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(e)
            }
        }
        0 => Ok(false),
        _ => Ok(pfd.revents & events != 0 || pfd.revents & libc::POLLHUP != 0 || pfd.revents & libc::POLLERR != 0),
    }
}

/// Best-effort bump of the calling thread's scheduling priority, used by
/// UDP listener threads to shrink the window in which a burst of datagrams
/// can overflow the kernel receive buffer before anyone calls `recvfrom`
/// (spec.md §4.2). Failure is logged and otherwise ignored: losing the
/// priority boost degrades packet-loss behavior under load, it does not
/// break correctness.
#[cfg(target_os = "linux")]
pub fn raise_thread_priority() {
    // SAFETY: gettid() takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) as libc::c_int };
    // SAFETY: setpriority with a valid PRIO_PROCESS target and in-range value.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, -5) };
    if rc != 0 {
        tracing::debug!(error = %io::Error::last_os_error(), "failed to raise udp listener thread priority");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn raise_thread_priority() {}

/// On Windows a UDP socket that received an ICMP port-unreachable makes the
/// next `recvfrom` fail with `WSAECONNRESET` instead of simply timing out,
/// which would otherwise kill a listener thread that is doing nothing wrong.
/// The native fix is `SIO_UDP_CONNRESET`; pulling in a Windows FFI crate for
/// one ioctl is out of proportion for this engine's POSIX-first scope, so the
/// Windows listener loop instead treats `ConnectionReset` on a UDP socket as
/// recoverable (see `wirepool::udp::listener`) and this hook is a no-op.
#[cfg(windows)]
fn suppress_icmp_port_unreachable(_socket: &Socket) {}

#[cfg(not(windows))]
fn suppress_icmp_port_unreachable(_socket: &Socket) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn bind_udp_picks_ephemeral_port() {
        let sock = bind_udp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        assert!(sock.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn bind_tcp_listens() {
        let listener = bind_tcp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0), 128).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn wait_readable_times_out() {
        let sock = bind_udp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let ready = wait_readable(sock.as_raw_fd(), Duration::from_millis(20)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn poll_many_readable_finds_the_ready_one() {
        let quiet = bind_udp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let noisy = bind_udp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let sender = std::net::UdpSocket::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        sender.send_to(b"hi", noisy.local_addr().unwrap()).unwrap();

        let fds = [quiet.as_raw_fd(), noisy.as_raw_fd()];
        let ready = poll_many_readable(&fds, Duration::from_millis(500)).unwrap();
        assert_eq!(ready, vec![1]);
    }
}
