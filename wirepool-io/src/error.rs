//! Portable mapping from native socket errors to stable textual identifiers.
//!
//! The engine logs and branches on these identifiers instead of raw errno
//! values so that behavior (e.g. "is this an in-progress connect") reads the
//! same on every platform.

use std::io;

/// A stable, platform-independent name for a socket error.
///
/// Unknown errors fall back to `"other"`; callers that need the original
/// error should keep the `io::Error` alongside this name rather than trying
/// to recover it from the name.
pub fn portable_name(err: &io::Error) -> &'static str {
    use io::ErrorKind::*;

    match err.kind() {
        WouldBlock => "would_block",
        Interrupted => "interrupted",
        ConnectionRefused => "connection_refused",
        ConnectionReset => "connection_reset",
        ConnectionAborted => "connection_aborted",
        NotConnected => "not_connected",
        AddrInUse => "addr_in_use",
        AddrNotAvailable => "addr_not_available",
        BrokenPipe => "broken_pipe",
        TimedOut => "timed_out",
        InvalidInput => "invalid_input",
        PermissionDenied => "permission_denied",
        _ => match raw_errno(err) {
            Some(errno) if is_in_progress(errno) => "in_progress",
            _ => "other",
        },
    }
}

/// True for errors that represent "connect is still in flight", which on
/// POSIX is `EINPROGRESS` and on Windows is `WSAEWOULDBLOCK`.
pub fn is_connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || raw_errno(err).is_some_and(is_in_progress)
}

/// True for `recvfrom`/`recv`/`send` errors a listener or worker loop should
/// shrug off and keep iterating on, rather than tear down the socket.
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

fn raw_errno(err: &io::Error) -> Option<i32> {
    err.raw_os_error()
}

#[cfg(unix)]
fn is_in_progress(errno: i32) -> bool {
    errno == libc::EINPROGRESS
}

#[cfg(not(unix))]
fn is_in_progress(_errno: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_recoverable() {
        let e = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(is_recoverable(&e));
        assert_eq!(portable_name(&e), "would_block");
    }

    #[test]
    fn connection_reset_is_not_recoverable() {
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(!is_recoverable(&e));
        assert_eq!(portable_name(&e), "connection_reset");
    }
}
