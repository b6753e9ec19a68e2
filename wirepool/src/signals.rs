//! POSIX signal handling (spec.md §6).
//!
//! The teacher hands this job to `tokio::signal`'s async driver; this
//! engine has no async runtime (spec.md §9's "preserve the threaded/select
//! shape" guidance), so delivery is realized the old way: a process-wide
//! `libc::sigaction` handler that only does async-signal-safe work (store a
//! flag / an index into an atomic), polled by the lifecycle controller's
//! main loop once per second-long slice. `examples/troubadour-hell-kixdns`'s
//! direct `libc` dependency is this engine's pack precedent for doing
//! signal work without an async runtime.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tracing::{error, warn};

static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);
static USER_SIGNAL: AtomicI32 = AtomicI32::new(0);
static FATAL_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signals whose default action would kill the process but that this
/// engine treats as informational noise: logged if convenient and
/// otherwise ignored (spec.md §6).
#[cfg(unix)]
const IGNORED: &[libc::c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGPIPE,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGXCPU,
    libc::SIGCHLD,
    libc::SIGALRM,
    libc::SIGVTALRM,
    libc::SIGIO,
];

/// Signals that indicate process corruption: logged then the default
/// handler is restored so the process still core-dumps/terminates, rather
/// than looping forever inside a broken handler.
#[cfg(unix)]
const FATAL: &[libc::c_int] = &[libc::SIGILL, libc::SIGBUS, libc::SIGFPE, libc::SIGSEGV, libc::SIGSYS];

#[cfg(target_os = "linux")]
const FATAL_LINUX_ONLY: &[libc::c_int] = &[libc::SIGSTKFLT, libc::SIGPROF];

/// Signals dispatched to the business via `user_signal()` rather than
/// handled internally.
#[cfg(unix)]
const USER_DISPATCHED: &[libc::c_int] = &[libc::SIGUSR1, libc::SIGUSR2];

/// Installs handlers for the full table in spec.md §6. Safe to call once
/// at startup; not safe to call from multiple threads concurrently (it
/// isn't — the lifecycle controller calls it once during `initialize`).
#[cfg(unix)]
pub fn install() {
    for &sig in IGNORED {
        install_one(sig, handle_ignored as usize);
    }
    for &sig in FATAL {
        install_one(sig, handle_fatal as usize);
    }
    #[cfg(target_os = "linux")]
    for &sig in FATAL_LINUX_ONLY {
        install_one(sig, handle_fatal as usize);
    }
    for &sig in USER_DISPATCHED {
        install_one(sig, handle_user as usize);
    }
    install_one(libc::SIGTERM, handle_terminate as usize);

    // SIGCHLD and SIGPWR are only meaningful on platforms that deliver
    // them; SIGPWR doesn't exist in libc's portable surface on every
    // target, so it's installed opportunistically on linux only.
    #[cfg(target_os = "linux")]
    install_one(libc::SIGPWR, handle_ignored as usize);
}

#[cfg(unix)]
fn install_one(sig: libc::c_int, handler: usize) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            warn!(signal = sig, error = %std::io::Error::last_os_error(), "failed to install signal handler");
        }
    }
}

extern "C" fn handle_ignored(_sig: libc::c_int) {}

extern "C" fn handle_terminate(_sig: libc::c_int) {
    TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_user(sig: libc::c_int) {
    USER_SIGNAL.store(sig, Ordering::SeqCst);
}

extern "C" fn handle_fatal(sig: libc::c_int) {
    FATAL_SIGNAL.store(sig, Ordering::SeqCst);
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(sig, &action, std::ptr::null_mut());
        libc::raise(sig);
    }
}

#[cfg(not(unix))]
pub fn install() {}

/// `true` once `SIGTERM` has been received; the lifecycle controller polls
/// this every 1-second main-loop slice (spec.md §6's "normal exit" signal,
/// re-expressed as a polled flag instead of `longjmp`).
pub fn terminate_requested() -> bool {
    TERMINATE_REQUESTED.load(Ordering::SeqCst)
}

/// Drains and returns the last user-dispatched signal (`SIGUSR1`/`SIGUSR2`)
/// seen since the previous call, or `None`.
pub fn take_user_signal() -> Option<i32> {
    match USER_SIGNAL.swap(0, Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// Checked by the lifecycle controller's main loop; logs and returns the
/// fatal signal number once, so the controller can run an orderly
/// `finalize()` before the process actually dies from the restored default
/// handler raising it again.
pub fn take_fatal_signal() -> Option<i32> {
    match FATAL_SIGNAL.swap(0, Ordering::SeqCst) {
        0 => None,
        sig => {
            error!(signal = sig, "fatal signal received");
            Some(sig)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_flag_round_trips() {
        assert!(!terminate_requested());
        handle_terminate(0);
        assert!(terminate_requested());
        TERMINATE_REQUESTED.store(false, Ordering::SeqCst);
    }

    #[test]
    fn user_signal_drains_once() {
        handle_user(libc::SIGUSR1);
        assert_eq!(take_user_signal(), Some(libc::SIGUSR1));
        assert_eq!(take_user_signal(), None);
    }
}
