//! Helpers safe to call in a forked child before `execve`.
//!
//! Nothing in here allocates, locks or touches Rust's buffered standard streams.

use nix::libc;
use nix::sys::signal::{SigHandler, Signal, signal};

/// Write raw bytes to file descriptor 2, ignoring short writes and errors.
pub(crate) fn write_stderr(bytes: &[u8]) {
    // SAFETY: `bytes` is a valid buffer for `bytes.len()` bytes.
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

/// Terminate the child immediately, skipping atexit handlers and stdio flushing
/// that belong to the parent.
pub(crate) fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

/// Undo dispositions inherited from the Rust runtime that would otherwise survive
/// `execve`.
pub(crate) fn restore_default_signals() {
    // SAFETY: installing SIG_DFL does not run any handler code.
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
    }
}
