//! Thin wrappers over `kill(2)` for processes we only know by PID.

use std::io;

/// Signals keeper sends to agent processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM: ask the process to exit.
    Terminate,
    /// SIGKILL: unconditional.
    Kill,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => f.write_str("SIGTERM"),
            Signal::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Convert a PID to the signed form `kill(2)` takes.
///
/// 0 and anything above `i32::MAX` are rejected: `kill(0, ..)` and negative
/// PIDs address whole process groups.
fn raw_pid(pid: u32) -> io::Result<i32> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{pid} is not a valid process id"),
        )),
    }
}

/// Send `signal` to `pid`.
///
/// The raw OS error is preserved, so callers can tell `ESRCH` (no such
/// process) from `EPERM` (not ours to signal).
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw = raw_pid(pid)?;
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; raw is a positive pid.
    let ret = unsafe { libc::kill(raw, signo) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(pid: u32, _signal: Signal) -> io::Result<()> {
    raw_pid(pid)?;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signalling processes by pid requires a unix platform",
    ))
}

/// Whether `pid` names a live process.
///
/// A process we may not signal (`EPERM`) still exists and counts as alive.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> io::Result<bool> {
    let raw = raw_pid(pid)?;
    // SAFETY: signal 0 performs the existence and permission checks only.
    let ret = unsafe { libc::kill(raw, 0) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Ok(true),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> io::Result<bool> {
    raw_pid(pid)?;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "probing processes by pid requires a unix platform",
    ))
}

/// `true` when `err` means the target process does not exist.
#[cfg(unix)]
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// `true` when `err` means we lack permission to signal the target.
pub fn is_permission_denied(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
}
