//! Instance descriptor (`.agent.pid`) and stale-instance reclamation.
//!
//! The descriptor records the *agent's* PID, not the supervisor's. A
//! supervisor that crashed leaves it behind; the next run force-kills
//! whatever it names and deletes it before spawning a fresh agent.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::process::{self, Signal};

/// Errors reading or writing the descriptor file.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} instance descriptor {}: {source}", path.display())]
pub struct DescriptorError {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
}

/// What the descriptor file contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorRecord {
    Pid(u32),
    /// Content that is not a positive PID, trimmed.
    Invalid(String),
}

/// Handle to the descriptor file at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    path: PathBuf,
}

impl InstanceDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded PID. `Ok(None)` when there is no descriptor.
    pub fn read(&self) -> Result<Option<DescriptorRecord>, DescriptorError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.error("read", source)),
        };
        let trimmed = contents.trim();
        let record = match trimmed.parse::<u32>() {
            Ok(pid) if pid > 0 => DescriptorRecord::Pid(pid),
            _ => DescriptorRecord::Invalid(trimmed.to_string()),
        };
        Ok(Some(record))
    }

    /// Record `pid`, replacing any previous content.
    ///
    /// Written to a sibling temp file and renamed into place so a reader
    /// never observes a partial PID.
    pub fn write(&self, pid: u32) -> Result<(), DescriptorError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, pid.to_string()).map_err(|e| self.error("write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            self.error("write", e)
        })
    }

    /// Delete the descriptor. Returns whether a file was actually removed;
    /// a missing file is not an error.
    pub fn remove(&self) -> Result<bool, DescriptorError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.error("remove", source)),
        }
    }

    fn error(&self, action: &'static str, source: io::Error) -> DescriptorError {
        DescriptorError {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

/// Result of [`reclaim`]. Startup proceeds after every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// No descriptor on disk.
    NoDescriptor,
    /// The descriptor did not hold a usable PID.
    Invalid { content: String },
    /// The descriptor could not be read at all.
    Unreadable { error: String },
    /// The recorded process was sent SIGKILL.
    Killed { pid: u32 },
    /// The recorded process no longer exists.
    AlreadyGone { pid: u32 },
    /// The recorded process exists but is not ours to signal.
    PermissionDenied { pid: u32 },
    /// The descriptor named the current process; left alone.
    SelfReference { pid: u32 },
    /// `kill(2)` failed for another reason.
    Failed { pid: u32, error: String },
}

/// Kill whatever a previous run left in the descriptor, then delete it.
///
/// Never fails: every problem is logged and startup continues. The
/// descriptor is removed whatever the outcome, so a later run does not act
/// on the same stale PID twice.
pub fn reclaim(descriptor: &InstanceDescriptor) -> ReclaimOutcome {
    let outcome = match descriptor.read() {
        Ok(None) => return ReclaimOutcome::NoDescriptor,
        Ok(Some(DescriptorRecord::Invalid(content))) => ReclaimOutcome::Invalid { content },
        Ok(Some(DescriptorRecord::Pid(pid))) => kill_stale(pid),
        Err(e) => ReclaimOutcome::Unreadable {
            error: e.to_string(),
        },
    };

    if let Err(e) = descriptor.remove() {
        warn!(error = %e, "could not remove stale instance descriptor");
    }

    log_outcome(&outcome);
    outcome
}

fn kill_stale(pid: u32) -> ReclaimOutcome {
    if pid == std::process::id() {
        return ReclaimOutcome::SelfReference { pid };
    }
    match process::send_signal(pid, Signal::Kill) {
        Ok(()) => ReclaimOutcome::Killed { pid },
        Err(e) => classify_kill_error(pid, &e),
    }
}

fn classify_kill_error(pid: u32, err: &io::Error) -> ReclaimOutcome {
    if process::is_no_such_process(err) {
        ReclaimOutcome::AlreadyGone { pid }
    } else if process::is_permission_denied(err) {
        ReclaimOutcome::PermissionDenied { pid }
    } else if err.kind() == io::ErrorKind::InvalidInput {
        ReclaimOutcome::Invalid {
            content: pid.to_string(),
        }
    } else {
        ReclaimOutcome::Failed {
            pid,
            error: err.to_string(),
        }
    }
}

fn log_outcome(outcome: &ReclaimOutcome) {
    match outcome {
        ReclaimOutcome::NoDescriptor => {}
        ReclaimOutcome::Killed { pid } => info!(pid, "killed existing agent"),
        ReclaimOutcome::AlreadyGone { pid } => {
            info!(pid, "stale agent from a previous run already exited")
        }
        ReclaimOutcome::Invalid { content } => {
            info!(content = %content, "ignoring instance descriptor without a valid pid")
        }
        ReclaimOutcome::Unreadable { error } => {
            warn!(error = %error, "could not read instance descriptor")
        }
        ReclaimOutcome::PermissionDenied { pid } => warn!(pid, "could not kill stale agent"),
        ReclaimOutcome::SelfReference { pid } => {
            warn!(pid, "instance descriptor names this supervisor, not killing it")
        }
        ReclaimOutcome::Failed { pid, error } => {
            warn!(pid, error = %error, "failed to kill stale agent")
        }
    }
}
