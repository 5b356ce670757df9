//! Exclusive advisory lock over the agent slot.
//!
//! The lock is an `flock(2)` on a fixed, empty file. It is never waited for:
//! a contended lock means another supervisor is alive, and the caller must
//! give up immediately. The only exception is a few retries spanning
//! [`CONTENTION_WINDOW`], which outlast a momentary [`LockManager::is_held`]
//! probe from `keeper status`. The OS drops the lock when the holder dies,
//! so a crashed supervisor never wedges the slot.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, warn};

/// Errors from [`LockManager::acquire`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another agent runner is already holding the lock at {}", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("failed to lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How long a contended [`LockManager::acquire`] keeps retrying before it
/// reports [`LockError::AlreadyRunning`].
pub const CONTENTION_WINDOW: Duration = Duration::from_millis(50);

const CONTENTION_RETRIES: u32 = 5;

/// Acquires the lock on one well-known path.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without blocking.
    ///
    /// The file is created if absent but never truncated. Contention that
    /// lasts past [`CONTENTION_WINDOW`] yields [`LockError::AlreadyRunning`].
    pub fn acquire(&self) -> Result<LockHandle, LockError> {
        let pause = CONTENTION_WINDOW / CONTENTION_RETRIES;
        let mut attempt = 0;
        loop {
            match self.try_acquire() {
                Err(LockError::AlreadyRunning { .. }) if attempt < CONTENTION_RETRIES => {
                    attempt += 1;
                    std::thread::sleep(pause);
                }
                result => return result,
            }
        }
    }

    fn try_acquire(&self) -> Result<LockHandle, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Io {
                path: self.path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %self.path.display(), "lock acquired");
                Ok(LockHandle {
                    path: self.path.clone(),
                    file: Some(file),
                })
            }
            Err(e) if is_contended(&e) => Err(LockError::AlreadyRunning {
                path: self.path.clone(),
            }),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Report whether some other handle currently holds the lock.
    ///
    /// Does not create the lock file: a missing file means nobody holds it.
    /// The probe holds the real lock for an instant and never retries; a
    /// concurrent [`acquire`](Self::acquire) waits it out.
    pub fn is_held(&self) -> Result<bool, LockError> {
        if !self.path.exists() {
            return Ok(false);
        }
        match self.try_acquire() {
            Ok(_probe) => Ok(false),
            Err(LockError::AlreadyRunning { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// A held lock. Released by [`LockHandle::release`] or on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlock and close. Calling this again is a no-op.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            // Closing the descriptor below drops the lock anyway.
            warn!(path = %self.path.display(), error = %e, "explicit unlock failed");
        }
        debug!(path = %self.path.display(), "lock released");
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}
