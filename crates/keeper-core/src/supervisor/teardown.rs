//! The one cleanup routine every supervisor exit goes through.

use tracing::{debug, warn};

use crate::lock::LockHandle;
use crate::reclaim::InstanceDescriptor;

/// Owns the lock for the duration of a run and gives it back exactly once.
///
/// [`Teardown::run`] is called at the end of a normal run; `Drop` calls it
/// on every other path (early `?` return, panic unwind). Whichever comes
/// first does the work and the second is a no-op.
#[derive(Debug)]
pub struct Teardown {
    lock: Option<LockHandle>,
    descriptor: InstanceDescriptor,
    done: bool,
}

impl Teardown {
    pub fn new(lock: LockHandle, descriptor: InstanceDescriptor) -> Self {
        Self {
            lock: Some(lock),
            descriptor,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Delete the descriptor, then release the lock. Returns `false` if
    /// teardown had already run.
    pub fn run(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;

        match self.descriptor.remove() {
            Ok(true) => debug!(path = %self.descriptor.path().display(), "instance descriptor removed"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not remove instance descriptor"),
        }
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        true
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.done {
            warn!("supervisor exiting abnormally, running teardown");
            self.run();
        }
    }
}
