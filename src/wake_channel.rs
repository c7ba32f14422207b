//! Cross-thread wake signal between the backend's notification thread and the
//! control thread.
//!
//! Only two booleans cross this boundary. Both are level-triggered: signalling
//! several times before the control thread looks coalesces into one
//! observation, and a signal raised while nobody waits stays set until taken.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Snapshot of the pending work flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingFlags {
    /// The backend wants `process_events` invoked.
    pub events_pending: bool,
    /// The loaded track played to its natural end.
    pub track_finished: bool,
}

impl PendingFlags {
    pub fn is_clear(&self) -> bool {
        !self.events_pending && !self.track_finished
    }
}

/// Two-flag mailbox guarded by one mutex and one condition variable.
#[derive(Debug, Default)]
pub struct WakeChannel {
    flags: Mutex<PendingFlags>,
    condvar: Condvar,
}

impl WakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    // The flags are plain booleans, so a panic while holding the lock can not
    // leave them half-written.
    fn lock(&self) -> MutexGuard<'_, PendingFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests a `process_events` pass. Callable from any thread, never blocks
    /// beyond the flag write.
    pub fn notify(&self) {
        let mut flags = self.lock();
        flags.events_pending = true;
        self.condvar.notify_one();
    }

    /// Reports that the loaded track finished playing.
    pub fn notify_track_finished(&self) {
        let mut flags = self.lock();
        flags.track_finished = true;
        self.condvar.notify_one();
    }

    /// Blocks the control thread until a flag is set or `timeout` elapses.
    ///
    /// With `None` the wait is unbounded. Returns immediately if a flag is
    /// already set. The return carries no information on purpose: a timeout
    /// racing a last-moment signal must be handled the same way as either, so
    /// callers re-read the flags with [`WakeChannel::take`].
    pub fn wait_until(&self, timeout: Option<Duration>) {
        let flags = self.lock();
        if !flags.is_clear() {
            return;
        }
        match timeout {
            None => {
                let _guard = self
                    .condvar
                    .wait(flags)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(timeout) if timeout.is_zero() => {}
            Some(timeout) => {
                let _guard = self
                    .condvar
                    .wait_timeout(flags, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Atomically reads and clears both flags.
    pub fn take(&self) -> PendingFlags {
        std::mem::take(&mut *self.lock())
    }

    /// Wakes the waiter without setting any flag, like an OS-level spurious
    /// wakeup would.
    #[cfg(test)]
    pub(crate) fn wake_spuriously(&self) {
        let _flags = self.lock();
        self.condvar.notify_all();
    }
}
