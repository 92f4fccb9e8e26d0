//! First-error-wins cell shared by the workers of one run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Error;

/// Holds at most one error; the first writer wins
#[derive(Debug, Default)]
pub struct FatalCell {
    set: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl FatalCell {
    /// Empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless an error was already recorded.
    ///
    /// Returns whether `error` was retained.
    pub fn try_set(&self, error: Error) -> bool {
        let mut slot = self.lock();
        if self
            .set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *slot = Some(error);
            true
        } else {
            tracing::debug!(error = %error, "Fatal error already recorded, dropping");
            false
        }
    }

    /// Whether an error has been recorded. Never blocks.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Remove the recorded error. The cell stays set.
    pub fn take(&self) -> Option<Error> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Error>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
