//! Outcome reporting.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;

use crate::types::{Outcome, OutcomeMap, OutputFile};

/// Receives the outcome map of every processed batch
///
/// Called concurrently by every worker of an engine run.
pub trait OutcomeSink: Send + Sync {
    /// Accept the outcomes of one batch
    fn accept(&self, outcomes: OutcomeMap);
}

impl OutcomeSink for UnboundedSender<OutcomeMap> {
    fn accept(&self, outcomes: OutcomeMap) {
        if self.send(outcomes).is_err() {
            tracing::debug!("Outcome receiver dropped, discarding batch outcomes");
        }
    }
}

/// Merges per-batch outcomes into one result per output file
///
/// A file is successful only if every batch that touched it succeeded:
/// once recorded, a [`Outcome::Failure`] is never replaced.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    files: Mutex<HashMap<OutputFile, Outcome>>,
}

/// Counts reported by [`OutcomeTally::summary`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TallySummary {
    /// Files whose every batch succeeded
    pub succeeded: usize,
    /// Files with at least one failed batch
    pub failed: usize,
}

impl OutcomeTally {
    /// Create an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Current outcome of every file seen so far
    pub fn snapshot(&self) -> HashMap<OutputFile, Outcome> {
        self.lock().clone()
    }

    /// Outcome of one file, if any batch reported it
    pub fn get(&self, file: &OutputFile) -> Option<Outcome> {
        self.lock().get(file).cloned()
    }

    /// Success and failure counts
    pub fn summary(&self) -> TallySummary {
        let files = self.lock();
        let failed = files.values().filter(|o| !o.is_success()).count();
        TallySummary {
            succeeded: files.len() - failed,
            failed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OutputFile, Outcome>> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl OutcomeSink for OutcomeTally {
    fn accept(&self, outcomes: OutcomeMap) {
        let mut files = self.lock();
        for (file, outcome) in outcomes {
            match files.get(&file) {
                Some(Outcome::Failure(_)) => {}
                _ => {
                    files.insert(file, outcome);
                }
            }
        }
    }
}
