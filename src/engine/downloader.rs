//! Per-worker batch downloader.
//!
//! One batch moves through `Requesting -> Transferring -> Committing -> Done`,
//! or ends in `Failed` from any of them. Transient failures, malformed
//! payloads and chunks failing verification are retried within the batch's
//! attempt budget; once the budget is spent the batch takes the failure path
//! and yields failure outcomes. A 401 takes the failure path immediately and
//! aborts the worker.
//!
//! Files whose chunks were already in the store receive a success outcome,
//! so every file a batch references ends up in its outcome map.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::commit::WriteCollaborator;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::{Backoff, IsRetryable};
use crate::store::{ContentStore, Writers, close_all};
use crate::transport::{ChunkRequest, ChunkTransport};
use crate::types::{ChunkBatch, OutcomeMap, Signature};

/// Processing state of the batch currently held by a downloader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    /// Request in flight
    Requesting,
    /// Payload received, being split into staged chunks
    Transferring,
    /// Staged chunks being decrypted and persisted
    Committing,
    /// Outcomes produced
    Done,
    /// Batch abandoned
    Failed,
}

/// A batch that ended in an error the worker must stop on
///
/// `outcomes` holds the failure-path outcomes when the failure path ran, so
/// they can still be reported before the error is escalated.
#[derive(Debug)]
pub struct BatchAbort {
    /// Error to escalate
    pub error: Error,
    /// Failure outcomes for the batch, if produced
    pub outcomes: Option<OutcomeMap>,
}

impl From<Error> for BatchAbort {
    fn from(error: Error) -> Self {
        Self {
            error,
            outcomes: None,
        }
    }
}

/// Shared collaborators of every downloader in a run
#[derive(Clone)]
pub struct Collaborators {
    /// Fetches batch payloads
    pub transport: Arc<dyn ChunkTransport>,
    /// Splits payloads into deduplicated writers
    pub store: Arc<dyn ContentStore>,
    /// Decrypts and persists staged chunks
    pub writer: Arc<dyn WriteCollaborator>,
}

/// Fetches, retries and commits batches for one worker
pub struct BatchDownloader {
    worker: usize,
    collaborators: Collaborators,
    retry: RetryConfig,
    cancel: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
    killed: AtomicBool,
}

impl BatchDownloader {
    /// Downloader for worker `worker`; cancelling `cancel` interrupts it
    pub fn new(
        worker: usize,
        collaborators: Collaborators,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker,
            collaborators,
            retry,
            cancel,
            current: Mutex::new(None),
            killed: AtomicBool::new(false),
        }
    }

    /// Process one batch into its outcome map
    pub async fn download(&self, batch: &ChunkBatch) -> std::result::Result<OutcomeMap, BatchAbort> {
        let request = self.collaborators.transport.build_request(batch)?;
        let handle = self.cancel.child_token();
        *self.slot() = Some(handle.clone());

        let result = self.attempt(batch, &request, &handle).await;
        self.slot().take();
        result
    }

    async fn attempt(
        &self,
        batch: &ChunkBatch,
        request: &ChunkRequest,
        handle: &CancellationToken,
    ) -> std::result::Result<OutcomeMap, BatchAbort> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = Backoff::new(&self.retry);
        let mut attempts = 0u32;

        loop {
            if self.is_interrupted(handle) {
                self.transition(batch, BatchState::Failed);
                return Err(Error::Interrupted.into());
            }

            self.transition(batch, BatchState::Requesting);
            let error = match self.fetch_and_stage(batch, request, handle).await {
                Ok(writers) => match self.commit(batch, writers).await {
                    Ok(outcomes) => {
                        self.transition(batch, BatchState::Done);
                        return Ok(outcomes);
                    }
                    Err(e) if e.is_retryable() => e,
                    Err(e) => {
                        tracing::error!(
                            worker = self.worker,
                            batch = %batch.url,
                            error = %e,
                            "Commit failed"
                        );
                        self.transition(batch, BatchState::Failed);
                        return Err(self.abort(batch, e).await);
                    }
                },
                Err(e) => e,
            };

            if error.is_auth_rejected() {
                tracing::error!(
                    worker = self.worker,
                    batch = %batch.url,
                    error = %error,
                    "Authentication rejected, abandoning batch"
                );
                self.transition(batch, BatchState::Failed);
                return Err(self.abort(batch, error).await);
            }

            if !error.is_retryable() {
                self.transition(batch, BatchState::Failed);
                return Err(error.into());
            }

            attempts += 1;
            if attempts >= max_attempts {
                tracing::warn!(
                    worker = self.worker,
                    batch = %batch.url,
                    attempts,
                    error = %error,
                    "Batch failed after all attempts"
                );
                self.transition(batch, BatchState::Failed);
                return self.fail_path(batch).await.map_err(BatchAbort::from);
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                worker = self.worker,
                batch = %batch.url,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis(),
                error = %error,
                "Batch attempt failed, retrying"
            );
            tokio::select! {
                _ = handle.cancelled() => {
                    self.transition(batch, BatchState::Failed);
                    return Err(Error::Interrupted.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Abort the in-flight request, if any.
    ///
    /// Returns whether a request was aborted. Once killed, the downloader
    /// refuses further work; killing again is a no-op.
    pub fn kill(&self) -> bool {
        self.killed.store(true, Ordering::SeqCst);
        match self.slot().take() {
            Some(handle) => {
                handle.cancel();
                tracing::debug!(worker = self.worker, "Aborted in-flight request");
                true
            }
            None => false,
        }
    }

    /// Whether [`kill`](Self::kill) has been called
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn is_interrupted(&self, handle: &CancellationToken) -> bool {
        self.is_killed() || handle.is_cancelled() || self.slot().is_none()
    }

    async fn fetch_and_stage(
        &self,
        batch: &ChunkBatch,
        request: &ChunkRequest,
        handle: &CancellationToken,
    ) -> Result<Writers> {
        let payload = tokio::select! {
            biased;
            _ = handle.cancelled() => return Err(Error::Interrupted),
            response = self.collaborators.transport.execute(request) => response?,
        };

        self.transition(batch, BatchState::Transferring);
        self.stage(batch, payload).await
    }

    async fn stage(&self, batch: &ChunkBatch, payload: Bytes) -> Result<Writers> {
        let store = self.collaborators.store.clone();
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || store.put(&batch, &payload)).await?
    }

    /// Hand staged writers to the write collaborator, closing them whatever
    /// it returns
    async fn commit(&self, batch: &ChunkBatch, mut writers: Writers) -> Result<OutcomeMap> {
        self.transition(batch, BatchState::Committing);
        let staged: HashSet<Signature> = writers.keys().cloned().collect();
        let collaborator = self.collaborators.writer.clone();
        let outcomes = tokio::task::spawn_blocking(move || {
            let result = collaborator.write(&mut writers);
            close_all(writers);
            result
        })
        .await??;

        Ok(self.with_stored(batch, &staged, outcomes))
    }

    /// Failure outcomes for the batch's missing signatures
    async fn fail_path(&self, batch: &ChunkBatch) -> Result<OutcomeMap> {
        let store = self.collaborators.store.clone();
        let collaborator = self.collaborators.writer.clone();
        let owned = batch.clone();
        let (failed, outcomes) = tokio::task::spawn_blocking(move || -> Result<_> {
            let failed = store.fail(&owned)?;
            let outcomes = collaborator.fail(&failed);
            Ok((failed, outcomes))
        })
        .await??;

        Ok(self.with_stored(batch, &failed, outcomes))
    }

    /// Add success outcomes for files of signatures in `batch` outside
    /// `handled`, which the store already held
    fn with_stored(
        &self,
        batch: &ChunkBatch,
        handled: &HashSet<Signature>,
        mut outcomes: OutcomeMap,
    ) -> OutcomeMap {
        let stored: HashSet<Signature> = batch
            .signatures()
            .filter(|signature| !handled.contains(*signature))
            .cloned()
            .collect();
        if stored.is_empty() {
            return outcomes;
        }
        for (file, outcome) in self.collaborators.writer.stored(&stored) {
            outcomes.entry(file).or_insert(outcome);
        }
        outcomes
    }

    async fn abort(&self, batch: &ChunkBatch, error: Error) -> BatchAbort {
        match self.fail_path(batch).await {
            Ok(outcomes) => BatchAbort {
                error,
                outcomes: Some(outcomes),
            },
            Err(e) => {
                tracing::warn!(
                    worker = self.worker,
                    batch = %batch.url,
                    error = %e,
                    "Failure path failed, no outcomes reported"
                );
                BatchAbort::from(error)
            }
        }
    }

    fn transition(&self, batch: &ChunkBatch, state: BatchState) {
        tracing::debug!(
            worker = self.worker,
            batch = %batch.url,
            host = batch.host(),
            state = ?state,
            "Batch state"
        );
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BatchDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDownloader")
            .field("worker", &self.worker)
            .field("killed", &self.is_killed())
            .finish_non_exhaustive()
    }
}
