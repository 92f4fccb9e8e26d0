//! Concurrent download engine.
//!
//! An [`Engine`] run partitions a fixed list of batches across a pool of
//! workers:
//!
//! - [`WorkQueue`] hands each batch to exactly one worker
//! - [`Runner`] drives a [`BatchDownloader`] until the queue is depleted
//! - [`FatalCell`] keeps the first unrecoverable error of the run
//!
//! Workers are launched with a stagger delay, the run is bounded by a
//! timeout, and every worker is killed before [`Engine::execute`] returns.

mod downloader;
mod fatal;
mod queue;
mod runner;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::commit::WriteCollaborator;
use crate::config::{Config, EngineConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::outcome::OutcomeSink;
use crate::store::ContentStore;
use crate::transport::ChunkTransport;
use crate::types::ChunkBatch;

pub use downloader::{BatchAbort, BatchDownloader, BatchState, Collaborators};
pub use fatal::FatalCell;
pub use queue::WorkQueue;
pub use runner::Runner;

/// Worker pool over a fixed list of batches
pub struct Engine {
    config: EngineConfig,
    retry: RetryConfig,
    collaborators: Collaborators,
    cancel: CancellationToken,
}

impl Engine {
    /// Engine using the given collaborators
    pub fn new(
        config: EngineConfig,
        retry: RetryConfig,
        transport: Arc<dyn ChunkTransport>,
        store: Arc<dyn ContentStore>,
        writer: Arc<dyn WriteCollaborator>,
    ) -> Self {
        Self {
            config,
            retry,
            collaborators: Collaborators {
                transport,
                store,
                writer,
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Engine configured from the engine and retry sections of `config`
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn ChunkTransport>,
        store: Arc<dyn ContentStore>,
        writer: Arc<dyn WriteCollaborator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.engine.clone(),
            config.retry.clone(),
            transport,
            store,
            writer,
        ))
    }

    /// Token whose cancellation interrupts every worker of every run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download every batch, reporting each batch's outcomes to `sink`.
    ///
    /// Returns the first fatal error recorded by a worker, or
    /// [`Error::Timeout`] (carrying that error, if any) when the workers do
    /// not finish within the configured timeout.
    pub async fn execute(
        &self,
        batches: impl IntoIterator<Item = ChunkBatch>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<()> {
        let queue = Arc::new(WorkQueue::new(batches));
        let fatal = Arc::new(FatalCell::new());
        let runners = self.runners(&queue, &fatal, &sink);
        self.drive(&runners, &queue, &fatal).await
    }

    fn runners(
        &self,
        queue: &Arc<WorkQueue<ChunkBatch>>,
        fatal: &Arc<FatalCell>,
        sink: &Arc<dyn OutcomeSink>,
    ) -> Vec<Arc<Runner>> {
        (0..self.config.threads.max(1))
            .map(|id| {
                let downloader = BatchDownloader::new(
                    id,
                    self.collaborators.clone(),
                    self.retry.clone(),
                    self.cancel.child_token(),
                );
                Arc::new(Runner::new(
                    id,
                    queue.clone(),
                    fatal.clone(),
                    sink.clone(),
                    downloader,
                ))
            })
            .collect()
    }

    /// Run `runners` to completion or timeout, then kill all of them
    async fn drive(
        &self,
        runners: &[Arc<Runner>],
        queue: &WorkQueue<ChunkBatch>,
        fatal: &FatalCell,
    ) -> Result<()> {
        tracing::info!(
            batches = queue.remaining(),
            threads = runners.len(),
            timeout_secs = self.config.timeout.as_secs(),
            "Starting download run"
        );

        let started = Instant::now();
        let mut pool = JoinSet::new();
        self.launch(runners, &mut pool).await;

        let mut processed = 0;
        let finished = tokio::time::timeout(self.config.timeout, async {
            while let Some(joined) = pool.join_next().await {
                processed += record_join(joined, fatal);
            }
        })
        .await;

        pool.abort_all();
        for runner in runners {
            runner.kill();
        }
        while let Some(joined) = pool.join_next().await {
            processed += record_join(joined, fatal);
        }

        let error = fatal.take();
        if finished.is_err() {
            let elapsed = started.elapsed();
            tracing::error!(
                elapsed_secs = elapsed.as_secs(),
                remaining = queue.remaining(),
                "Download run timed out"
            );
            return Err(Error::Timeout {
                elapsed,
                fatal: error.map(Box::new),
            });
        }

        match error {
            Some(error) => {
                tracing::error!(error = %error, processed, "Download run failed");
                Err(error)
            }
            None => {
                tracing::info!(processed, elapsed_ms = started.elapsed().as_millis(), "Download run complete");
                Ok(())
            }
        }
    }

    async fn launch(&self, runners: &[Arc<Runner>], pool: &mut JoinSet<usize>) {
        for (index, runner) in runners.iter().enumerate() {
            if index > 0 && !self.config.stagger_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!(launched = index, "Cancelled during startup");
                        return;
                    }
                    _ = tokio::time::sleep(self.config.stagger_delay) => {}
                }
            }
            let runner = runner.clone();
            pool.spawn(async move { runner.run().await });
        }
    }
}

/// Count a finished worker's batches, recording a panic as fatal
fn record_join(joined: std::result::Result<usize, JoinError>, fatal: &FatalCell) -> usize {
    match joined {
        Ok(processed) => processed,
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Worker panicked");
            fatal.try_set(Error::from(e));
            0
        }
        Err(_) => 0,
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
