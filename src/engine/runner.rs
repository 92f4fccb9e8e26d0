//! Worker loop driving one downloader against the shared queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::downloader::{BatchAbort, BatchDownloader};
use super::fatal::FatalCell;
use super::queue::WorkQueue;
use crate::outcome::OutcomeSink;
use crate::types::ChunkBatch;

/// One worker of an engine run
pub struct Runner {
    id: usize,
    queue: Arc<WorkQueue<ChunkBatch>>,
    fatal: Arc<FatalCell>,
    sink: Arc<dyn OutcomeSink>,
    downloader: BatchDownloader,
    alive: AtomicBool,
}

impl Runner {
    /// Worker `id` pulling from `queue` and escalating into `fatal`
    pub fn new(
        id: usize,
        queue: Arc<WorkQueue<ChunkBatch>>,
        fatal: Arc<FatalCell>,
        sink: Arc<dyn OutcomeSink>,
        downloader: BatchDownloader,
    ) -> Self {
        Self {
            id,
            queue,
            fatal,
            sink,
            downloader,
            alive: AtomicBool::new(true),
        }
    }

    /// Process batches until the queue is depleted, a fatal error is
    /// recorded, or the worker is killed. Returns the number of batches
    /// whose outcomes were reported.
    pub async fn run(&self) -> usize {
        let mut processed = 0;

        while self.is_alive() {
            if self.fatal.is_set() {
                tracing::debug!(worker = self.id, "Fatal error recorded, stopping");
                break;
            }
            let Some(batch) = self.queue.next_item() else {
                tracing::debug!(worker = self.id, "Work queue depleted");
                break;
            };

            match self.downloader.download(&batch).await {
                Ok(outcomes) => {
                    self.sink.accept(outcomes);
                    processed += 1;
                }
                Err(BatchAbort { error, outcomes }) => {
                    if let Some(outcomes) = outcomes {
                        self.sink.accept(outcomes);
                        processed += 1;
                    }
                    tracing::error!(worker = self.id, batch = %batch.url, error = %error, "Worker stopping on fatal error");
                    self.fatal.try_set(error);
                    break;
                }
            }
        }

        tracing::debug!(worker = self.id, processed, "Worker finished");
        processed
    }

    /// Stop the loop and abort the in-flight request.
    ///
    /// Returns `false` if the worker was already killed.
    pub fn kill(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.downloader.kill();
        was_alive
    }

    /// Whether the worker has not been killed
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Worker index
    pub fn id(&self) -> usize {
        self.id
    }
}
