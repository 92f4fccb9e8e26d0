//! # chunk-dl
//!
//! Concurrent retrieval of sharded, encrypted backup chunks into a local
//! content-addressed store.
//!
//! ## Design Philosophy
//!
//! chunk-dl is designed to be:
//! - **Fail-fast on credentials** - an HTTP 401 stops the whole run, nothing
//!   after it can succeed
//! - **Forgiving on transport** - flaky hosts are retried per batch and turned
//!   into per-file failure outcomes, never into a failed run
//! - **Library-first** - transport, store and write side are traits, with
//!   reqwest and on-disk reference implementations
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chunk_dl::{
//!     ChunkBatch, ChunkCommitter, Config, DiskChunkStore, Engine, HttpChunkTransport, KeyChain,
//!     Manifest, OutcomeTally,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let batches: Vec<ChunkBatch> = serde_json::from_str(&std::fs::read_to_string("batches.json")?)?;
//!
//!     let committer = ChunkCommitter::new(KeyChain::new([0u8; 32]), Manifest::from_batches(&batches));
//!     let engine = Engine::from_config(
//!         &config,
//!         Arc::new(HttpChunkTransport::new(&config.transport)?),
//!         Arc::new(DiskChunkStore::open("/var/lib/chunk-dl")?),
//!         Arc::new(committer),
//!     )?;
//!
//!     let tally = Arc::new(OutcomeTally::new());
//!     chunk_dl::execute_with_shutdown(&engine, batches, tally.clone()).await?;
//!     println!("{:?}", tally.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use std::sync::Arc;

/// Write side: decrypt staged chunks and produce outcomes
pub mod commit;
/// Configuration types
pub mod config;
/// Key-recovery primitives and chunk cipher
pub mod crypto;
/// Concurrent download engine
pub mod engine;
/// Error types
pub mod error;
/// Outcome sinks
pub mod outcome;
/// Sequential retry pipe
pub mod pipe;
/// Retry logic with exponential backoff
pub mod retry;
/// Content-addressed chunk store
pub mod store;
/// HTTP chunk transport
pub mod transport;
/// Core data model
pub mod types;

// Re-export commonly used types
pub use commit::{ChunkCommitter, WriteCollaborator};
pub use config::{Config, EngineConfig, PipeConfig, RetryConfig, TransportConfig};
pub use crypto::KeyChain;
pub use engine::{Engine, FatalCell, WorkQueue};
pub use error::{CryptoError, Error, ErrorClass, Result};
pub use outcome::{OutcomeSink, OutcomeTally};
pub use pipe::SequentialPipe;
pub use store::{ContentStore, DataWriter, DiskChunkStore};
pub use transport::{ChunkTransport, HttpChunkTransport};
pub use types::{ChunkBatch, ChunkRef, Manifest, Outcome, OutcomeMap, OutputFile, Signature};

/// Run `engine` over `batches`, cancelling the run on a termination signal.
///
/// - **Unix:** SIGTERM or SIGINT, whichever handlers could be registered
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`
///
/// A signal interrupts every worker; the run then returns [`Error::Interrupted`].
/// If no handler can be registered the run proceeds without signal handling.
pub async fn execute_with_shutdown(
    engine: &Engine,
    batches: impl IntoIterator<Item = ChunkBatch>,
    sink: Arc<dyn OutcomeSink>,
) -> Result<()> {
    let token = engine.cancellation_token();
    let watcher = tokio::spawn(async move {
        let signal = termination_signal().await;
        tracing::info!(signal, "Termination signal received, interrupting download run");
        token.cancel();
    });

    let result = engine.execute(batches, sink).await;
    watcher.abort();
    result
}

/// Name of the first termination signal delivered; never resolves when
/// nothing can be listened for.
#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let mut sigterm = signal(SignalKind::terminate())
        .inspect_err(|e| tracing::warn!(error = %e, "Could not register SIGTERM handler"))
        .ok();
    let mut sigint = signal(SignalKind::interrupt())
        .inspect_err(|e| tracing::warn!(error = %e, "Could not register SIGINT handler"))
        .ok();

    match (sigterm.as_mut(), sigint.as_mut()) {
        (Some(term), Some(int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Some(term), None) => {
            term.recv().await;
            "SIGTERM"
        }
        (None, Some(int)) => {
            int.recv().await;
            "SIGINT"
        }
        (None, None) => ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl+C, download run is not signal-cancellable");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
