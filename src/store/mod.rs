//! Content-addressed chunk storage.
//!
//! - [`ContentStore`] - the two operations the download engine needs
//! - [`DataWriter`] - a staged, per-signature sink closed exactly once
//! - [`DiskChunkStore`] - on-disk implementation sharded by signature prefix

mod disk;
mod writer;

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::types::{ChunkBatch, ChunkRef, Signature};

pub use disk::DiskChunkStore;
pub use writer::StagedChunk;

/// Writers opened for one batch, keyed by signature
pub type Writers = HashMap<Signature, Box<dyn DataWriter>>;

/// Per-signature sink opened by a [`ContentStore`]
///
/// Consumers must call [`DataWriter::close`] exactly once, whatever the
/// outcome. A writer that was never [`seal`](DataWriter::seal)ed discards
/// its data on close.
pub trait DataWriter: Send {
    /// Chunk this writer stages
    fn chunk(&self) -> &ChunkRef;

    /// Ciphertext of the chunk as cut from the batch payload
    fn ciphertext(&self) -> &[u8];

    /// Append plaintext
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Mark the written data complete so that `close` commits it
    fn seal(&mut self);

    /// Release the underlying resource, committing sealed data
    fn close(self: Box<Self>) -> std::io::Result<()>;
}

/// Deduplicating chunk store
pub trait ContentStore: Send + Sync {
    /// Split `payload` into the batch's chunks and open a writer for every
    /// signature not already stored.
    fn put(&self, batch: &ChunkBatch, payload: &[u8]) -> Result<Writers>;

    /// Signatures of `batch` to be reported as failed.
    fn fail(&self, batch: &ChunkBatch) -> Result<HashSet<Signature>>;
}

/// Close every writer, logging rather than propagating close errors.
pub fn close_all(writers: Writers) {
    for (signature, writer) in writers {
        if let Err(e) = writer.close() {
            tracing::warn!(signature = %signature, error = %e, "Failed to close data writer");
        }
    }
}
