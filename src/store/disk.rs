//! On-disk content-addressed store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{ContentStore, StagedChunk, Writers};
use crate::error::{Error, Result};
use crate::types::{ChunkBatch, Signature};

/// Chunk store rooted at a directory
///
/// Layout:
/// - `<root>/chunks/<hex[0..2]>/<hex>` - committed chunk plaintext
/// - `<root>/staging/` - writers in progress
#[derive(Debug, Clone)]
pub struct DiskChunkStore {
    root: PathBuf,
}

impl DiskChunkStore {
    /// Open (creating if needed) a store at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("chunks"))?;
        std::fs::create_dir_all(root.join("staging"))?;
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a signature is committed to
    pub fn chunk_path(&self, signature: &Signature) -> PathBuf {
        let hex = signature.to_hex();
        let shard = hex.get(..2).unwrap_or("00");
        self.root.join("chunks").join(shard).join(hex)
    }

    /// Whether `signature` is committed
    pub fn contains(&self, signature: &Signature) -> bool {
        self.chunk_path(signature).is_file()
    }

    /// Read a committed chunk
    pub fn read(&self, signature: &Signature) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.chunk_path(signature))?)
    }
}

impl ContentStore for DiskChunkStore {
    fn put(&self, batch: &ChunkBatch, payload: &[u8]) -> Result<Writers> {
        let expected = batch.payload_len();
        if payload.len() as u64 != expected {
            return Err(Error::MalformedPayload(format!(
                "batch {} promised {expected} bytes, received {}",
                batch.url,
                payload.len()
            )));
        }

        let payload = Bytes::copy_from_slice(payload);
        let staging_dir = self.root.join("staging");
        let mut writers = Writers::new();
        let mut offset = 0usize;

        for chunk in &batch.chunks {
            let end = offset + chunk.length as usize;
            if self.contains(&chunk.signature) || writers.contains_key(&chunk.signature) {
                tracing::trace!(signature = %chunk.signature, "Chunk already stored, skipping");
                offset = end;
                continue;
            }

            let staging = tempfile::Builder::new()
                .prefix("chunk-")
                .tempfile_in(&staging_dir)?;
            let writer = StagedChunk::new(
                chunk.clone(),
                payload.slice(offset..end),
                staging,
                self.chunk_path(&chunk.signature),
            );
            writers.insert(chunk.signature.clone(), Box::new(writer));
            offset = end;
        }

        tracing::debug!(
            batch = %batch.url,
            chunks = batch.chunks.len(),
            opened = writers.len(),
            "Staged batch payload"
        );
        Ok(writers)
    }

    fn fail(&self, batch: &ChunkBatch) -> Result<HashSet<Signature>> {
        Ok(batch
            .signatures()
            .filter(|signature| !self.contains(signature))
            .cloned()
            .collect())
    }
}
