//! Staging-file backed [`DataWriter`].

use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use tempfile::NamedTempFile;

use super::DataWriter;
use crate::types::ChunkRef;

/// A chunk staged in a temporary file until it is sealed and closed
///
/// Dropping a `StagedChunk` without closing it removes the staging file.
pub struct StagedChunk {
    chunk: ChunkRef,
    ciphertext: Bytes,
    staging: NamedTempFile,
    destination: PathBuf,
    sealed: bool,
}

impl StagedChunk {
    pub(super) fn new(
        chunk: ChunkRef,
        ciphertext: Bytes,
        staging: NamedTempFile,
        destination: PathBuf,
    ) -> Self {
        Self {
            chunk,
            ciphertext,
            staging,
            destination,
            sealed: false,
        }
    }

    /// Where the chunk lands once committed
    pub fn destination(&self) -> &std::path::Path {
        &self.destination
    }
}

impl DataWriter for StagedChunk {
    fn chunk(&self) -> &ChunkRef {
        &self.chunk
    }

    fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.staging.as_file_mut().write_all(buf)
    }

    fn seal(&mut self) {
        self.sealed = true;
    }

    fn close(self: Box<Self>) -> std::io::Result<()> {
        let StagedChunk {
            staging,
            destination,
            sealed,
            ..
        } = *self;

        if !sealed {
            return staging.close();
        }

        staging.as_file().sync_all()?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        staging.persist(&destination).map_err(|e| e.error)?;
        Ok(())
    }
}
