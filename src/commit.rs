//! Decrypt staged chunks into the store and report per-file outcomes.

use std::collections::HashSet;

use crate::crypto::KeyChain;
use crate::error::{Error, Result};
use crate::store::Writers;
use crate::types::{Manifest, Outcome, OutcomeMap, OutputFile, Signature};

/// Turns staged writers, or failed signatures, into per-file outcomes
pub trait WriteCollaborator: Send + Sync {
    /// Decrypt, verify and persist every staged chunk.
    ///
    /// Writers are left open; the caller closes them. Every chunk that
    /// verifies is sealed even when another one does not; a chunk failing
    /// verification is then reported as [`Error::Crypto`] so the batch can be
    /// fetched again for the chunks still missing.
    fn write(&self, writers: &mut Writers) -> Result<OutcomeMap>;

    /// Failure outcomes for the files referencing `signatures`
    fn fail(&self, signatures: &HashSet<Signature>) -> OutcomeMap;

    /// Success outcomes for the files referencing `signatures`, which were
    /// already present in the store
    fn stored(&self, signatures: &HashSet<Signature>) -> OutcomeMap;
}

/// [`WriteCollaborator`] backed by a [`KeyChain`]
#[derive(Debug, Clone)]
pub struct ChunkCommitter {
    keys: KeyChain,
    manifest: Manifest,
}

impl ChunkCommitter {
    /// Committer decrypting with `keys` and attributing chunks to files via `manifest`
    pub fn new(keys: KeyChain, manifest: Manifest) -> Self {
        Self { keys, manifest }
    }

    fn files_of<'a>(
        &'a self,
        signature: &Signature,
        declared: &'a [OutputFile],
    ) -> impl Iterator<Item = &'a OutputFile> {
        let indexed = self.manifest.files_for(signature);
        indexed
            .iter()
            .chain(declared.iter().filter(move |f| !indexed.contains(*f)))
    }
}

fn record(outcomes: &mut OutcomeMap, file: &OutputFile, outcome: Outcome) {
    match outcomes.get(file) {
        Some(Outcome::Failure(_)) => {}
        _ => {
            outcomes.insert(file.clone(), outcome);
        }
    }
}

impl WriteCollaborator for ChunkCommitter {
    fn write(&self, writers: &mut Writers) -> Result<OutcomeMap> {
        let mut outcomes = OutcomeMap::new();
        let mut rejected = None;

        for (signature, writer) in writers.iter_mut() {
            let chunk = writer.chunk().clone();
            match self.keys.open_chunk(&chunk, writer.ciphertext()) {
                Ok(plaintext) => {
                    writer.write_all(&plaintext)?;
                    writer.seal();
                    for file in self.files_of(signature, &chunk.files) {
                        record(&mut outcomes, file, Outcome::Success);
                    }
                }
                Err(e) => {
                    tracing::warn!(signature = %signature, error = %e, "Chunk failed verification");
                    rejected.get_or_insert(e);
                }
            }
        }

        match rejected {
            Some(e) => Err(Error::Crypto(e)),
            None => Ok(outcomes),
        }
    }

    fn fail(&self, signatures: &HashSet<Signature>) -> OutcomeMap {
        let mut outcomes = OutcomeMap::new();
        for signature in signatures {
            let reason = format!("chunk {signature} could not be retrieved");
            for file in self.manifest.files_for(signature) {
                record(&mut outcomes, file, Outcome::Failure(reason.clone()));
            }
        }
        outcomes
    }

    fn stored(&self, signatures: &HashSet<Signature>) -> OutcomeMap {
        signatures
            .iter()
            .flat_map(|signature| self.manifest.files_for(signature))
            .map(|file| (file.clone(), Outcome::Success))
            .collect()
    }
}
