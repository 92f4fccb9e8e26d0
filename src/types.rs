//! Core types for chunk-dl

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

/// Content hash identifying a chunk's plaintext; the dedup key
///
/// Signatures are issued by the remote service and used verbatim.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(#[serde(with = "hex::serde")] Vec<u8>);

impl Signature {
    /// Wrap raw signature bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex-encoded signature
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }

    /// Raw signature bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Identity of one logical output file of the backup
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputFile(pub PathBuf);

impl OutputFile {
    /// Create an output file identity from a path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl std::fmt::Display for OutputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// One chunk hosted in a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Dedup key of the chunk plaintext
    pub signature: Signature,
    /// Length in bytes of the chunk's ciphertext within the batch payload
    pub length: u32,
    /// TLV-encoded key material for this chunk
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
    /// Output files that contain this chunk
    #[serde(default)]
    pub files: Vec<OutputFile>,
}

/// A remote host's set of chunks, fetched with a single request
///
/// The payload served at `url` is the concatenation of the chunk
/// ciphertexts in `chunks` order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBatch {
    /// Location of the batch payload
    pub url: Url,
    /// Chunks in payload order
    pub chunks: Vec<ChunkRef>,
}

impl ChunkBatch {
    /// Host serving this batch, for logging
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("<unknown>")
    }

    /// Total payload length the chunk descriptors promise
    pub fn payload_len(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.length)).sum()
    }

    /// Signatures of every chunk in the batch
    pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
        self.chunks.iter().map(|c| &c.signature)
    }
}

/// Result recorded for one output file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    /// Every chunk of the file handled by the batch was committed
    Success,
    /// At least one chunk could not be retrieved or committed
    Failure(String),
}

impl Outcome {
    /// Whether this is [`Outcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Outcomes of one processed batch, keyed by output file
pub type OutcomeMap = HashMap<OutputFile, Outcome>;

/// Index from chunk signature to the output files that reference it
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    files: HashMap<Signature, Vec<OutputFile>>,
}

impl Manifest {
    /// Build the index from batch descriptors
    pub fn from_batches<'a>(batches: impl IntoIterator<Item = &'a ChunkBatch>) -> Self {
        let mut manifest = Self::default();
        for batch in batches {
            for chunk in &batch.chunks {
                let entry = manifest.files.entry(chunk.signature.clone()).or_default();
                for file in &chunk.files {
                    if !entry.contains(file) {
                        entry.push(file.clone());
                    }
                }
            }
        }
        manifest
    }

    /// Files referencing `signature` (empty if unknown)
    pub fn files_for(&self, signature: &Signature) -> &[OutputFile] {
        self.files.get(signature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct signatures indexed
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
