//! Scripted collaborators for engine tests.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{BatchDownloader, Collaborators, Engine};
use crate::commit::WriteCollaborator;
use crate::config::{EngineConfig, RetryConfig};
use crate::error::{CryptoError, Error, Result};
use crate::outcome::OutcomeSink;
use crate::store::{ContentStore, DataWriter, Writers};
use crate::transport::{ChunkRequest, ChunkTransport};
use crate::types::{ChunkBatch, ChunkRef, Outcome, OutcomeMap, OutputFile, Signature};

pub(crate) const CHUNK_LEN: u32 = 4;

/// Batch `n` with `chunks` chunks of [`CHUNK_LEN`] bytes, one file per chunk
pub(crate) fn batch(n: u8, chunks: u8) -> ChunkBatch {
    ChunkBatch {
        url: Url::parse(&format!("https://host-{n}.example.com/batch/{n}")).unwrap(),
        chunks: (0..chunks)
            .map(|i| {
                let signature = Signature::new(vec![n, i]);
                ChunkRef {
                    files: vec![file_of(&signature)],
                    signature,
                    length: CHUNK_LEN,
                    key: Vec::new(),
                }
            })
            .collect(),
    }
}

pub(crate) fn file_of(signature: &Signature) -> OutputFile {
    OutputFile::new(format!("file-{signature}"))
}

/// A payload of the right length for `batch`
pub(crate) fn payload(batch: &ChunkBatch) -> Bytes {
    Bytes::from(vec![0x5A; batch.payload_len() as usize])
}

/// What the scripted transport does for one call
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Payload(Bytes),
    Status(u16),
    Hang,
    Panic,
}

/// Decrements the in-flight counter when the request future completes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport answering each URL from a script; the last reply repeats
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<Url, VecDeque<Reply>>>,
    calls: Mutex<HashMap<Url, usize>>,
    in_flight: AtomicUsize,
}

impl ScriptedTransport {
    /// Transport serving a valid payload for every batch
    pub(crate) fn serving(batches: &[ChunkBatch]) -> Self {
        let transport = Self::default();
        for batch in batches {
            transport.script(batch, [Reply::Payload(payload(batch))]);
        }
        transport
    }

    pub(crate) fn script(&self, batch: &ChunkBatch, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(batch.url.clone(), replies.into_iter().collect());
    }

    pub(crate) fn calls(&self, batch: &ChunkBatch) -> usize {
        self.calls.lock().unwrap().get(&batch.url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &Url) -> Reply {
        *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Reply::Status(404)),
            None => Reply::Status(404),
        }
    }
}

#[async_trait]
impl ChunkTransport for ScriptedTransport {
    fn build_request(&self, batch: &ChunkBatch) -> Result<ChunkRequest> {
        Ok(ChunkRequest {
            url: batch.url.clone(),
            headers: Default::default(),
        })
    }

    async fn execute(&self, request: &ChunkRequest) -> Result<Bytes> {
        let reply = self.next_reply(&request.url);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        tokio::task::yield_now().await;

        match reply {
            Reply::Payload(bytes) => Ok(bytes),
            Reply::Status(status) => Err(Error::HttpStatus {
                status,
                url: request.url.to_string(),
            }),
            Reply::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            Reply::Panic => panic!("scripted transport panic"),
        }
    }
}

/// Shared bookkeeping of the memory store and its writers
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) present: Mutex<HashSet<Signature>>,
    pub(crate) opened: AtomicUsize,
    pub(crate) closed: AtomicUsize,
}

/// In-memory [`ContentStore`]
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) state: Arc<StoreState>,
    pub(crate) put_io_error: AtomicBool,
    pub(crate) fail_calls: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn mark_present(&self, signature: &Signature) {
        self.state.present.lock().unwrap().insert(signature.clone());
    }

    pub(crate) fn contains(&self, signature: &Signature) -> bool {
        self.state.present.lock().unwrap().contains(signature)
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, batch: &ChunkBatch, payload: &[u8]) -> Result<Writers> {
        if self.put_io_error.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("store volume unavailable")));
        }
        if payload.len() as u64 != batch.payload_len() {
            return Err(Error::MalformedPayload(format!(
                "expected {} bytes, got {}",
                batch.payload_len(),
                payload.len()
            )));
        }

        let present = self.state.present.lock().unwrap();
        let mut writers = Writers::new();
        let mut offset = 0;
        for chunk in &batch.chunks {
            let end = offset + chunk.length as usize;
            if !present.contains(&chunk.signature) && !writers.contains_key(&chunk.signature) {
                self.state.opened.fetch_add(1, Ordering::SeqCst);
                writers.insert(
                    chunk.signature.clone(),
                    Box::new(RecordingWriter {
                        chunk: chunk.clone(),
                        ciphertext: payload[offset..end].to_vec(),
                        sealed: false,
                        state: self.state.clone(),
                    }),
                );
            }
            offset = end;
        }
        Ok(writers)
    }

    fn fail(&self, batch: &ChunkBatch) -> Result<HashSet<Signature>> {
        self.fail_calls.fetch_add(1, Ordering::SeqCst);
        let present = self.state.present.lock().unwrap();
        Ok(batch
            .signatures()
            .filter(|s| !present.contains(*s))
            .cloned()
            .collect())
    }
}

/// Writer that counts closes and marks sealed chunks present
pub(crate) struct RecordingWriter {
    chunk: ChunkRef,
    ciphertext: Vec<u8>,
    sealed: bool,
    state: Arc<StoreState>,
}

impl DataWriter for RecordingWriter {
    fn chunk(&self) -> &ChunkRef {
        &self.chunk
    }

    fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn seal(&mut self) {
        self.sealed = true;
    }

    fn close(self: Box<Self>) -> std::io::Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.sealed {
            self.state
                .present
                .lock()
                .unwrap()
                .insert(self.chunk.signature.clone());
        }
        Ok(())
    }
}

/// Write collaborator sealing every writer, or failing with an I/O error
///
/// The first `rejected_writes` calls fail verification without sealing.
#[derive(Default)]
pub(crate) struct MockCollaborator {
    pub(crate) io_error: AtomicBool,
    pub(crate) rejected_writes: AtomicUsize,
    pub(crate) write_calls: AtomicUsize,
}

impl MockCollaborator {
    pub(crate) fn reject_writes(&self, count: usize) {
        self.rejected_writes.store(count, Ordering::SeqCst);
    }
}

impl WriteCollaborator for MockCollaborator {
    fn write(&self, writers: &mut Writers) -> Result<OutcomeMap> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.io_error.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        let rejected = self
            .rejected_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::Crypto(CryptoError::Decryption));
        }
        let mut outcomes = OutcomeMap::new();
        for writer in writers.values_mut() {
            let plaintext = writer.ciphertext().to_vec();
            writer.write_all(&plaintext)?;
            writer.seal();
            for file in &writer.chunk().files {
                outcomes.insert(file.clone(), Outcome::Success);
            }
        }
        Ok(outcomes)
    }

    fn fail(&self, signatures: &HashSet<Signature>) -> OutcomeMap {
        signatures
            .iter()
            .map(|s| (file_of(s), Outcome::Failure("not retrieved".into())))
            .collect()
    }

    fn stored(&self, signatures: &HashSet<Signature>) -> OutcomeMap {
        signatures
            .iter()
            .map(|s| (file_of(s), Outcome::Success))
            .collect()
    }
}

/// Sink recording every accepted map
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) maps: Mutex<Vec<OutcomeMap>>,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> usize {
        self.maps.lock().unwrap().len()
    }

    pub(crate) fn merged(&self) -> OutcomeMap {
        self.maps
            .lock()
            .unwrap()
            .iter()
            .flat_map(|m| m.iter().map(|(f, o)| (f.clone(), o.clone())))
            .collect()
    }
}

impl OutcomeSink for RecordingSink {
    fn accept(&self, outcomes: OutcomeMap) {
        self.maps.lock().unwrap().push(outcomes);
    }
}

/// Collaborators and sink wired together for one test
pub(crate) struct Fixture {
    pub(crate) transport: Arc<ScriptedTransport>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) writer: Arc<MockCollaborator>,
    pub(crate) sink: Arc<RecordingSink>,
}

impl Fixture {
    pub(crate) fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            store: Arc::new(MemoryStore::default()),
            writer: Arc::new(MockCollaborator::default()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: self.transport.clone(),
            store: self.store.clone(),
            writer: self.writer.clone(),
        }
    }

    pub(crate) fn downloader(&self, max_attempts: u32) -> BatchDownloader {
        BatchDownloader::new(
            0,
            self.collaborators(),
            RetryConfig::immediate(max_attempts),
            CancellationToken::new(),
        )
    }

    pub(crate) fn engine(&self, config: EngineConfig, max_attempts: u32) -> Engine {
        Engine::new(
            config,
            RetryConfig::immediate(max_attempts),
            self.transport.clone(),
            self.store.clone(),
            self.writer.clone(),
        )
    }
}
