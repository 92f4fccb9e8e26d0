//! Sealed batch fixtures served from a wiremock server

use std::sync::Arc;
use std::time::Duration;

use chunk_dl::crypto::{encrypt_chunk, seal_key_blob};
use chunk_dl::{
    ChunkBatch, ChunkCommitter, ChunkRef, DiskChunkStore, Engine, EngineConfig,
    HttpChunkTransport, KeyChain, Manifest, OutputFile, RetryConfig, Signature, TransportConfig,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Private key of the backup every fixture is sealed for
pub const BACKUP_PRIVATE: [u8; 32] = [0x3C; 32];

/// One plaintext chunk and the files it belongs to
pub struct ChunkSpec {
    pub plaintext: Vec<u8>,
    pub files: Vec<&'static str>,
}

impl ChunkSpec {
    pub fn new(plaintext: impl Into<Vec<u8>>, files: &[&'static str]) -> Self {
        Self {
            plaintext: plaintext.into(),
            files: files.to_vec(),
        }
    }
}

/// A batch descriptor together with the payload its host serves
pub struct SealedBatch {
    pub batch: ChunkBatch,
    pub payload: Vec<u8>,
}

impl SealedBatch {
    pub fn path(&self) -> String {
        self.batch.url.path().to_string()
    }

    pub fn signature(&self, index: usize) -> &Signature {
        &self.batch.chunks[index].signature
    }
}

/// Content signature of a plaintext chunk
pub fn signature_of(plaintext: &[u8]) -> Signature {
    Signature::new(Sha256::digest(plaintext).to_vec())
}

/// Seal `chunks` into a batch served at `<server>/batches/<id>`
pub fn sealed_batch(server: &MockServer, id: u32, chunks: &[ChunkSpec]) -> SealedBatch {
    let recipient = KeyChain::new(BACKUP_PRIVATE).public_key();
    let mut payload = Vec::new();
    let mut refs = Vec::new();

    for (i, spec) in chunks.iter().enumerate() {
        let signature = signature_of(&spec.plaintext);
        let chunk_key: [u8; 32] = Sha256::digest(format!("chunk-key-{id}-{i}")).into();
        let ephemeral: [u8; 32] = Sha256::digest(format!("ephemeral-{id}-{i}")).into();

        let ciphertext = encrypt_chunk(&chunk_key, signature.as_bytes(), &spec.plaintext).unwrap();
        let key = seal_key_blob(&recipient, &ephemeral, &chunk_key).unwrap();

        refs.push(ChunkRef {
            signature,
            length: ciphertext.len() as u32,
            key,
            files: spec.files.iter().map(|f| OutputFile::new(*f)).collect(),
        });
        payload.extend_from_slice(&ciphertext);
    }

    SealedBatch {
        batch: ChunkBatch {
            url: Url::parse(&format!("{}/batches/{id}", server.uri())).unwrap(),
            chunks: refs,
        },
        payload,
    }
}

/// Serve `sealed`'s payload with status 200
pub async fn serve(server: &MockServer, sealed: &SealedBatch) {
    Mock::given(method("GET"))
        .and(path(sealed.path()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sealed.payload.clone()))
        .mount(server)
        .await;
}

/// Serve `sealed`'s payload with its last byte flipped, for exactly `times` requests.
///
/// Mount it before [`serve`] so later requests fall through to the intact payload.
pub async fn serve_corrupted(server: &MockServer, sealed: &SealedBatch, times: u64) {
    let mut body = sealed.payload.clone();
    if let Some(last) = body.last_mut() {
        *last ^= 0xFF;
    }
    Mock::given(method("GET"))
        .and(path(sealed.path()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

/// Answer `sealed`'s URL with `status`, expecting exactly `calls` requests
pub async fn serve_status(server: &MockServer, sealed: &SealedBatch, status: u16, calls: u64) {
    Mock::given(method("GET"))
        .and(path(sealed.path()))
        .respond_with(ResponseTemplate::new(status))
        .expect(calls)
        .mount(server)
        .await;
}

/// Engine wired to the reference transport, disk store and committer
pub struct Harness {
    pub engine: Engine,
    pub store: Arc<DiskChunkStore>,
    _dir: TempDir,
}

pub fn harness(batches: &[ChunkBatch], threads: usize, max_attempts: u32) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskChunkStore::open(dir.path()).unwrap());
    let committer = ChunkCommitter::new(
        KeyChain::new(BACKUP_PRIVATE),
        Manifest::from_batches(batches),
    );
    let transport = HttpChunkTransport::new(&TransportConfig::default()).unwrap();

    let engine = Engine::new(
        EngineConfig {
            threads,
            stagger_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(30),
        },
        RetryConfig::immediate(max_attempts),
        Arc::new(transport),
        store.clone(),
        Arc::new(committer),
    );

    Harness {
        engine,
        store,
        _dir: dir,
    }
}
