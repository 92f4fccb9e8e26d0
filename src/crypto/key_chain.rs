//! Per-backup key chain: key blob -> chunk key -> chunk plaintext.
//!
//! A chunk's key blob is a TLV sequence holding an ephemeral Curve25519
//! public key (`EPUB`) and the chunk key wrapped under
//! `SHA-256(agree(EPUB, backup_private))` (`WKEY`). Chunk ciphertext is
//! `nonce(12) || AES-256-GCM(plaintext) || tag(16)` with the chunk
//! signature as associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::agreement::{KEY_LEN, agree, agree_slices, public_key};
use super::key_wrap::{unwrap_key, wrap_key};
use super::tlv::{KeyBlock, Tag, decode_blocks, encode_blocks, find_block};
use crate::error::CryptoError;
use crate::types::ChunkRef;

/// Ephemeral public key block
pub const EPHEMERAL_PUBLIC: Tag = Tag::new(b"EPUB");
/// Wrapped chunk key block
pub const WRAPPED_KEY: Tag = Tag::new(b"WKEY");

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Holds the backup private key and recovers chunk keys from key blobs
#[derive(Clone)]
pub struct KeyChain {
    private: [u8; KEY_LEN],
}

impl KeyChain {
    /// Key chain for the backup identified by `private`
    pub fn new(private: [u8; KEY_LEN]) -> Self {
        Self { private }
    }

    /// Public half of the backup key, used by producers to seal key blobs
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        public_key(&self.private)
    }

    /// Recover the chunk key sealed in `blob`
    pub fn recover_key(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let blocks = decode_blocks(blob)?;
        let ephemeral = find_block(&blocks, EPHEMERAL_PUBLIC)?;
        let wrapped = find_block(&blocks, WRAPPED_KEY)?;
        let shared = agree_slices(&ephemeral.value, &self.private)?;
        unwrap_key(&derive_kek(&shared), &wrapped.value)
    }

    /// Decrypt and authenticate one chunk
    pub fn open_chunk(&self, chunk: &ChunkRef, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.recover_key(&chunk.key)?;
        decrypt_chunk(&key, chunk.signature.as_bytes(), ciphertext)
    }
}

impl std::fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyChain")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

fn derive_kek(shared: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    Sha256::digest(shared).into()
}

/// Seal `key` for the holder of `recipient_public`.
///
/// `ephemeral_private` must be fresh for every blob.
pub fn seal_key_blob(
    recipient_public: &[u8; KEY_LEN],
    ephemeral_private: &[u8; KEY_LEN],
    key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let shared = agree(recipient_public, ephemeral_private);
    let wrapped = wrap_key(&derive_kek(&shared), key)?;
    encode_blocks(&[
        KeyBlock::new(EPHEMERAL_PUBLIC, public_key(ephemeral_private)),
        KeyBlock::new(WRAPPED_KEY, wrapped),
    ])
}

/// Decrypt a chunk sealed with [`encrypt_chunk`].
pub fn decrypt_chunk(key: &[u8], aad: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}

/// Encrypt a chunk under a 32-byte key with a random nonce.
pub fn encrypt_chunk(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
