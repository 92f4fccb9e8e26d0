//! Key-recovery primitives and chunk decryption
//!
//! - [`agreement`] - Curve25519 key agreement with explicit scalar clamping
//! - [`key_wrap`] - RFC 3394 AES key wrap / unwrap
//! - [`tlv`] - tag-length-value decoding of key blobs
//! - [`key_chain`] - per-backup chain turning a key blob into a chunk key
//!
//! Everything here is a pure function or an immutable value and may be
//! shared freely between workers.

pub mod agreement;
pub mod key_chain;
pub mod key_wrap;
pub mod tlv;

pub use agreement::{agree, clamp_scalar, public_key};
pub use key_chain::{KeyChain, decrypt_chunk, encrypt_chunk, seal_key_blob};
pub use key_wrap::{unwrap_key, wrap_key};
pub use tlv::{KeyBlock, Tag, decode_blocks, encode_blocks};
