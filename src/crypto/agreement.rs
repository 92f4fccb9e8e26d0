//! Curve25519 key agreement.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

/// Length of private keys, public keys and shared secrets
pub const KEY_LEN: usize = 32;

/// Return a clamped copy of a Curve25519 private scalar.
///
/// Clears the three low bits of byte 0 and the top bit of byte 31, and sets
/// bit 6 of byte 31. The input is left untouched.
pub fn clamp_scalar(private: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let mut scalar = *private;
    scalar[0] &= 0xF8;
    scalar[31] &= 0x7F;
    scalar[31] |= 0x40;
    scalar
}

/// Compute the shared secret between `public` and `private`.
pub fn agree(public: &[u8; KEY_LEN], private: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(clamp_scalar(private));
    let shared = secret.diffie_hellman(&PublicKey::from(*public));
    *shared.as_bytes()
}

/// Slice variant of [`agree`] for key material read from untrusted blobs.
pub fn agree_slices(public: &[u8], private: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let public = to_key(public)?;
    let private = to_key(private)?;
    Ok(agree(&public, &private))
}

/// Public key belonging to `private`.
pub fn public_key(private: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(clamp_scalar(private));
    PublicKey::from(&secret).to_bytes()
}

fn to_key(bytes: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    <[u8; KEY_LEN]>::try_from(bytes).map_err(|_| CryptoError::KeyLength(bytes.len()))
}
