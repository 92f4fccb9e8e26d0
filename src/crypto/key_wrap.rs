//! RFC 3394 AES key wrap.
//!
//! Wire format: `A || R[1] || ... || R[n]`, eight bytes longer than the
//! wrapped key. `A` unwraps to the default integrity check value
//! `A6A6A6A6A6A6A6A6` when the KEK and ciphertext are genuine.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};

use crate::error::CryptoError;

const DEFAULT_IV: [u8; 8] = [0xA6; 8];
const SEMIBLOCK: usize = 8;
const ROUNDS: u64 = 6;

/// Key-encryption key of any AES size
enum Kek {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl Kek {
    fn new(kek: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::KeyLength(kek.len());
        match kek.len() {
            16 => Aes128::new_from_slice(kek).map(Kek::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(kek).map(Kek::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(kek).map(Kek::Aes256).map_err(invalid),
            n => Err(CryptoError::KeyLength(n)),
        }
    }

    fn encrypt(&self, block: &mut [u8; 16]) {
        let block = Block::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.encrypt_block(block),
            Kek::Aes192(c) => c.encrypt_block(block),
            Kek::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8; 16]) {
        let block = Block::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.decrypt_block(block),
            Kek::Aes192(c) => c.decrypt_block(block),
            Kek::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Wrap `key` under `kek`.
///
/// `key` must be a multiple of 8 bytes and at least 16 bytes long; `kek`
/// must be 16, 24 or 32 bytes.
pub fn wrap_key(kek: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() % SEMIBLOCK != 0 || key.len() < 2 * SEMIBLOCK {
        return Err(CryptoError::InputLength(key.len()));
    }
    let cipher = Kek::new(kek)?;
    let n = key.len() / SEMIBLOCK;

    let mut a = DEFAULT_IV;
    let mut r: Vec<[u8; SEMIBLOCK]> = key
        .chunks_exact(SEMIBLOCK)
        .map(semiblock)
        .collect();

    let mut block = [0u8; 16];
    for j in 0..ROUNDS {
        for (i, ri) in r.iter_mut().enumerate() {
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(ri);
            cipher.encrypt(&mut block);
            let t = (n as u64) * j + (i as u64 + 1);
            a = xor_counter(&block[..8], t);
            ri.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(key.len() + SEMIBLOCK);
    out.extend_from_slice(&a);
    for ri in &r {
        out.extend_from_slice(ri);
    }
    Ok(out)
}

/// Unwrap `wrapped` under `kek`.
///
/// Fails with [`CryptoError::Integrity`] when the recovered integrity check
/// value does not match, i.e. the KEK is wrong or the blob was tampered with.
pub fn unwrap_key(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped.len() % SEMIBLOCK != 0 || wrapped.len() < 3 * SEMIBLOCK {
        return Err(CryptoError::InputLength(wrapped.len()));
    }
    let cipher = Kek::new(kek)?;
    let n = wrapped.len() / SEMIBLOCK - 1;

    let mut a = semiblock(&wrapped[..SEMIBLOCK]);
    let mut r: Vec<[u8; SEMIBLOCK]> = wrapped[SEMIBLOCK..]
        .chunks_exact(SEMIBLOCK)
        .map(semiblock)
        .collect();

    let mut block = [0u8; 16];
    for j in (0..ROUNDS).rev() {
        for (i, ri) in r.iter_mut().enumerate().rev() {
            let t = (n as u64) * j + (i as u64 + 1);
            block[..8].copy_from_slice(&xor_counter(&a, t));
            block[8..].copy_from_slice(ri);
            cipher.decrypt(&mut block);
            a = semiblock(&block[..8]);
            ri.copy_from_slice(&block[8..]);
        }
    }

    // Fold the comparison so every byte is inspected.
    let diff = a
        .iter()
        .zip(DEFAULT_IV.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    if diff != 0 {
        return Err(CryptoError::Integrity);
    }

    Ok(r.concat())
}

fn semiblock(bytes: &[u8]) -> [u8; SEMIBLOCK] {
    let mut out = [0u8; SEMIBLOCK];
    out.copy_from_slice(bytes);
    out
}

fn xor_counter(bytes: &[u8], t: u64) -> [u8; SEMIBLOCK] {
    let mut out = semiblock(bytes);
    for (o, c) in out.iter_mut().zip(t.to_be_bytes()) {
        *o ^= c;
    }
    out
}
