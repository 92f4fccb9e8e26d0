//! Tag-length-value key blobs.
//!
//! Layout, repeated until the input is exhausted:
//!
//! ```text
//! +---------+------------------+-------------+
//! | tag: 4  | length: 4 (i32BE)| value: len  |
//! +---------+------------------+-------------+
//! ```
//!
//! Key blobs come from the remote service and are untrusted: every length is
//! checked before slicing, and leftover bytes that cannot form a header are
//! reported as corruption instead of being dropped.

use crate::error::CryptoError;

const HEADER_LEN: usize = 8;

/// Four-byte ASCII block tag, e.g. `WKEY`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Tag from its four ASCII characters
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// One decoded element of a key blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBlock {
    /// Block tag
    pub tag: Tag,
    /// Block payload
    pub value: Vec<u8>,
}

impl KeyBlock {
    /// Create a block
    pub fn new(tag: Tag, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }
}

/// Decode every block of `data`, in order.
pub fn decode_blocks(data: &[u8]) -> Result<Vec<KeyBlock>, CryptoError> {
    let mut blocks = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= HEADER_LEN {
        let tag = Tag([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let declared = i32::from_be_bytes([
            data[pos + 4],
            data[pos + 5],
            data[pos + 6],
            data[pos + 7],
        ]);
        if declared < 0 {
            return Err(CryptoError::Corrupt(format!(
                "block {tag} at offset {pos} declares negative length {declared}"
            )));
        }
        let length = declared as usize;
        let start = pos + HEADER_LEN;
        if start + length > data.len() {
            return Err(CryptoError::Corrupt(format!(
                "block {tag} at offset {pos} declares {length} bytes, {} available",
                data.len() - start
            )));
        }
        blocks.push(KeyBlock::new(tag, &data[start..start + length]));
        pos = start + length;
    }

    if pos != data.len() {
        return Err(CryptoError::Corrupt(format!(
            "{} trailing bytes after last block",
            data.len() - pos
        )));
    }
    Ok(blocks)
}

/// Encode blocks into their wire form.
///
/// Values longer than `i32::MAX` bytes are rejected.
pub fn encode_blocks<'a>(
    blocks: impl IntoIterator<Item = &'a KeyBlock>,
) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    for block in blocks {
        let length = i32::try_from(block.value.len()).map_err(|_| {
            CryptoError::Corrupt(format!("block {} too large to encode", block.tag))
        })?;
        out.extend_from_slice(&block.tag.0);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&block.value);
    }
    Ok(out)
}

/// First block carrying `tag`.
pub fn find_block<'a>(blocks: &'a [KeyBlock], tag: Tag) -> Result<&'a KeyBlock, CryptoError> {
    blocks
        .iter()
        .find(|b| b.tag == tag)
        .ok_or_else(|| CryptoError::MissingBlock(tag.to_string()))
}
