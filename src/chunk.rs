//! Base64 chunk encoding
//!
//! A payload is base64-encoded once and the encoded text is sliced into
//! consecutive pieces of `size` bytes (the last may be shorter). Chunks are
//! addressed 1-based on the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CourierError;

/// Largest chunk that fits a single TXT character-string
pub const MAX_CHUNK_SIZE: usize = 255;

/// Default chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 255;

/// Validated chunk size, `1..=255`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ChunkSize(usize);

impl ChunkSize {
    pub fn new(size: usize) -> Result<Self, CourierError> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(CourierError::InvalidChunkSize(size.to_string()));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_SIZE)
    }
}

impl FromStr for ChunkSize {
    type Err = CourierError;

    /// Only plain ASCII decimal digits are accepted ("+5", " 5" and "5.0" are not)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CourierError::InvalidChunkSize(s.to_string()));
        }

        let size = s
            .parse::<usize>()
            .map_err(|_| CourierError::InvalidChunkSize(s.to_string()))?;

        Self::new(size).map_err(|_| CourierError::InvalidChunkSize(s.to_string()))
    }
}

impl TryFrom<usize> for ChunkSize {
    type Error = CourierError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<ChunkSize> for usize {
    fn from(size: ChunkSize) -> usize {
        size.0
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered base64 chunks of one payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunks(Vec<String>);

impl Chunks {
    /// Base64-encode `payload` and slice the text into `size`-byte chunks
    pub fn encode(payload: &[u8], size: ChunkSize) -> Self {
        let encoded = BASE64.encode(payload);

        // base64 output is pure ASCII, so byte slicing never splits a char
        let chunks = encoded
            .as_bytes()
            .chunks(size.get())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        Self(chunks)
    }

    /// Get chunk by 1-based index
    pub fn get(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Concatenate all chunks and decode back to the original payload
    pub fn reassemble(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.0.concat())
    }
}
