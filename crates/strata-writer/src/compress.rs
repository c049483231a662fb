//! Per-block compression codecs

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Compression applied to a block payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    /// Store the payload verbatim
    None,
    /// LZ4 block compression (fast, moderate ratio)
    Lz4,
    /// Zstandard at the given level
    #[default]
    Zstd,
}

impl Compression {
    /// Stable on-wire tag byte for this codec
    pub const fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd => 2,
        }
    }

    /// Decode a tag byte back into a codec
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Zstd),
            other => Err(Error::Corrupted(format!("unknown compression tag {other}"))),
        }
    }

    /// Compress a block payload
    pub fn compress(self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Zstd => Ok(zstd::bulk::compress(data, level)?),
        }
    }

    /// Decompress a block payload back to `uncompressed_len` bytes
    pub fn decompress(self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        let out = match self {
            Compression::None => data.to_vec(),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Corrupted(format!("lz4: {e}")))?,
            Compression::Zstd => zstd::bulk::decompress(data, uncompressed_len)?,
        };
        if out.len() != uncompressed_len {
            return Err(Error::Corrupted(format!(
                "payload decompressed to {} bytes, expected {}",
                out.len(),
                uncompressed_len
            )));
        }
        Ok(out)
    }
}
