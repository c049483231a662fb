//! On-wire framing for a block stream
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic: [u8; 4] | version: u16
//! repeated: id: u32 | tag: u8 | uncompressed_len: u32 | payload_len: u32 | payload
//! ```
//!
//! Frames appear strictly by ascending block id. The framing carries no
//! trailer; the stream ends at EOF.

use crate::compress::Compression;
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{Read, Write};

/// Magic bytes at the start of a block stream
pub const MAGIC: [u8; 4] = *b"STRB";

/// Current block stream version
pub const VERSION: u16 = 1;

/// A single decoded block frame
#[derive(Debug, Clone)]
pub struct BlockFrame {
    /// Block id
    pub block_id: u32,
    /// Codec the payload was compressed with
    pub compression: Compression,
    /// Uncompressed block bytes
    pub data: Bytes,
}

/// Write the stream header
pub(crate) fn write_header<W: Write>(out: &mut W) -> Result<()> {
    out.write_all(&MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Write one block frame with an already-compressed payload
pub(crate) fn write_frame<W: Write>(
    out: &mut W,
    block_id: u32,
    compression: Compression,
    uncompressed_len: u32,
    payload: &[u8],
) -> Result<()> {
    out.write_all(&block_id.to_le_bytes())?;
    out.write_all(&[compression.tag()])?;
    out.write_all(&uncompressed_len.to_le_bytes())?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

/// Decode a complete block stream, decompressing every frame.
///
/// Returns the frames in stream order and verifies that block ids ascend
/// strictly from zero-or-more starting id.
pub fn read_image<R: Read>(mut input: R) -> Result<Vec<BlockFrame>> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(|_| Error::InvalidMagic)?;
    if magic != MAGIC {
        return Err(Error::InvalidMagic);
    }
    let mut version = [0u8; 2];
    input.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let mut frames = Vec::new();
    let mut prev_id: Option<u32> = None;
    loop {
        let mut id = [0u8; 4];
        match input.read_exact(&mut id) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let block_id = u32::from_le_bytes(id);
        if let Some(prev) = prev_id {
            if block_id <= prev {
                return Err(Error::Corrupted(format!(
                    "block {block_id} follows block {prev}"
                )));
            }
        }
        prev_id = Some(block_id);

        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        let compression = Compression::from_tag(tag[0])?;

        let mut len = [0u8; 4];
        input.read_exact(&mut len)?;
        let uncompressed_len = u32::from_le_bytes(len) as usize;
        input.read_exact(&mut len)?;
        let payload_len = u32::from_le_bytes(len) as usize;

        let mut payload = vec![0u8; payload_len];
        input.read_exact(&mut payload)?;

        let data = compression.decompress(&payload, uncompressed_len)?;
        frames.push(BlockFrame {
            block_id,
            compression,
            data: Bytes::from(data),
        });
    }
    Ok(frames)
}
