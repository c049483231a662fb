//! Input sources and chunk references

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;

/// A byte range inside an emitted block.
///
/// A file is an ordered sequence of chunk references; concatenating the
/// referenced ranges reproduces the file bit for bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Id of the block holding the bytes
    pub block_id: u32,
    /// Byte offset within the block
    pub offset: u32,
    /// Length of the range
    pub length: u32,
}

/// A finite, read-once source of bytes fed to the segmenter.
///
/// The engine pulls bytes sequentially and pushes the source's chunk list
/// back through [`add_chunk`](Chunkable::add_chunk) as it is discovered.
/// Chunks arrive in file order; their lengths sum to the source's size.
pub trait Chunkable {
    /// Total size if known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Read up to `buf.len()` bytes; 0 signals end of source
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Receive the next chunk of this source's representation
    fn add_chunk(&mut self, chunk: ChunkRef);

    /// Human-readable identity for diagnostics
    fn description(&self) -> String {
        "<unnamed source>".to_string()
    }
}

/// In-memory source that collects its own chunk list.
#[derive(Debug, Clone)]
pub struct BufferChunkable {
    name: String,
    data: Bytes,
    pos: usize,
    chunks: Vec<ChunkRef>,
}

impl BufferChunkable {
    /// Wrap a byte buffer as a source
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            pos: 0,
            chunks: Vec::new(),
        }
    }

    /// The source bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Chunks emitted for this source so far, in file order
    pub fn chunks(&self) -> &[ChunkRef] {
        &self.chunks
    }

    /// Sum of emitted chunk lengths
    pub fn chunked_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.length as u64).sum()
    }

    /// Reassemble the source from its chunk list and a block lookup.
    ///
    /// `block` maps a block id to that block's uncompressed bytes.
    pub fn reconstruct<'a, F>(&self, mut block: F) -> Option<Vec<u8>>
    where
        F: FnMut(u32) -> Option<&'a [u8]>,
    {
        let mut out = Vec::with_capacity(self.data.len());
        for chunk in &self.chunks {
            let bytes = block(chunk.block_id)?;
            let start = chunk.offset as usize;
            let end = start + chunk.length as usize;
            out.extend_from_slice(bytes.get(start..end)?);
        }
        Some(out)
    }
}

impl Chunkable for BufferChunkable {
    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn add_chunk(&mut self, chunk: ChunkRef) {
        self.chunks.push(chunk);
    }

    fn description(&self) -> String {
        format!("{} ({} bytes)", self.name, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reads_sequentially() {
        let mut source = BufferChunkable::new("demo", Bytes::from_static(b"hello world"));
        assert_eq!(source.size_hint(), Some(11));

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"o wo");
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"rld");
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_reconstruct_from_blocks() {
        let mut source = BufferChunkable::new("file", Bytes::from_static(b"abcdef"));
        source.add_chunk(ChunkRef {
            block_id: 0,
            offset: 2,
            length: 3,
        });
        source.add_chunk(ChunkRef {
            block_id: 1,
            offset: 0,
            length: 3,
        });

        let block0 = b"xxabcxx";
        let block1 = b"def";
        let out = source
            .reconstruct(|id| match id {
                0 => Some(&block0[..]),
                1 => Some(&block1[..]),
                _ => None,
            })
            .unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_reconstruct_missing_block_fails() {
        let mut source = BufferChunkable::new("file", Bytes::new());
        source.add_chunk(ChunkRef {
            block_id: 9,
            offset: 0,
            length: 1,
        });
        assert!(source.reconstruct(|_| None::<&[u8]>).is_none());
    }

    #[test]
    fn test_description_includes_name_and_size() {
        let source = BufferChunkable::new("inode/42", Bytes::from_static(b"1234"));
        assert_eq!(source.description(), "inode/42 (4 bytes)");
    }
}
