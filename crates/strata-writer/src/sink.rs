//! Block sink trait and the in-memory implementation

use crate::{Error, Result};
use bytes::Bytes;

/// Destination for finished blocks.
///
/// The producer calls [`write_block`](BlockSink::write_block) with strictly
/// ascending block ids and [`finish`](BlockSink::finish) exactly once when no
/// more blocks will follow. `write_block` is allowed to block the caller:
/// a bounded sink signals back-pressure by not accepting the block until it
/// has capacity.
pub trait BlockSink: Send {
    /// Accept one finished block. May block until the sink has capacity.
    fn write_block(&mut self, block_id: u32, data: Bytes) -> Result<()>;

    /// Drain all buffered work. No further blocks may be written afterwards.
    fn finish(&mut self) -> Result<()>;
}

/// Sink that keeps every block uncompressed in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    blocks: Vec<(u32, Bytes)>,
    finished: bool,
}

impl MemorySink {
    /// Create an empty in-memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All blocks written so far, in write order
    pub fn blocks(&self) -> &[(u32, Bytes)] {
        &self.blocks
    }

    /// Look up a block's bytes by id
    pub fn block(&self, block_id: u32) -> Option<&Bytes> {
        self.blocks
            .iter()
            .find(|(id, _)| *id == block_id)
            .map(|(_, data)| data)
    }

    /// Number of blocks written
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no blocks have been written
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total uncompressed bytes across all blocks
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|(_, data)| data.len()).sum()
    }
}

impl BlockSink for MemorySink {
    fn write_block(&mut self, block_id: u32, data: Bytes) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        let expected = self.blocks.last().map_or(0, |(id, _)| id + 1);
        if block_id != expected {
            return Err(Error::UnorderedBlock {
                expected,
                got: block_id,
            });
        }
        self.blocks.push((block_id, data));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let mut sink = MemorySink::new();
        sink.write_block(0, Bytes::from_static(b"first")).unwrap();
        sink.write_block(1, Bytes::from_static(b"second")).unwrap();
        sink.finish().unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.total_bytes(), 11);
        assert_eq!(&sink.block(1).unwrap()[..], b"second");
        assert!(sink.block(7).is_none());
    }

    #[test]
    fn test_memory_sink_rejects_out_of_order() {
        let mut sink = MemorySink::new();
        sink.write_block(0, Bytes::from_static(b"a")).unwrap();
        let err = sink.write_block(2, Bytes::from_static(b"c")).unwrap_err();
        assert!(matches!(
            err,
            Error::UnorderedBlock {
                expected: 1,
                got: 2
            }
        ));
    }

    #[test]
    fn test_memory_sink_rejects_after_finish() {
        let mut sink = MemorySink::new();
        sink.finish().unwrap();
        assert!(matches!(
            sink.write_block(0, Bytes::new()),
            Err(Error::Finished)
        ));
        assert!(matches!(sink.finish(), Err(Error::Finished)));
    }
}
