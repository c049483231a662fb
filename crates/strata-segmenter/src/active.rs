//! Active block set: the open block plus the sealed, still-match-eligible tail
//!
//! The open block accumulates literal bytes and fingerprints its own content
//! as bytes land, so duplicate regions are found even before the first seal.
//! Sealing freezes the buffer into shared [`Bytes`]: one handle goes to the
//! writer for compression, the other stays here for match verification until
//! the block is retired. Sealed bytes never move in memory; the index holds
//! raw offsets into them.

use crate::bloom::BloomFilter;
use crate::index::{BlockIndex, BlockPos};
use crate::rolling::RollingHasher;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// A sealed block still eligible as a match target.
#[derive(Debug, Clone)]
pub(crate) struct SealedBlock {
    pub id: u32,
    pub data: Bytes,
}

struct OpenBlock<H> {
    id: u32,
    buf: BytesMut,
    hasher: H,
}

/// Bounded set of live blocks: one open, at most `max_active` sealed.
pub(crate) struct ActiveBlocks<H> {
    open: Option<OpenBlock<H>>,
    sealed: VecDeque<SealedBlock>,
    next_id: u32,
    capacity: usize,
    window: usize,
    step_mask: u32,
    max_active: usize,
}

impl<H: RollingHasher> ActiveBlocks<H> {
    pub fn new(capacity: usize, window: usize, step_shift: u32, max_active: usize) -> Self {
        Self {
            open: None,
            sealed: VecDeque::new(),
            next_id: 0,
            capacity,
            window,
            step_mask: (1u32 << step_shift) - 1,
            max_active,
        }
    }

    /// Append literal bytes to the open block, admitting a fresh one if
    /// needed, and register every new complete aligned window.
    ///
    /// Appends at most the open block's remaining capacity; returns the block
    /// id, the offset the run landed at, and how many bytes were taken.
    pub fn append_literal(
        &mut self,
        data: &[u8],
        index: &mut BlockIndex,
        mut bloom: Option<&mut BloomFilter>,
    ) -> (u32, u32, usize) {
        let window = self.window;
        let step_mask = self.step_mask;
        let capacity = self.capacity;
        let open = match &mut self.open {
            Some(open) => open,
            none => {
                let id = self.next_id;
                self.next_id += 1;
                none.insert(OpenBlock {
                    id,
                    buf: BytesMut::with_capacity(capacity),
                    hasher: H::for_window(window),
                })
            }
        };

        let base = open.buf.len();
        let n = data.len().min(capacity - base);
        open.buf.extend_from_slice(&data[..n]);

        for i in base..base + n {
            let byte = open.buf[i];
            if i + 1 <= window {
                open.hasher.update(byte);
            } else {
                open.hasher.roll(open.buf[i - window], byte);
            }
            if i + 1 >= window {
                let start = (i + 1 - window) as u32;
                if start & step_mask == 0 {
                    let fingerprint = open.hasher.value();
                    index.insert(
                        fingerprint,
                        BlockPos {
                            block_id: open.id,
                            offset: start,
                        },
                    );
                    if let Some(filter) = bloom.as_deref_mut() {
                        filter.insert(fingerprint);
                    }
                }
            }
        }

        (open.id, base as u32, n)
    }

    /// True when the open block has no capacity left
    pub fn open_is_full(&self) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.buf.len() == self.capacity)
    }

    /// Seal the open block: freeze its bytes and move it to the sealed tail.
    ///
    /// Returns the id and a shared handle to the bytes for the writer, or
    /// `None` when no open block exists.
    pub fn seal_open(&mut self) -> Option<(u32, Bytes)> {
        let open = self.open.take()?;
        let data = open.buf.freeze();
        let id = open.id;
        self.sealed.push_back(SealedBlock {
            id,
            data: data.clone(),
        });
        tracing::debug!(block = id, bytes = data.len(), "sealed block");
        Some((id, data))
    }

    /// Evict oldest sealed blocks until at most `max_active` remain, purging
    /// their index entries and rebuilding the prefilter. Returns how many
    /// blocks were retired.
    pub fn retire_overfull(
        &mut self,
        index: &mut BlockIndex,
        bloom: Option<&mut BloomFilter>,
    ) -> usize {
        let mut retired = 0;
        while self.sealed.len() > self.max_active {
            let Some(block) = self.sealed.pop_front() else {
                break;
            };
            index.purge_block(block.id);
            tracing::debug!(block = block.id, live_entries = index.len(), "retired block");
            retired += 1;
        }
        if retired > 0 {
            if let Some(filter) = bloom {
                filter.rebuild(index.fingerprints());
                tracing::trace!(fingerprints = index.len(), "rebuilt prefilter");
            }
        }
        retired
    }

    /// Bytes of a live block, for candidate verification and extension.
    ///
    /// For the open block this is the committed prefix only; pending literals
    /// are not yet part of any block.
    pub fn match_view(&self, block_id: u32) -> Option<&[u8]> {
        if let Some(open) = &self.open {
            if open.id == block_id {
                return Some(&open.buf);
            }
        }
        let front = self.sealed.front()?.id;
        let slot = block_id.checked_sub(front)? as usize;
        self.sealed
            .get(slot)
            .filter(|block| block.id == block_id)
            .map(|block| block.data.as_ref())
    }
}
