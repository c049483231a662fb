//! The segmenter engine
//!
//! A single-threaded state machine that consumes input sources byte by byte,
//! fingerprints a sliding window, probes the prefilter and the block index,
//! byte-verifies candidates, extends matches in both directions, and emits
//! chunk references for duplicated ranges and literal runs for everything
//! else. Finished blocks are handed to the writer strictly by ascending id;
//! the writer may block the handoff to enforce its memory budget, which is
//! the only suspension point.
//!
//! Two cursors drive each source: `committed` (every byte before it is
//! represented, either appended to a block or covered by a match) and `pos`
//! (the scan cursor). The engine keeps between `W` and `2W` bytes of pending
//! literals between them: enough slack for backward extension, while
//! guaranteeing the scan window itself is never part of a block yet.

use crate::active::ActiveBlocks;
use crate::bloom::BloomFilter;
use crate::chunkable::{ChunkRef, Chunkable};
use crate::config::SegmenterConfig;
use crate::index::BlockIndex;
use crate::progress::{ProgressCallback, SegmenterStats};
use crate::rolling::{CyclicHasher, RollingHasher};
use crate::{Error, Result};
use strata_writer::BlockSink;

/// Granularity of reads from a source
const READ_CHUNK: usize = 64 * 1024;

/// Buffered prefix below which [`SourceStream::discard_before`] is a no-op
const DISCARD_SLACK: usize = 32 * 1024;

/// Content-defined segmenter with corpus-wide deduplication.
///
/// Generic over the rolling hash; [`CyclicHasher`] is the default. The writer
/// boundary is the only runtime polymorphism: any [`BlockSink`] works.
pub struct Segmenter<H: RollingHasher = CyclicHasher> {
    config: SegmenterConfig,
    index: BlockIndex,
    bloom: Option<BloomFilter>,
    active: ActiveBlocks<H>,
    sink: Box<dyn BlockSink>,
    scan: H,
    stats: SegmenterStats,
    progress: Option<ProgressCallback>,
    poisoned: bool,
}

impl Segmenter<CyclicHasher> {
    /// Create an engine with the default rolling hash.
    pub fn new(config: SegmenterConfig, sink: Box<dyn BlockSink>) -> Result<Self> {
        Self::with_hasher(config, sink)
    }
}

impl<H: RollingHasher> Segmenter<H> {
    /// Create an engine with a caller-chosen rolling hash.
    pub fn with_hasher(config: SegmenterConfig, sink: Box<dyn BlockSink>) -> Result<Self> {
        config.validate()?;
        let bloom = BloomFilter::for_load(config.index_load(), config.bloom_filter_size_factor);
        let active = ActiveBlocks::new(
            config.block_capacity(),
            config.window_size,
            config.window_step_shift,
            config.max_active_blocks,
        );
        Ok(Self {
            index: BlockIndex::new(config.window_step_shift),
            bloom,
            active,
            sink,
            scan: H::for_window(config.window_size),
            stats: SegmenterStats::default(),
            progress: None,
            poisoned: false,
            config,
        })
    }

    /// Attach a progress observer, invoked at block-seal and
    /// source-completion moments.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// The engine configuration
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> SegmenterStats {
        self.stats
    }

    /// Consume one source completely, emitting its chunk list through
    /// [`Chunkable::add_chunk`].
    ///
    /// Sources are processed in submission order; deduplication is global
    /// across all of them. An error leaves the engine poisoned: the
    /// in-progress image must be discarded.
    pub fn add_chunkable(&mut self, source: &mut dyn Chunkable) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let result = self.segment_source(source);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Flush pending state, seal the open block, and drain the writer.
    ///
    /// Consumes the engine; returns the final counters.
    pub fn finish(mut self) -> Result<SegmenterStats> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if let Some((id, data)) = self.active.seal_open() {
            self.stats.blocks_emitted += 1;
            self.sink.write_block(id, data)?;
        }
        self.sink.finish()?;
        if let Some(callback) = &self.progress {
            callback(self.stats);
        }
        tracing::info!(
            bytes_in = self.stats.bytes_in,
            literal_bytes = self.stats.literal_bytes,
            blocks = self.stats.blocks_emitted,
            chunks = self.stats.chunks_emitted,
            dedup_ratio = self.stats.dedup_ratio(),
            "segmentation finished"
        );
        Ok(self.stats)
    }

    fn segment_source(&mut self, source: &mut dyn Chunkable) -> Result<()> {
        tracing::debug!(source = %source.description(), "segmenting source");

        let window = self.config.window_size as u64;
        if source.size_hint().is_some_and(|size| size < window) {
            return self.add_small_source(source);
        }

        let step_mask = (1u64 << self.config.window_step_shift) - 1;
        let mut stream = SourceStream::new();
        let mut run = LiteralRun::default();
        let mut committed: u64 = 0;
        let mut pos: u64 = 0;
        let mut resync: u64 = 0;
        self.scan.reset();

        loop {
            if !stream.ensure(source, pos + 1)? {
                break;
            }
            let byte = stream.byte(pos);
            if pos - resync < window {
                self.scan.update(byte);
            } else {
                self.scan.roll(stream.byte(pos - window), byte);
            }
            pos += 1;

            let mut hit = None;
            if pos - resync >= window {
                let win_start = pos - window;
                if (win_start - resync) & step_mask == 0 {
                    let fingerprint = self.scan.value();
                    let pass = match &self.bloom {
                        Some(filter) => filter.test(fingerprint),
                        None => true,
                    };
                    if pass {
                        hit = self.find_match(&mut stream, source, fingerprint, win_start, committed)?;
                    }
                }
            }

            let Some(hit) = hit else {
                // Keep the pending-literal buffer between W and 2W bytes:
                // commit the overflow, leaving the scan window uncommitted.
                if pos - committed >= 2 * window {
                    let upto = pos - window;
                    self.flush_literals(stream.slice(committed, upto), &mut run, source)?;
                    self.stats.bytes_in += upto - committed;
                    committed = upto;
                    self.active.retire_overfull(&mut self.index, self.bloom.as_mut());
                    stream.discard_before(committed);
                }
                continue;
            };

            // Literals strictly before the backward-extension point, then the
            // literal run, then the match itself: chunk order is file order.
            self.flush_literals(stream.slice(committed, hit.input_start), &mut run, source)?;
            run.flush(source, &mut self.stats);
            source.add_chunk(ChunkRef {
                block_id: hit.block_id,
                offset: hit.block_offset,
                length: hit.len as u32,
            });
            self.stats.chunks_emitted += 1;
            self.stats.match_chunks += 1;
            self.stats.matched_bytes += hit.len;
            self.stats.bytes_in += (hit.input_start + hit.len) - committed;

            committed = hit.input_start + hit.len;
            pos = committed;
            resync = committed;
            self.scan.reset();
            self.active.retire_overfull(&mut self.index, self.bloom.as_mut());
            stream.discard_before(committed);
        }

        // Source exhausted: drain the pending literals and close the run.
        self.flush_literals(stream.slice(committed, pos), &mut run, source)?;
        self.stats.bytes_in += pos - committed;
        run.flush(source, &mut self.stats);
        self.active.retire_overfull(&mut self.index, self.bloom.as_mut());
        if let Some(callback) = &self.progress {
            callback(self.stats);
        }
        Ok(())
    }

    /// A source shorter than the window can never match; skip the scanner.
    fn add_small_source(&mut self, source: &mut dyn Chunkable) -> Result<()> {
        let mut run = LiteralRun::default();
        let mut buf = [0u8; 1024];
        loop {
            let n = source.read(&mut buf).map_err(Error::SourceRead)?;
            if n == 0 {
                break;
            }
            self.stats.bytes_in += n as u64;
            self.flush_literals(&buf[..n], &mut run, source)?;
            self.active.retire_overfull(&mut self.index, self.bloom.as_mut());
        }
        run.flush(source, &mut self.stats);
        if let Some(callback) = &self.progress {
            callback(self.stats);
        }
        Ok(())
    }

    /// Probe the index for `fingerprint` and return the first candidate that
    /// byte-verifies, extended as far as it goes in both directions.
    ///
    /// `win_start` is the source offset of the probing window; backward
    /// extension stops at `committed` (bytes already owned by a literal run)
    /// and at the candidate block's start; forward extension stops at the
    /// candidate block's end and at end of source.
    fn find_match(
        &self,
        stream: &mut SourceStream,
        source: &mut dyn Chunkable,
        fingerprint: u32,
        win_start: u64,
        committed: u64,
    ) -> Result<Option<MatchHit>> {
        let window = self.config.window_size;
        let pos = win_start + window as u64;
        for candidate in self.index.candidates(fingerprint) {
            let Some(view) = self.active.match_view(candidate.block_id) else {
                continue;
            };
            let off = candidate.offset as usize;
            if &view[off..off + window] != stream.slice(win_start, pos) {
                continue;
            }

            let mut back: u64 = 0;
            while back < off as u64
                && win_start - back > committed
                && view[off - 1 - back as usize] == stream.byte(win_start - 1 - back)
            {
                back += 1;
            }

            let mut fwd: u64 = 0;
            loop {
                let block_pos = off + window + fwd as usize;
                if block_pos >= view.len() || !stream.ensure(source, pos + fwd + 1)? {
                    break;
                }
                if view[block_pos] != stream.byte(pos + fwd) {
                    break;
                }
                fwd += 1;
            }

            return Ok(Some(MatchHit {
                block_id: candidate.block_id,
                block_offset: candidate.offset - back as u32,
                input_start: win_start - back,
                len: back + window as u64 + fwd,
            }));
        }
        Ok(None)
    }

    /// Append literal bytes to the open block, splitting across block
    /// rotations, sealing and handing off full blocks as they occur.
    fn flush_literals(
        &mut self,
        mut bytes: &[u8],
        run: &mut LiteralRun,
        source: &mut dyn Chunkable,
    ) -> Result<()> {
        while !bytes.is_empty() {
            let (block_id, offset, taken) =
                self.active
                    .append_literal(bytes, &mut self.index, self.bloom.as_mut());
            if taken > 0 {
                run.extend(source, &mut self.stats, block_id, offset, taken as u32);
                self.stats.literal_bytes += taken as u64;
                bytes = &bytes[taken..];
            }
            if self.active.open_is_full() {
                let Some((id, data)) = self.active.seal_open() else {
                    return Err(Error::Internal("full open block vanished".into()));
                };
                self.stats.blocks_emitted += 1;
                self.sink.write_block(id, data)?;
                if let Some(callback) = &self.progress {
                    callback(self.stats);
                }
            } else if taken == 0 {
                return Err(Error::Internal("literal flush made no progress".into()));
            }
        }
        Ok(())
    }
}

/// An accepted, fully extended match.
struct MatchHit {
    block_id: u32,
    block_offset: u32,
    /// Source offset where the matched range begins (after backward extension)
    input_start: u64,
    len: u64,
}

/// Coalesces contiguous literal appends into one chunk reference per run.
#[derive(Default)]
struct LiteralRun {
    current: Option<ChunkRef>,
}

impl LiteralRun {
    /// Extend the run, or close it and start a new one when the append is
    /// not contiguous (block rotation).
    fn extend(
        &mut self,
        source: &mut dyn Chunkable,
        stats: &mut SegmenterStats,
        block_id: u32,
        offset: u32,
        length: u32,
    ) {
        if let Some(run) = &mut self.current {
            if run.block_id == block_id && run.offset + run.length == offset {
                run.length += length;
                return;
            }
        }
        self.flush(source, stats);
        self.current = Some(ChunkRef {
            block_id,
            offset,
            length,
        });
    }

    /// Emit the pending run, if any, as a chunk reference.
    fn flush(&mut self, source: &mut dyn Chunkable, stats: &mut SegmenterStats) {
        if let Some(run) = self.current.take() {
            source.add_chunk(run);
            stats.chunks_emitted += 1;
        }
    }
}

/// Sliding buffer over one source.
///
/// Holds `[base, base + buf.len())` of the source; the engine discards the
/// prefix below `committed` as it advances, so residency stays near the
/// pending-literal window plus read granularity (larger transiently while a
/// long forward extension looks ahead).
struct SourceStream {
    buf: Vec<u8>,
    base: u64,
    eof: bool,
}

impl SourceStream {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            base: 0,
            eof: false,
        }
    }

    fn end(&self) -> u64 {
        self.base + self.buf.len() as u64
    }

    /// Make bytes up to `upto` available; false when the source ends first.
    fn ensure(&mut self, source: &mut dyn Chunkable, upto: u64) -> Result<bool> {
        while self.end() < upto && !self.eof {
            let old_len = self.buf.len();
            self.buf.resize(old_len + READ_CHUNK, 0);
            let n = source
                .read(&mut self.buf[old_len..])
                .map_err(Error::SourceRead)?;
            self.buf.truncate(old_len + n);
            if n == 0 {
                self.eof = true;
            }
        }
        Ok(self.end() >= upto)
    }

    fn byte(&self, at: u64) -> u8 {
        self.buf[(at - self.base) as usize]
    }

    fn slice(&self, start: u64, end: u64) -> &[u8] {
        &self.buf[(start - self.base) as usize..(end - self.base) as usize]
    }

    /// Drop buffered bytes below `at` once enough have accumulated.
    fn discard_before(&mut self, at: u64) {
        let n = (at.min(self.end()).saturating_sub(self.base)) as usize;
        if n >= DISCARD_SLACK {
            self.buf.drain(..n);
            self.base += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkable::BufferChunkable;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use strata_writer::MemorySink;

    /// Memory sink the test keeps a handle to after the engine consumes it.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<MemorySink>>);

    impl SharedSink {
        fn block_bytes(&self, block_id: u32) -> Option<Vec<u8>> {
            self.0
                .lock()
                .unwrap()
                .block(block_id)
                .map(|data| data.to_vec())
        }

        fn block_count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl BlockSink for SharedSink {
        fn write_block(&mut self, block_id: u32, data: Bytes) -> strata_writer::Result<()> {
            self.0.lock().unwrap().write_block(block_id, data)
        }

        fn finish(&mut self) -> strata_writer::Result<()> {
            self.0.lock().unwrap().finish()
        }
    }

    fn test_config(window: usize, block_bits: u32, active: usize) -> SegmenterConfig {
        SegmenterConfig {
            window_size: window,
            block_size_bits: block_bits,
            max_active_blocks: active,
            ..Default::default()
        }
    }

    fn reconstruct(source: &BufferChunkable, sink: &SharedSink) -> Vec<u8> {
        let blocks: Vec<Option<Vec<u8>>> = (0..sink.block_count() as u32)
            .map(|id| sink.block_bytes(id))
            .collect();
        source
            .reconstruct(|id| blocks.get(id as usize).and_then(|b| b.as_deref()))
            .expect("reconstruction failed")
    }

    #[test]
    fn test_small_source_is_one_literal_chunk() {
        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(64, 10, 4), Box::new(sink.clone())).unwrap();

        let mut source = BufferChunkable::new("tiny", vec![0xAAu8; 50]);
        engine.add_chunkable(&mut source).unwrap();

        assert_eq!(source.chunks().len(), 1);
        assert_eq!(source.chunks()[0].length, 50);
        // The window never filled, so nothing was worth indexing.
        assert!(engine.index.is_empty());

        let stats = engine.finish().unwrap();
        assert_eq!(stats.literal_bytes, 50);
        assert_eq!(stats.match_chunks, 0);
        assert_eq!(reconstruct(&source, &sink), vec![0xAAu8; 50]);
    }

    #[test]
    fn test_repeated_byte_source_self_dedups() {
        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(8, 22, 1), Box::new(sink.clone())).unwrap();

        let mut source = BufferChunkable::new("xs", vec![b'x'; 10_000]);
        engine.add_chunkable(&mut source).unwrap();
        let stats = engine.finish().unwrap();

        // After roughly one window of literals everything references the
        // open block's own early offsets. The exact count depends on probe
        // alignment; it stays within a couple of windows.
        assert!(
            stats.literal_bytes <= 2 * 8,
            "literal_bytes = {}",
            stats.literal_bytes
        );
        assert_eq!(stats.literal_bytes + stats.matched_bytes, 10_000);
        assert!(source.chunks().iter().all(|c| c.block_id == 0));
        assert_eq!(reconstruct(&source, &sink), vec![b'x'; 10_000]);
    }

    #[test]
    fn test_identical_source_emits_no_literals() {
        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(16, 22, 4), Box::new(sink.clone())).unwrap();

        let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut first = BufferChunkable::new("first", data.clone());
        engine.add_chunkable(&mut first).unwrap();
        let literal_after_first = engine.stats().literal_bytes;

        let mut second = BufferChunkable::new("second", data.clone());
        engine.add_chunkable(&mut second).unwrap();
        let stats = engine.finish().unwrap();

        assert_eq!(stats.literal_bytes, literal_after_first);
        assert_eq!(second.chunked_bytes(), 4096);
        assert!(second.chunks().iter().all(|c| c.block_id == 0));
        assert_eq!(reconstruct(&first, &sink), data);
        assert_eq!(reconstruct(&second, &sink), data);
    }

    #[test]
    fn test_literal_runs_split_across_blocks() {
        let sink = SharedSink::default();
        // 512-byte blocks force rotations inside one source.
        let mut engine = Segmenter::new(test_config(16, 9, 4), Box::new(sink.clone())).unwrap();

        let data: Vec<u8> = (0..2000u32).map(|i| (i.wrapping_mul(0x9E3779B9) >> 11) as u8).collect();
        let mut source = BufferChunkable::new("split", data.clone());
        engine.add_chunkable(&mut source).unwrap();
        let stats = engine.finish().unwrap();

        assert!(stats.blocks_emitted >= 4);
        assert_eq!(source.chunked_bytes(), 2000);
        for chunk in source.chunks() {
            assert!(chunk.offset as usize + chunk.length as usize <= 512);
        }
        assert_eq!(reconstruct(&source, &sink), data);
    }

    #[test]
    fn test_exact_block_boundary_emits_no_empty_block() {
        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(16, 10, 4), Box::new(sink.clone())).unwrap();

        let data: Vec<u8> = (0..1024u32).map(|i| (i.wrapping_mul(48271) >> 7) as u8).collect();
        let mut source = BufferChunkable::new("exact", data.clone());
        engine.add_chunkable(&mut source).unwrap();

        let mut next = BufferChunkable::new("next", vec![0x11u8; 100]);
        engine.add_chunkable(&mut next).unwrap();
        engine.finish().unwrap();

        // First source fills block 0 exactly; the next source starts block 1.
        assert_eq!(sink.block_count(), 2);
        assert_eq!(sink.block_bytes(0).unwrap().len(), 1024);
        assert!(next.chunks().iter().all(|c| c.block_id == 1));
    }

    #[test]
    fn test_error_poisons_engine() {
        struct FailingSource;
        impl Chunkable for FailingSource {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk on fire"))
            }
            fn add_chunk(&mut self, _chunk: ChunkRef) {}
        }

        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(8, 10, 1), Box::new(sink)).unwrap();

        let err = engine.add_chunkable(&mut FailingSource).unwrap_err();
        assert!(matches!(err, Error::SourceRead(_)));

        let mut fine = BufferChunkable::new("fine", vec![1u8; 100]);
        assert!(matches!(
            engine.add_chunkable(&mut fine),
            Err(Error::Poisoned)
        ));
        assert!(matches!(engine.finish(), Err(Error::Poisoned)));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = SegmenterConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Segmenter::new(config, Box::new(MemorySink::new())),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_source_emits_nothing() {
        let sink = SharedSink::default();
        let mut engine = Segmenter::new(test_config(8, 10, 1), Box::new(sink.clone())).unwrap();
        let mut source = BufferChunkable::new("empty", Vec::<u8>::new());
        engine.add_chunkable(&mut source).unwrap();
        let stats = engine.finish().unwrap();

        assert!(source.chunks().is_empty());
        assert_eq!(stats.bytes_in, 0);
        assert_eq!(sink.block_count(), 0);
    }

    #[test]
    fn test_progress_callback_fires_on_seal() {
        let sink = SharedSink::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sightings = Arc::clone(&seen);
        let engine = Segmenter::new(test_config(8, 9, 4), Box::new(sink)).unwrap();
        let mut engine = engine.with_progress(Arc::new(move |stats: SegmenterStats| {
            sightings.lock().unwrap().push(stats.blocks_emitted);
        }));

        let data: Vec<u8> = (0..3000u32).map(|i| (i.wrapping_mul(31337) >> 5) as u8).collect();
        let mut source = BufferChunkable::new("progress", data);
        engine.add_chunkable(&mut source).unwrap();
        engine.finish().unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
