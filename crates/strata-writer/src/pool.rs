//! Compressing block sink backed by a worker pool
//!
//! Blocks arrive from the producer in ascending id order and are compressed
//! on a small pool of worker threads. Compression may complete out of order;
//! a reorder buffer keyed by block id guarantees the frame stream is written
//! strictly by ascending id regardless.
//!
//! Back-pressure: the sink tracks the uncompressed bytes of every block that
//! has been accepted but not yet framed. When that total would exceed the
//! configured budget, [`CompressingSink::write_block`] blocks the producer
//! until enough frames have been flushed.

use crate::compress::Compression;
use crate::frame::{write_frame, write_header};
use crate::sink::BlockSink;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Configuration for a [`CompressingSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressingSinkConfig {
    /// Codec applied to every block
    pub compression: Compression,

    /// Compression level (zstd levels 1-22; ignored by other codecs)
    pub compression_level: i32,

    /// Worker threads; 0 selects available parallelism capped at 4
    pub workers: usize,

    /// Budget of in-flight uncompressed bytes before the producer blocks
    pub memory_limit: usize,
}

impl Default for CompressingSinkConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Zstd,
            compression_level: 3,
            workers: 0,
            memory_limit: 256 * 1024 * 1024,
        }
    }
}

impl CompressingSinkConfig {
    fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4)
    }
}

struct Job {
    block_id: u32,
    data: Bytes,
}

struct State<W> {
    writer: Option<W>,
    /// Compressed payloads waiting for their turn: id -> (uncompressed_len, payload)
    pending: BTreeMap<u32, (u32, Vec<u8>)>,
    next_flush: u32,
    in_flight: usize,
    wrote_header: bool,
    failed: Option<Error>,
    codec: Compression,
}

struct Shared<W> {
    state: Mutex<State<W>>,
    space: Condvar,
}

impl<W: Write> Shared<W> {
    /// Write every frame that is next in id order. Caller holds the state lock.
    fn flush_ready(&self, state: &mut State<W>) {
        while let Some((uncompressed_len, payload)) = state.pending.remove(&state.next_flush) {
            let id = state.next_flush;
            let codec = state.codec;
            let need_header = !state.wrote_header;
            let result = match state.writer.as_mut() {
                Some(writer) => (|| -> Result<()> {
                    if need_header {
                        write_header(writer)?;
                    }
                    write_frame(writer, id, codec, uncompressed_len, &payload)
                })(),
                None => Err(Error::Finished),
            };
            match result {
                Ok(()) => {
                    state.wrote_header = true;
                    state.in_flight -= uncompressed_len as usize;
                    state.next_flush += 1;
                }
                Err(e) => {
                    if state.failed.is_none() {
                        state.failed = Some(e);
                    }
                    break;
                }
            }
        }
        self.space.notify_all();
    }
}

/// Block sink that compresses on a worker pool and writes ordered frames.
pub struct CompressingSink<W: Write + Send + 'static> {
    shared: Arc<Shared<W>>,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    config: CompressingSinkConfig,
    next_submit: u32,
    finished: bool,
}

impl<W: Write + Send + 'static> CompressingSink<W> {
    /// Create a sink writing a framed block stream into `writer`.
    pub fn new(writer: W, config: CompressingSinkConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                writer: Some(writer),
                pending: BTreeMap::new(),
                next_flush: 0,
                in_flight: 0,
                wrote_header: false,
                failed: None,
                codec: config.compression,
            }),
            space: Condvar::new(),
        });

        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.effective_workers())
            .map(|_| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                let codec = config.compression;
                let level = config.compression_level;
                thread::spawn(move || loop {
                    let job = {
                        let rx = rx.lock();
                        rx.recv()
                    };
                    let Ok(job) = job else { break };
                    let compressed = codec.compress(&job.data, level);
                    let mut state = shared.state.lock();
                    match compressed {
                        Ok(payload) => {
                            state
                                .pending
                                .insert(job.block_id, (job.data.len() as u32, payload));
                            shared.flush_ready(&mut state);
                        }
                        Err(e) => {
                            // Drop the payload but release its budget so the
                            // producer wakes up and observes the failure.
                            state.in_flight -= job.data.len();
                            if state.failed.is_none() {
                                state.failed = Some(e);
                            }
                            shared.space.notify_all();
                        }
                    }
                })
            })
            .collect();

        Self {
            shared,
            tx: Some(tx),
            workers,
            config,
            next_submit: 0,
            finished: false,
        }
    }

    /// Tear down the sink and return the inner writer.
    ///
    /// Must be called after [`finish`](BlockSink::finish).
    pub fn into_inner(self) -> Result<W> {
        if !self.finished {
            return Err(Error::Finished);
        }
        let mut state = self.shared.state.lock();
        state.writer.take().ok_or(Error::WorkerLost)
    }

    /// The sink configuration
    pub fn config(&self) -> &CompressingSinkConfig {
        &self.config
    }

    fn join_workers(&mut self) -> Result<()> {
        self.tx.take();
        let mut lost = false;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                lost = true;
            }
        }
        if lost {
            return Err(Error::WorkerLost);
        }
        Ok(())
    }
}

impl<W: Write + Send + 'static> BlockSink for CompressingSink<W> {
    fn write_block(&mut self, block_id: u32, data: Bytes) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        if block_id != self.next_submit {
            return Err(Error::UnorderedBlock {
                expected: self.next_submit,
                got: block_id,
            });
        }

        {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(e) = state.failed.take() {
                    return Err(e);
                }
                if state.in_flight == 0
                    || state.in_flight + data.len() <= self.config.memory_limit
                {
                    break;
                }
                self.shared.space.wait(&mut state);
            }
            state.in_flight += data.len();
        }

        let tx = self.tx.as_ref().ok_or(Error::WorkerLost)?;
        tx.send(Job { block_id, data }).map_err(|_| Error::WorkerLost)?;
        self.next_submit = block_id + 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.join_workers()?;
        self.finished = true;

        let mut state = self.shared.state.lock();
        if let Some(e) = state.failed.take() {
            return Err(e);
        }
        if !state.pending.is_empty() || state.next_flush != self.next_submit {
            return Err(Error::Corrupted(format!(
                "{} of {} blocks flushed at finish",
                state.next_flush, self.next_submit
            )));
        }
        if !state.wrote_header {
            let writer = state.writer.as_mut().ok_or(Error::WorkerLost)?;
            write_header(writer)?;
            state.wrote_header = true;
        }
        let writer = state.writer.as_mut().ok_or(Error::WorkerLost)?;
        writer.flush()?;
        tracing::debug!(
            blocks = self.next_submit,
            codec = ?self.config.compression,
            "block stream drained"
        );
        Ok(())
    }
}

impl<W: Write + Send + 'static> Drop for CompressingSink<W> {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
