//! strata-segmenter: content-defined segmentation with corpus-wide dedup
//!
//! The segmenter turns a stream of input files into a sequence of image
//! blocks while discovering byte-level duplication across the entire input.
//! Every input byte ends up either as a literal appended to a block or as a
//! chunk reference `(block, offset, length)` into content that is already in
//! a live block, the current one included.
//!
//! # Pipeline
//!
//! ```text
//! sources -> Segmenter (rolling hash + bloom + index + active blocks)
//!         -> chunk refs per source (Chunkable::add_chunk)
//!         -> sealed blocks, ascending ids -> BlockSink (strata-writer)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_segmenter::{BufferChunkable, Segmenter, SegmenterConfig};
//! use strata_writer::MemorySink;
//!
//! let mut engine = Segmenter::new(SegmenterConfig::default(), Box::new(MemorySink::new()))?;
//! let mut file = BufferChunkable::new("etc/passwd", bytes.clone());
//! engine.add_chunkable(&mut file)?;
//! let stats = engine.finish()?;
//! println!("dedup ratio {:.1}%", stats.dedup_ratio() * 100.0);
//! ```
//!
//! The engine is single-threaded; parallelism lives behind the writer
//! boundary, where sealed blocks are compressed on a worker pool. Sealed
//! block bytes are shared zero-copy between match verification here and the
//! writer's compressors.

#![warn(missing_docs)]

mod active;

pub mod bloom;
pub mod chunkable;
pub mod config;
pub mod engine;
pub mod index;
pub mod progress;
pub mod rolling;

pub use chunkable::{BufferChunkable, ChunkRef, Chunkable};
pub use config::SegmenterConfig;
pub use engine::Segmenter;
pub use progress::{ProgressCallback, SegmenterStats};
pub use rolling::{CyclicHasher, RollingHasher};

/// Segmenter error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration parameter is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading from an input source failed
    #[error("source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    /// The downstream block writer failed
    #[error("block writer failed: {0}")]
    Writer(#[from] strata_writer::Error),

    /// A previous failure left the engine unusable
    #[error("engine poisoned by an earlier failure")]
    Poisoned,

    /// Internal invariant violated; this is a bug
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Result type for segmenter operations
pub type Result<T> = std::result::Result<T, Error>;
