//! strata-writer: the block writer boundary of a strata image
//!
//! The segmenter hands finished blocks to a [`BlockSink`] in strictly
//! ascending block-id order. This crate provides the sink trait and the two
//! implementations the rest of the toolkit needs:
//!
//! - [`MemorySink`]: keeps raw blocks in memory. Used by tests and by
//!   read-side tooling that wants uncompressed block bytes.
//! - [`CompressingSink`]: compresses blocks on a worker pool and writes them
//!   as an ordered frame stream. Back-pressures the producer through a
//!   bounded budget of in-flight uncompressed bytes.
//!
//! Compression may finish out of order across workers; the frame stream is
//! still emitted strictly by ascending block id.

#![warn(missing_docs)]

pub mod compress;
pub mod frame;
pub mod pool;
pub mod sink;

pub use compress::Compression;
pub use frame::{read_image, BlockFrame, MAGIC, VERSION};
pub use pool::{CompressingSink, CompressingSinkConfig};
pub use sink::{BlockSink, MemorySink};

/// Writer error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid magic bytes at the start of an image stream
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// Unsupported image stream version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Corrupted or truncated image stream
    #[error("corrupted image stream: {0}")]
    Corrupted(String),

    /// Blocks must arrive in ascending id order
    #[error("block {got} written out of order (expected {expected})")]
    UnorderedBlock {
        /// Id the sink expected next
        expected: u32,
        /// Id that actually arrived
        got: u32,
    },

    /// A compression worker terminated without completing its work
    #[error("compression worker lost")]
    WorkerLost,

    /// Sink already finished
    #[error("sink already finished")]
    Finished,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for writer operations
pub type Result<T> = std::result::Result<T, Error>;
