//! Progress counters and the observer callback

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Observer invoked with a counter snapshot at block-seal and
/// source-completion moments. Purely informational; nothing feeds back into
/// the engine.
pub type ProgressCallback = Arc<dyn Fn(SegmenterStats) + Send + Sync>;

/// Monotone counters describing a segmentation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterStats {
    /// Input bytes consumed across all sources
    pub bytes_in: u64,
    /// Bytes copied verbatim into blocks
    pub literal_bytes: u64,
    /// Bytes represented by references into earlier content
    pub matched_bytes: u64,
    /// Blocks handed to the writer
    pub blocks_emitted: u64,
    /// Chunk references emitted, literal runs included
    pub chunks_emitted: u64,
    /// Chunk references that point at deduplicated content
    pub match_chunks: u64,
}

impl SegmenterStats {
    /// Fraction of input bytes eliminated by deduplication, in `[0, 1]`
    pub fn dedup_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            return 0.0;
        }
        1.0 - (self.literal_bytes as f64 / self.bytes_in as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run_ratio_is_zero() {
        assert_eq!(SegmenterStats::default().dedup_ratio(), 0.0);
    }

    #[test]
    fn test_ratio_bounds() {
        let all_literal = SegmenterStats {
            bytes_in: 100,
            literal_bytes: 100,
            ..Default::default()
        };
        assert_eq!(all_literal.dedup_ratio(), 0.0);

        let all_matched = SegmenterStats {
            bytes_in: 100,
            literal_bytes: 0,
            matched_bytes: 100,
            ..Default::default()
        };
        assert_eq!(all_matched.dedup_ratio(), 1.0);

        let half = SegmenterStats {
            bytes_in: 100,
            literal_bytes: 50,
            matched_bytes: 50,
            ..Default::default()
        };
        assert!((half.dedup_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
