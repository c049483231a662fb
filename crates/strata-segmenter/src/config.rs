//! Segmenter configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tunables for the segmenter engine, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Bytes in the rolling-hash window. Sets match granularity: no
    /// duplicate shorter than this is ever found.
    pub window_size: usize,

    /// Only every `2^window_step_shift`-th window position is indexed and
    /// probed. Larger values shrink the index and lose recall.
    pub window_step_shift: u32,

    /// Each emitted block holds up to `2^block_size_bits` bytes.
    pub block_size_bits: u32,

    /// How many sealed blocks stay match-eligible at once. Together with the
    /// block size this is the dedup horizon.
    pub max_active_blocks: usize,

    /// Soft cap on buffered uncompressed bytes across the engine and the
    /// writer queue; the writer back-pressures the engine against it.
    pub memory_limit: usize,

    /// Prefilter bits per index entry; 0 disables the bloom filter and
    /// every probe goes straight to the index.
    pub bloom_filter_size_factor: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            window_step_shift: 1,
            block_size_bits: 22,     // 4 MiB blocks
            max_active_blocks: 1,
            memory_limit: 256 << 20, // 256 MiB
            bloom_filter_size_factor: 8,
        }
    }
}

impl SegmenterConfig {
    /// Preset with small blocks, handy for tests and small corpora
    pub fn small_blocks() -> Self {
        Self {
            block_size_bits: 16, // 64 KiB blocks
            max_active_blocks: 4,
            ..Default::default()
        }
    }

    /// Preset for large corpora with a deep dedup horizon
    pub fn large_corpus() -> Self {
        Self {
            block_size_bits: 24, // 16 MiB blocks
            max_active_blocks: 8,
            memory_limit: 1 << 30,
            ..Default::default()
        }
    }

    /// Capacity of one block in bytes
    pub fn block_capacity(&self) -> usize {
        1usize << self.block_size_bits
    }

    /// Projected live index entries at full load
    pub fn index_load(&self) -> u64 {
        let per_block = (self.block_capacity() as u64) >> self.window_step_shift;
        per_block.max(1) * self.max_active_blocks as u64
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window_size must be >= 1".into()));
        }
        if !(9..=30).contains(&self.block_size_bits) {
            return Err(Error::InvalidConfig(format!(
                "block_size_bits {} out of range [9, 30]",
                self.block_size_bits
            )));
        }
        if self.window_size > self.block_capacity() {
            return Err(Error::InvalidConfig(format!(
                "window_size {} exceeds block capacity {}",
                self.window_size,
                self.block_capacity()
            )));
        }
        if self.window_step_shift > 16 {
            return Err(Error::InvalidConfig(format!(
                "window_step_shift {} out of range [0, 16]",
                self.window_step_shift
            )));
        }
        if self.max_active_blocks == 0 {
            return Err(Error::InvalidConfig("max_active_blocks must be >= 1".into()));
        }
        // The engine alone buffers up to max_active_blocks sealed blocks plus
        // the open one; a budget below that can never be honored.
        let engine_resident = (self.max_active_blocks + 1) * self.block_capacity();
        if engine_resident > self.memory_limit {
            return Err(Error::InvalidConfig(format!(
                "memory_limit {} below engine residency {} \
                 ((max_active_blocks + 1) * block capacity)",
                self.memory_limit, engine_resident
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SegmenterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_capacity(), 4 << 20);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SegmenterConfig::small_blocks().validate().is_ok());
        assert!(SegmenterConfig::large_corpus().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = SegmenterConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_block_size_bits_range() {
        for bits in [8, 31] {
            let config = SegmenterConfig {
                block_size_bits: bits,
                memory_limit: usize::MAX,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "bits {bits} accepted");
        }
    }

    #[test]
    fn test_window_larger_than_block_rejected() {
        let config = SegmenterConfig {
            window_size: 1024,
            block_size_bits: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_active_blocks_rejected() {
        let config = SegmenterConfig {
            max_active_blocks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_limit_must_cover_residency() {
        let config = SegmenterConfig {
            block_size_bits: 20,
            max_active_blocks: 4,
            memory_limit: 4 << 20, // needs 5 MiB
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_index_load() {
        let config = SegmenterConfig {
            block_size_bits: 10,
            window_step_shift: 1,
            max_active_blocks: 4,
            ..Default::default()
        };
        assert_eq!(config.index_load(), 4 * 512);
    }
}
