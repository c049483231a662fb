//! Bloom prefilter over window fingerprints
//!
//! Answers "this fingerprint is definitely not indexed" without touching the
//! block index. False positives fall through to a real index lookup; false
//! negatives never occur. The filter is cleared and rebuilt from the live
//! index whenever a block is retired.

/// Probe positions per fingerprint
const PROBES: u32 = 2;

/// Smallest filter the constructor will build, in bits
const MIN_BITS: u64 = 1024;

/// Multiplicative mixers for double hashing
const MIX_A: u32 = 0x9E37_79B9;
const MIX_B: u32 = 0x85EB_CA6B;

/// Fixed-size bit array with double-hashed probe positions.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    mask: u64,
}

impl BloomFilter {
    /// Build a filter with at least `bits` bits, rounded up to a power of two.
    pub fn with_bits(bits: u64) -> Self {
        let bits = bits.max(MIN_BITS).next_power_of_two();
        Self {
            words: vec![0u64; (bits / 64) as usize],
            mask: bits - 1,
        }
    }

    /// Size the filter for the configured index load.
    ///
    /// `entries` is the projected number of live index entries
    /// (`entries_per_active_block * max_active_blocks`); `factor` is bits per
    /// entry. A factor of zero disables the prefilter: callers get `None` and
    /// fall back to direct index lookups.
    pub fn for_load(entries: u64, factor: u32) -> Option<Self> {
        if factor == 0 {
            return None;
        }
        Some(Self::with_bits(entries.saturating_mul(factor as u64)))
    }

    /// Number of bits in the filter
    pub fn bits(&self) -> u64 {
        self.mask + 1
    }

    #[inline]
    fn positions(&self, fingerprint: u32) -> [u64; PROBES as usize] {
        let a = fingerprint.wrapping_mul(MIX_A) as u64;
        // Forced odd so the second hash strides through the whole table.
        let b = (fingerprint.wrapping_mul(MIX_B) | 1) as u64;
        let mut out = [0u64; PROBES as usize];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = a.wrapping_add(b.wrapping_mul(i as u64)) & self.mask;
        }
        out
    }

    /// Mark a fingerprint as present
    #[inline]
    pub fn insert(&mut self, fingerprint: u32) {
        for pos in self.positions(fingerprint) {
            self.words[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
    }

    /// Returns false only if the fingerprint was never inserted
    #[inline]
    pub fn test(&self, fingerprint: u32) -> bool {
        self.positions(fingerprint)
            .into_iter()
            .all(|pos| self.words[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0)
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Clear and re-insert the given fingerprints
    pub fn rebuild<I: IntoIterator<Item = u32>>(&mut self, fingerprints: I) {
        self.clear();
        for fp in fingerprints {
            self.insert(fp);
        }
    }
}
