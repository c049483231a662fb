//! Rolling window fingerprints
//!
//! The scanner and every active block fingerprint their content with the same
//! cyclic-polynomial (buzhash) function: a 32-bit value over the last
//! `window_size` bytes, updated in O(1) per byte shift. Equal window content
//! always produces equal fingerprints; the converse is only probabilistic, so
//! every candidate match is byte-verified before use.

/// Incremental fingerprint over a fixed-width byte window.
///
/// After [`init`](RollingHasher::init) on `b[0..W]`, rolling out `b[0]` and
/// in `b[W]` must yield the same value as a fresh `init` on `b[1..W+1]`.
/// Implementations must be deterministic and stable across runs.
pub trait RollingHasher: Clone + Send {
    /// Create a hasher for the given window size
    fn for_window(window_size: usize) -> Self;

    /// Forget all input; the next `window_size` bytes prime a fresh window
    fn reset(&mut self);

    /// Feed one priming byte (window not yet full)
    fn update(&mut self, byte: u8);

    /// Shift the window: drop `out`, append `inp`
    fn roll(&mut self, out: u8, inp: u8);

    /// Fingerprint of the current window
    fn value(&self) -> u32;

    /// Prime the hasher on a complete window
    fn init(&mut self, window: &[u8]) {
        self.reset();
        for &b in window {
            self.update(b);
        }
    }
}

/// Byte substitution table shared by every [`CyclicHasher`].
///
/// Filled by a xorshift generator from a fixed seed so fingerprints are
/// stable across runs, builds and platforms.
const fn byte_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state: u32 = 0x6A09_E667;
    let mut i = 0;
    while i < 256 {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        table[i] = state;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = byte_table();

/// Cyclic-polynomial rolling hash (buzhash).
///
/// `roll` computes `rotl(h, 1) ^ rotl(T[out], W) ^ T[in]`, which cancels the
/// contribution the outgoing byte made `W` shifts ago.
#[derive(Debug, Clone)]
pub struct CyclicHasher {
    hash: u32,
    /// Window size modulo 32, precomputed for the cancel rotation
    out_rot: u32,
}

impl RollingHasher for CyclicHasher {
    fn for_window(window_size: usize) -> Self {
        Self {
            hash: 0,
            out_rot: (window_size % 32) as u32,
        }
    }

    fn reset(&mut self) {
        self.hash = 0;
    }

    #[inline]
    fn update(&mut self, byte: u8) {
        self.hash = self.hash.rotate_left(1) ^ TABLE[byte as usize];
    }

    #[inline]
    fn roll(&mut self, out: u8, inp: u8) {
        self.hash = self.hash.rotate_left(1)
            ^ TABLE[out as usize].rotate_left(self.out_rot)
            ^ TABLE[inp as usize];
    }

    #[inline]
    fn value(&self) -> u32 {
        self.hash
    }
}
