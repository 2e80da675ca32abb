//! Seeded RNG for **u-probability sampling only** (no OS entropy).
//!
//! The sampler is seeded from the spec hash, so the random-pair draw in
//! Fellegi-Sunter training is a pure function of the spec.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// Newtype over ChaCha20Rng for the training sampler.
pub struct SamplerRng(ChaCha20Rng);

impl SamplerRng {
    /// Seed from a lowercase-hex digest (the spec hash). Uses the first
    /// 32 bytes of the decoded digest; shorter input is zero-padded.
    pub fn from_hash_hex(hash: &str) -> SamplerRng {
        let mut seed = [0u8; 32];
        let bytes = hash.as_bytes();
        for (i, slot) in seed.iter_mut().enumerate() {
            let hi = bytes.get(i * 2).copied().and_then(hex_nybble);
            let lo = bytes.get(i * 2 + 1).copied().and_then(hex_nybble);
            if let (Some(h), Some(l)) = (hi, lo) {
                *slot = (h << 4) | l;
            }
        }
        SamplerRng(ChaCha20Rng::from_seed(seed))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    /// Uniform index in `0..n` via rejection sampling (no modulo bias).
    /// Returns `None` when `n == 0`.
    pub fn index(&mut self, n: u64) -> Option<u64> {
        if n == 0 {
            return None;
        }
        let zone = u64::MAX - (u64::MAX % n);
        loop {
            let x = self.0.next_u64();
            if x < zone {
                return Some(x % n);
            }
        }
    }
}

fn hex_nybble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
