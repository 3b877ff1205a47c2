//! Deterministic randomness for simulation

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Randomness source used by fault injection and simulation harnesses.
pub trait Rng: Send {
    /// Generate a random u64
    fn next_u64(&mut self) -> u64;

    /// Generate a random number in range [min, max)
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

/// Seeded ChaCha8 generator: same seed, same sequence.
pub struct SimulatedRng {
    inner: ChaCha8Rng,
}

impl SimulatedRng {
    pub fn new(seed: u64) -> Self {
        SimulatedRng {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Signed value in [min, max)
    pub fn gen_signed(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        let span = max.abs_diff(min);
        min.wrapping_add(self.gen_range(0, span) as i64)
    }
}

impl Rng for SimulatedRng {
    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        use rand::Rng;
        if min >= max {
            return min;
        }
        self.inner.gen_range(min..max)
    }
}
