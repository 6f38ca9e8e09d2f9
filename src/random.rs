//! # `random` – Unified RNG Abstraction
//!
//! Every stochastic operator in `dcgp` (gene redraw, active-gene sampling,
//! mutation-strength shuffling in the memetic search, …) depends on an RNG,
//! but call sites shouldn't have to juggle the `rand` crate's API directly.
//! The **`RandomGenerator`** trait offers a single façade while still giving
//! access to the underlying RNG when needed.
//!
//! | Type | Backed by | Intended for |
//! |------|-----------|--------------|
//! | [`DcgpRandomGenerator`] | `rand::rngs::StdRng` | Production — reproducible with a seed. |
//! | [`NoopRandomGenerator`] + `TestDummyRng` | stub → panics on direct RNG calls | Unit tests where randomness isn't exercised but the trait is required. |
//!
//! ```rust
//! use dcgp::random::{DcgpRandomGenerator, RandomGenerator};
//!
//! let mut rng = DcgpRandomGenerator::new_from_seed(Some(42));
//! if rng.gen_bool(0.1) {
//!     println!("lucky mutation");
//! }
//! ```
use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

/// A trait defining a unified interface for generating random values,
/// used across kernels, expressions, and the memetic search.
pub trait RandomGenerator {
    type R: RngCore + Rng;

    /// Generates a random `usize` in the range `[min, max)` using the underlying RNG.
    fn gen_range_usize(&mut self, min: usize, max: usize) -> usize {
        self.rng().random_range(min..max)
    }

    /// Generates a random `f64` in the range `[min, max)` using the underlying RNG.
    fn gen_range_f64(&mut self, min: f64, max: f64) -> f64 {
        self.rng().random_range(min..max)
    }

    /// Generates a random boolean value with probability `p` of being `true`.
    fn gen_bool(&mut self, p: f64) -> bool {
        self.rng().random_bool(p)
    }

    /// Generates a random probability as an `f64` in the range `[0.0, 1.0)`.
    fn gen_probability(&mut self) -> f64 {
        self.rng().random::<f64>()
    }

    fn shuffle_vec_usize(&mut self, vector: &mut Vec<usize>) {
        vector.shuffle(self.rng())
    }

    fn choose_usize<'a>(&mut self, vector: &'a [usize]) -> Option<&'a usize> {
        vector.choose(self.rng())
    }

    /// Draws a `usize` uniformly from `[min, max)` excluding `exclude`, by
    /// rejection sampling. If the range admits only `exclude`, returns `None`
    /// (caller treats this as a no-op mutation).
    fn gen_range_excluding(&mut self, min: usize, max: usize, exclude: usize) -> Option<usize> {
        if max <= min || (max - min) <= 1 {
            return None;
        }
        loop {
            let candidate = self.gen_range_usize(min, max);
            if candidate != exclude {
                return Some(candidate);
            }
        }
    }

    /// Returns a mutable reference to the underlying RNG implementing `RngCore`.
    fn rng(&mut self) -> &mut Self::R;
}

/// The production implementation of `RandomGenerator` using `StdRng`.
#[derive(Debug, Clone)]
pub struct DcgpRandomGenerator {
    rng: StdRng,
}

impl DcgpRandomGenerator {
    /// Creates a new `DcgpRandomGenerator` with the provided `StdRng`.
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    pub fn new_from_seed(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64);
        Self { rng }
    }
}

impl RandomGenerator for DcgpRandomGenerator {
    type R = StdRng;
    fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// A dummy implementation of `RandomGenerator` for tests that exercise a
/// deterministic code path and must not touch the RNG.
pub struct TestDummyRng;

impl RngCore for TestDummyRng {
    fn next_u32(&mut self) -> u32 {
        unimplemented!("not used in this test")
    }

    fn next_u64(&mut self) -> u64 {
        unimplemented!("not used in this test")
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        unimplemented!("not used in this test")
    }
}

#[derive(Default)]
pub struct NoopRandomGenerator {
    dummy: TestDummyRng,
}

impl NoopRandomGenerator {
    pub fn new() -> Self {
        Self {
            dummy: TestDummyRng,
        }
    }
}

impl RandomGenerator for NoopRandomGenerator {
    type R = TestDummyRng;
    fn rng(&mut self) -> &mut TestDummyRng {
        &mut self.dummy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_range_usize_is_in_bounds() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(42));
        for _ in 0..100 {
            let value = rng.gen_range_usize(10, 20);
            assert!(value >= 10 && value < 20);
        }
    }

    #[test]
    fn gen_range_excluding_never_returns_excluded_value() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(7));
        for _ in 0..200 {
            let value = rng.gen_range_excluding(0, 3, 1).unwrap();
            assert_ne!(value, 1);
            assert!(value == 0 || value == 2);
        }
    }

    #[test]
    fn gen_range_excluding_returns_none_when_only_value_is_excluded() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(7));
        assert_eq!(rng.gen_range_excluding(5, 6, 5), None);
    }

    #[test]
    fn gen_bool_respects_extremes() {
        let mut rng = DcgpRandomGenerator::new_from_seed(Some(1));
        assert!(rng.gen_bool(1.0));
        assert!(!rng.gen_bool(0.0));
    }
}
