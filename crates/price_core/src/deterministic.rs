//! Seeded pseudo-randomness shared by the split sampler and test fixtures

use std::num::Wrapping;

/// Linear Congruential Generator for deterministic pseudo-randomness
/// Uses constants from Numerical Recipes (glibc)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<i64>,
}

impl LcgRng {
    // LCG constants (compatible with glibc)
    const MULTIPLIER: i64 = 1103515245;
    const INCREMENT: i64 = 12345;
    const MODULUS: i64 = 1 << 31;

    pub fn new(seed: i64) -> Self {
        Self {
            state: Wrapping(seed.abs() % Self::MODULUS),
        }
    }

    /// Next value in `[0, MODULUS)`
    pub fn next_i64(&mut self) -> i64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        (self.state.0 & (Self::MODULUS - 1)).abs()
    }

    /// Next value in `[0, max)`
    pub fn next_range(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        (self.next_i64() as u64 % max as u64) as usize
    }

    /// Next value in `[0, 1)`, driven by the high bits of the state
    pub fn next_f64(&mut self) -> f64 {
        self.next_i64() as f64 / Self::MODULUS as f64
    }

    /// Fisher–Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i + 1);
            items.swap(i, j);
        }
    }
}
