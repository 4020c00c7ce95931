//! Seeded RNG for reproducible noise and gap injection.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded random source owned by one mock device.
pub struct MockRng {
    inner: ChaCha8Rng,
}

impl MockRng {
    /// Seeded when `seed` is given, otherwise seeded from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { inner }
    }

    /// True with probability `rate` (clamped to `0.0..=1.0`).
    pub fn chance(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.gen::<f64>() < rate
    }

    /// Uniform value in `-1.0..1.0`.
    pub fn symmetric(&mut self) -> f64 {
        self.inner.gen_range(-1.0..1.0)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<ChaCha8Rng>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let mut a = MockRng::new(Some(42));
        let mut b = MockRng::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.symmetric(), b.symmetric());
        }
    }

    #[test]
    fn test_chance_bounds() {
        let mut rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| !rng.chance(0.0)));
        assert!((0..100).all(|_| rng.chance(1.0)));
    }

    #[test]
    fn test_chance_probability() {
        let mut rng = MockRng::new(Some(42));
        let hits = (0..10_000).filter(|_| rng.chance(0.3)).count();
        let observed = hits as f64 / 10_000.0;
        assert!((observed - 0.3).abs() < 0.03, "observed rate {observed}");
    }
}
