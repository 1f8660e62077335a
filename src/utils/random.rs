//! Deterministic random number generation.
//!
//! A region owns exactly one of these generators; every sampled decision
//! (proximal pool placement, permanence initialization, learning-cell
//! subsets) goes through it, so a fixed seed plus a fixed input stream
//! reproduces the region state stream exactly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A seeded pseudo-random number generator.
///
/// Uses ChaCha20 for high-quality randomness with reproducible behavior
/// across platforms when seeded.
///
/// # Example
///
/// ```rust
/// use veles::utils::Random;
///
/// let mut rng = Random::new(42);
///
/// let n = rng.get_uint32();
/// let f = rng.get_real64();
///
/// let mut items: Vec<u32> = (0..10).collect();
/// rng.shuffle(&mut items);
/// let subset = rng.sample(items, 3);
/// assert_eq!(subset.len(), 3);
/// ```
pub struct Random {
    rng: ChaCha20Rng,
    seed: u64,
}

impl Random {
    /// Creates a new random number generator with the given seed.
    ///
    /// A negative seed draws entropy from the OS instead; any non-negative
    /// seed (including 0) is used verbatim and is fully deterministic.
    #[must_use]
    pub fn new(seed: i64) -> Self {
        let actual_seed = if seed < 0 {
            rand::thread_rng().gen()
        } else {
            seed as u64
        };

        Self {
            rng: ChaCha20Rng::seed_from_u64(actual_seed),
            seed: actual_seed,
        }
    }

    /// Returns the seed used for this generator.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates a random u32.
    pub fn get_uint32(&mut self) -> u32 {
        self.rng.gen()
    }

    /// Generates a random usize in the range `[0, n)`; 0 when `n == 0`.
    pub fn get_usize(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.gen_range(0..n)
    }

    /// Generates a random f32 in `[0, 1)`.
    pub fn get_real32(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Generates a random f64 in `[0, 1)`.
    pub fn get_real64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Shuffles a slice in place using Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        if n <= 1 {
            return;
        }

        for i in (1..n).rev() {
            let j = self.get_usize(i + 1);
            slice.swap(i, j);
        }
    }

    /// Samples `k` unique items from a collection without replacement.
    ///
    /// If `k >= items.len()`, returns a shuffled copy of all items.
    pub fn sample<T: Clone>(&mut self, mut items: Vec<T>, k: usize) -> Vec<T> {
        let n = items.len();
        if k >= n {
            self.shuffle(&mut items);
            return items;
        }

        // Partial Fisher-Yates: only the first k slots need settling.
        for i in 0..k {
            let j = self.get_usize(n - i) + i;
            items.swap(i, j);
        }

        items.truncate(k);
        items
    }

    /// Returns a normally distributed random number (Box-Muller transform).
    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.get_real64().max(f64::MIN_POSITIVE);
        let u2 = self.get_real64();

        let mag = std_dev * (-2.0 * u1.ln()).sqrt();
        let z0 = mag * (2.0 * std::f64::consts::PI * u2).cos();

        mean + z0
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clone for Random {
    fn clone(&self) -> Self {
        Self {
            rng: self.rng.clone(),
            seed: self.seed,
        }
    }
}

impl std::fmt::Debug for Random {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Random")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut rng1 = Random::new(42);
        let mut rng2 = Random::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.get_uint32(), rng2.get_uint32());
        }
    }

    #[test]
    fn test_different_seeds() {
        let mut rng1 = Random::new(42);
        let mut rng2 = Random::new(43);

        let mut same = true;
        for _ in 0..100 {
            if rng1.get_uint32() != rng2.get_uint32() {
                same = false;
                break;
            }
        }
        assert!(!same);
    }

    #[test]
    fn test_usize_range() {
        let mut rng = Random::new(42);

        for _ in 0..1000 {
            let v = rng.get_usize(20);
            assert!(v < 20);
        }
        assert_eq!(rng.get_usize(0), 0);
    }

    #[test]
    fn test_shuffle_preserves_elements() {
        let mut rng = Random::new(42);
        let original: Vec<u32> = (0..100).collect();
        let mut shuffled = original.clone();
        rng.shuffle(&mut shuffled);

        assert_ne!(original, shuffled);

        let mut sorted = shuffled.clone();
        sorted.sort_unstable();
        assert_eq!(original, sorted);
    }

    #[test]
    fn test_sample() {
        let mut rng = Random::new(42);
        let items: Vec<u32> = (0..100).collect();
        let sampled = rng.sample(items.clone(), 10);

        assert_eq!(sampled.len(), 10);

        let mut unique = sampled.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 10);

        for item in &sampled {
            assert!(items.contains(item));
        }
    }

    #[test]
    fn test_sample_more_than_available() {
        let mut rng = Random::new(42);
        let items: Vec<u32> = (0..5).collect();
        let sampled = rng.sample(items, 10);
        assert_eq!(sampled.len(), 5);
    }

    #[test]
    fn test_normal_distribution() {
        let mut rng = Random::new(42);
        let mut sum = 0.0;
        let n = 10000;

        for _ in 0..n {
            sum += rng.normal(0.0, 1.0);
        }

        let mean = sum / f64::from(n);
        assert!(mean.abs() < 0.1);
    }
}
