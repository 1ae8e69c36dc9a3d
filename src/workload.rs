// Randomized workload generation over bounded candidate sets

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bench::config::WorkloadConfig;

/// Fixed pool of generated elements a workload draws from.
///
/// Elements are generated independently, so two of them may collide;
/// collisions are kept rather than regenerated.
#[derive(Debug, Clone)]
pub struct CandidateSet<T> {
    elements: Vec<T>,
}

impl<T> CandidateSet<T> {
    /// Build a set of `count` elements produced by `generate`
    pub fn build<R, F>(count: usize, rng: &mut R, mut generate: F) -> Self
    where
        R: Rng,
        F: FnMut(&mut R) -> T,
    {
        let elements = (0..count).map(|_| generate(rng)).collect();
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, element: &T) -> bool
    where
        T: PartialEq,
    {
        self.elements.contains(element)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }
}

/// Random alphanumeric string of `len` characters
pub fn random_string<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Random byte sequence of `len` bytes
pub fn random_bytes<R: Rng>(rng: &mut R, len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rng.fill(buf.as_mut_slice());
    Bytes::from(buf)
}

/// Infinite source of elements chosen uniformly at random, with replacement,
/// from a candidate set.
#[derive(Debug)]
pub struct WorkloadGenerator<T> {
    candidates: CandidateSet<T>,
    rng: StdRng,
}

impl<T: Clone> WorkloadGenerator<T> {
    /// Create a generator over a non-empty candidate set
    pub fn new(candidates: CandidateSet<T>, rng: StdRng) -> Self {
        assert!(
            !candidates.is_empty(),
            "workload generator needs at least one candidate"
        );
        Self { candidates, rng }
    }

    /// Draw the next element
    pub fn draw(&mut self) -> T {
        let index = self.rng.gen_range(0..self.candidates.len());
        self.candidates.elements[index].clone()
    }

    pub fn candidates(&self) -> &CandidateSet<T> {
        &self.candidates
    }
}

impl<T: Clone> Iterator for WorkloadGenerator<T> {
    type Item = T;

    // Never exhausts.
    fn next(&mut self) -> Option<T> {
        Some(self.draw())
    }
}

/// Per-worker key and value sources
#[derive(Debug)]
pub struct Workload {
    keys: WorkloadGenerator<String>,
    values: WorkloadGenerator<Bytes>,
}

impl Workload {
    /// Build a workload seeded from OS entropy
    pub fn new(config: &WorkloadConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    /// Build a reproducible workload
    pub fn with_seed(config: &WorkloadConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: &WorkloadConfig, mut rng: StdRng) -> Self {
        let key_length = config.key_length;
        let value_length = config.value_length;

        let keys = CandidateSet::build(config.key_count, &mut rng, |rng| {
            random_string(rng, key_length)
        });
        let values = CandidateSet::build(config.value_count, &mut rng, |rng| {
            random_bytes(rng, value_length)
        });

        let key_rng = StdRng::seed_from_u64(rng.gen());
        let value_rng = StdRng::seed_from_u64(rng.gen());

        Self {
            keys: WorkloadGenerator::new(keys, key_rng),
            values: WorkloadGenerator::new(values, value_rng),
        }
    }

    pub fn next_key(&mut self) -> String {
        self.keys.draw()
    }

    pub fn next_value(&mut self) -> Bytes {
        self.values.draw()
    }

    pub fn keys(&self) -> &CandidateSet<String> {
        self.keys.candidates()
    }

    pub fn values(&self) -> &CandidateSet<Bytes> {
        self.values.candidates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn config(
        key_length: usize,
        key_count: usize,
        value_length: usize,
        value_count: usize,
    ) -> WorkloadConfig {
        WorkloadConfig {
            key_length,
            key_count,
            value_length,
            value_count,
        }
    }

    #[test]
    fn test_default_dimensions() {
        let workload = Workload::with_seed(&WorkloadConfig::default(), 7);
        assert_eq!(workload.keys().len(), 1000);
        assert!(workload.keys().as_slice().iter().all(|k| k.len() == 8));
        assert_eq!(workload.values().len(), 1);
        assert_eq!(workload.values().as_slice()[0].len(), 128);
    }

    #[test]
    fn test_small_candidate_set() {
        let mut workload = Workload::with_seed(&config(4, 3, 16, 1), 42);
        assert_eq!(workload.keys().len(), 3);

        let fixed_value = workload.values().as_slice()[0].clone();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let key = workload.next_key();
            assert_eq!(key.len(), 4);
            assert!(workload.keys().contains(&key));
            assert_eq!(workload.next_value(), fixed_value);
            seen.insert(key);
        }

        let distinct: HashSet<_> = workload.keys().as_slice().iter().cloned().collect();
        assert!(seen.is_subset(&distinct));
        // 100 uniform draws over 3 candidates hit each one with near certainty
        assert_eq!(seen.len(), distinct.len());
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Workload::with_seed(&config(8, 50, 8, 2), 9);
        let mut b = Workload::with_seed(&config(8, 50, 8, 2), 9);
        for _ in 0..20 {
            assert_eq!(a.next_key(), b.next_key());
            assert_eq!(a.next_value(), b.next_value());
        }
    }

    #[test]
    fn test_generator_is_infinite() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = CandidateSet::build(2, &mut rng, |rng| random_string(rng, 3));
        let generator = WorkloadGenerator::new(set, StdRng::seed_from_u64(2));
        assert_eq!(generator.take(10_000).count(), 10_000);
    }

    #[test]
    fn test_random_string_is_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(3);
        let s = random_string(&mut rng, 64);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    #[should_panic(expected = "at least one candidate")]
    fn test_empty_candidate_set_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let set: CandidateSet<String> =
            CandidateSet::build(0, &mut rng, |rng| random_string(rng, 1));
        let _ = WorkloadGenerator::new(set, rng);
    }

    proptest! {
        #[test]
        fn prop_candidate_set_matches_config(
            key_length in 1usize..32,
            key_count in 1usize..200,
            value_length in 0usize..64,
            value_count in 1usize..8,
            seed in any::<u64>(),
        ) {
            let mut workload = Workload::with_seed(
                &config(key_length, key_count, value_length, value_count),
                seed,
            );
            prop_assert_eq!(workload.keys().len(), key_count);
            prop_assert_eq!(workload.values().len(), value_count);

            for _ in 0..50 {
                let key = workload.next_key();
                prop_assert_eq!(key.len(), key_length);
                prop_assert!(workload.keys().contains(&key));

                let value = workload.next_value();
                prop_assert_eq!(value.len(), value_length);
                prop_assert!(workload.values().contains(&value));
            }
        }
    }
}
