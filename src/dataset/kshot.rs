use std::ops::Range;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Indices of one few-shot task: `k` support samples to adapt on, the rest to score the adaptation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Episode {
    pub support: Vec<usize>,
    pub query: Vec<usize>,
}

/// Draws disjoint support/query index sets from a dataset range.
pub struct KShotSampler {
    pool: Vec<usize>,
    k: usize,
    query_size: usize,
    rng: StdRng,
}

impl KShotSampler {
    pub fn new(range: Range<usize>, k: usize, query_size: usize, seed: u64) -> Self {
        assert!(k > 0, "An episode needs at least one support sample");
        assert!(query_size > 0, "An episode needs at least one query sample");
        assert!(
            range.len() >= k + query_size,
            "Range of {} samples cannot hold {} support and {} query samples",
            range.len(),
            k,
            query_size
        );

        Self {
            pool: range.collect(),
            k,
            query_size,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn episode(&mut self) -> Episode {
        let mut picked: Vec<usize> = self
            .pool
            .choose_multiple(&mut self.rng, self.k + self.query_size)
            .copied()
            .collect();
        let query = picked.split_off(self.k);

        Episode {
            support: picked,
            query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episodes_are_disjoint_and_in_range() {
        let mut sampler = KShotSampler::new(10..30, 5, 3, 7);

        for _ in 0..20 {
            let episode = sampler.episode();
            assert_eq!(episode.support.len(), 5);
            assert_eq!(episode.query.len(), 3);
            assert!(
                episode
                    .support
                    .iter()
                    .all(|i| !episode.query.contains(i) && (10..30).contains(i))
            );
        }
    }

    #[test]
    fn same_seed_gives_same_episodes() {
        let mut a = KShotSampler::new(0..50, 5, 1, 24);
        let mut b = KShotSampler::new(0..50, 5, 1, 24);

        assert_eq!(a.episode(), b.episode());
        assert_eq!(a.episode(), b.episode());
    }

    #[test]
    #[should_panic]
    fn too_small_range_is_rejected() {
        KShotSampler::new(0..3, 3, 1, 0);
    }
}
