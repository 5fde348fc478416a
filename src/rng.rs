//! Deterministic per-worker RNG derivation (§5, §9).
//!
//! Each parallel worker derives its own RNG state from a base seed, a worker id
//! and a call-site tag rather than sharing a single RNG or drawing from thread-local
//! entropy. That is the only way to keep §8 invariant 5 (bitwise-identical seeder
//! output for a fixed seed and thread count) while still letting workers run in
//! parallel without contending on a shared generator.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Mix a base seed, a worker id and a call-site tag into a 64-bit seed.
///
/// This is splitmix64-style mixing, good enough to decorrelate the three inputs
/// without needing a cryptographic hash on a hot path.
fn mix(seed: u64, worker_id: u64, tag: u64) -> u64 {
    let mut x = seed ^ worker_id.wrapping_mul(0x9E3779B97F4A7C15) ^ tag.wrapping_mul(0xC2B2AE3D27D4EB4F);
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^= x >> 31;
    x
}

/// Derive the seeded RNG for `worker_id` at call site `tag`, from a run's base `seed`.
pub fn worker_rng(seed: u64, worker_id: usize, tag: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(mix(seed, worker_id as u64, tag))
}

/// Call-site tags used across the crate so seeds for unrelated phases never collide.
pub mod tag {
    pub const ALIAS_SAMPLE: u64 = 1;
    pub const D2_SEED: u64 = 2;
    pub const KMC2: u64 = 3;
    pub const LSPP: u64 = 4;
    pub const LOCAL_SEARCH_INIT: u64 = 5;
    pub const MINIBATCH: u64 = 6;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_workers_diverge() {
        let a = mix(42, 0, tag::D2_SEED);
        let b = mix(42, 1, tag::D2_SEED);
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_given_inputs() {
        let a = worker_rng(7, 2, tag::ALIAS_SAMPLE);
        let b = worker_rng(7, 2, tag::ALIAS_SAMPLE);
        use rand::RngCore;
        let mut a = a;
        let mut b = b;
        assert_eq!(a.next_u64(), b.next_u64());
    }
}
