//! Walker's alias method for O(1) weighted sampling (§4.1), plus the binary
//! serialization format from §6.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use std::io::{Read, Write};

use crate::error::{SumError, SumResult};
use crate::rng::{tag, worker_rng};

/// Sentinel written before an optional weights block, taken verbatim from the
/// wire format in §6 (`0x539` == 1337, the seed the source codebase also uses
/// as its default).
const WEIGHTS_PRESENT: u32 = 0x539;

/// Walker's alias table over a probability vector `p` with `sum(p) == 1`.
///
/// Construction is O(N); `sample()` is O(1): one uniform draw picks a bucket,
/// a second decides whether to take the bucket's own outcome or its alias.
/// The table is immutable after construction, and a fixed seed always produces
/// the same sequence of draws (§3: "sampling is idempotent under the same seed").
#[derive(Debug)]
pub struct AliasSampler {
    prob: Vec<f64>,
    alias: Vec<u32>,
    probs: Vec<f64>,
    weights: Option<Vec<f32>>,
    seed: u64,
    n: usize,
}

impl AliasSampler {
    /// Build the alias table from `probs`. Fails with `InvalidDistribution` if
    /// any entry is negative or non-finite, if the vector is empty, or if the
    /// probabilities sum to zero.
    pub fn new(probs: Vec<f64>, weights: Option<Vec<f32>>, seed: u64) -> SumResult<Self> {
        let n = probs.len();
        if n == 0 {
            return Err(SumError::InvalidDistribution(
                "probability vector is empty".to_string(),
            ));
        }
        if probs.iter().any(|p| !p.is_finite() || *p < 0.) {
            return Err(SumError::InvalidDistribution(
                "probability vector contains a negative or non-finite entry".to_string(),
            ));
        }
        let total: f64 = probs.iter().sum();
        if total <= 0. {
            return Err(SumError::InvalidDistribution(
                "probabilities sum to zero".to_string(),
            ));
        }

        let (prob, alias) = build_table(&probs, total, n);

        Ok(AliasSampler {
            prob,
            alias,
            probs,
            weights,
            seed,
            n,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Normalized probability of index `i` (as built, not re-normalized).
    pub fn prob_of(&self, i: usize) -> f64 {
        self.probs[i]
    }

    pub fn weight_of(&self, i: usize) -> f32 {
        self.weights.as_ref().map(|w| w[i]).unwrap_or(1.0)
    }

    /// Draw one index in O(1), using the sampler's own seeded RNG state
    /// (`worker_id = 0`). For sampling from multiple threads, use
    /// [`AliasSampler::sample_with`] with an RNG each thread derives independently
    /// (§5: "callers sampling from multiple threads must each hold an independent
    /// RNG state derived deterministically from a base seed").
    pub fn sample(&self) -> usize {
        let mut rng = worker_rng(self.seed, 0, tag::ALIAS_SAMPLE);
        self.sample_with(&mut rng)
    }

    /// Draw one index using a caller-supplied RNG (for parallel multi-threaded
    /// sampling, §5).
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let bucket = rng.random_range(0..self.n);
        if rng.random::<f64>() < self.prob[bucket] {
            bucket
        } else {
            self.alias[bucket] as usize
        }
    }

    /// Draw `m` indices at once via the exponential-spacings construction of
    /// sorted uniform order statistics (§6 `use_exponential_skips`), rather
    /// than `m` independent per-draw alias-table lookups. Cumulative sums of
    /// `m + 1` i.i.d. `Exp(1)` draws, normalized by their total, give `m`
    /// already-sorted uniforms in one O(m) pass (Efraimidis-Spirakis); a single
    /// O(n + m) sweep over the cumulative distribution then maps each of them
    /// to a bucket, so the whole batch costs O(n + m) instead of O(m log n) —
    /// but it draws from `probs` directly and ignores the alias table, so it is
    /// only equivalent to `m` calls to [`AliasSampler::sample_with`] in
    /// distribution, not in the exact sequence of outcomes.
    pub fn sample_batch_exponential_skips(&self, m: usize, seed: u64) -> Vec<usize> {
        if m == 0 || self.n == 0 {
            return Vec::new();
        }
        let mut rng = worker_rng(seed, 0, tag::ALIAS_SAMPLE);
        let mut cum = 0f64;
        let mut spacings = Vec::with_capacity(m + 1);
        for _ in 0..=m {
            let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
            cum += -u.ln();
            spacings.push(cum);
        }
        let total = spacings[m];
        let cdf: Vec<f64> = {
            let mut acc = 0f64;
            self.probs
                .iter()
                .map(|p| {
                    acc += *p;
                    acc
                })
                .collect()
        };
        let cdf_total = *cdf.last().unwrap();

        let mut out = Vec::with_capacity(m);
        let mut bucket = 0usize;
        for spacing in spacings.iter().take(m) {
            let u = (spacing / total) * cdf_total;
            while bucket + 1 < self.n && cdf[bucket] < u {
                bucket += 1;
            }
            out.push(bucket);
        }
        out
    }

    /// Write the sampler in the §6 binary format: N, seed, probs[N],
    /// weights_present, weights[N] (only if present). The alias table itself is
    /// not serialized — it is cheap to rebuild from `probs` on load, which keeps
    /// the wire format independent of the table layout (§9).
    pub fn write<W: Write>(&self, mut w: W) -> SumResult<()> {
        w.write_u64::<LittleEndian>(self.n as u64)?;
        w.write_u64::<LittleEndian>(self.seed)?;
        for p in &self.probs {
            w.write_f64::<LittleEndian>(*p)?;
        }
        match &self.weights {
            Some(weights) => {
                w.write_u32::<LittleEndian>(WEIGHTS_PRESENT)?;
                for wt in weights {
                    w.write_f32::<LittleEndian>(*wt)?;
                }
            }
            None => {
                w.write_u32::<LittleEndian>(0)?;
            }
        }
        Ok(())
    }

    /// Read a sampler back from the §6 binary format, rebuilding the alias table
    /// from the deserialized `probs`.
    pub fn read<R: Read>(mut r: R) -> SumResult<Self> {
        let n = r.read_u64::<LittleEndian>()? as usize;
        let seed = r.read_u64::<LittleEndian>()?;
        let mut probs = vec![0f64; n];
        for p in probs.iter_mut() {
            *p = r.read_f64::<LittleEndian>()?;
        }
        let weights_present = r.read_u32::<LittleEndian>()?;
        let weights = if weights_present != 0 {
            let mut w = vec![0f32; n];
            for wv in w.iter_mut() {
                *wv = r.read_f32::<LittleEndian>()?;
            }
            Some(w)
        } else {
            None
        };
        AliasSampler::new(probs, weights, seed)
    }
}

/// Walker's algorithm: returns (prob, alias) tables such that sampling a
/// uniform bucket and flipping a biased coin against `prob[bucket]` reproduces
/// the input distribution exactly.
fn build_table(probs: &[f64], total: f64, n: usize) -> (Vec<f64>, Vec<u32>) {
    let scale = n as f64 / total;
    let mut scaled: Vec<f64> = probs.iter().map(|p| p * scale).collect();

    let mut small = Vec::with_capacity(n);
    let mut large = Vec::with_capacity(n);
    for (i, s) in scaled.iter().enumerate() {
        if *s < 1.0 {
            small.push(i);
        } else {
            large.push(i);
        }
    }

    let mut prob = vec![0f64; n];
    let mut alias = vec![0u32; n];

    while !small.is_empty() && !large.is_empty() {
        let s = small.pop().unwrap();
        let l = large.pop().unwrap();
        prob[s] = scaled[s];
        alias[s] = l as u32;
        scaled[l] = (scaled[l] + scaled[s]) - 1.0;
        if scaled[l] < 1.0 {
            small.push(l);
        } else {
            large.push(l);
        }
    }
    // Leftover buckets are numerically at (or past) 1.0 due to floating-point
    // error accumulated during redistribution; they always take their own outcome.
    for l in large {
        prob[l] = 1.0;
    }
    for s in small {
        prob[s] = 1.0;
    }

    (prob, alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn rejects_empty() {
        assert!(AliasSampler::new(vec![], None, 1).is_err());
    }

    #[test]
    fn rejects_negative() {
        assert!(AliasSampler::new(vec![0.5, -0.5], None, 1).is_err());
    }

    #[test]
    fn rejects_all_zero() {
        assert!(AliasSampler::new(vec![0.0, 0.0], None, 1).is_err());
    }

    // S1 (alias correctness): p = [0.1, 0.2, 0.3, 0.4], draw 1e6 samples with
    // seed 1337, each bin's empirical frequency within +-0.005 of p[i].
    #[test]
    fn s1_alias_correctness() {
        log_init_test();
        let p = vec![0.1, 0.2, 0.3, 0.4];
        let sampler = AliasSampler::new(p.clone(), None, 1337).unwrap();
        let draws = 1_000_000;
        let mut counts = vec![0u64; 4];
        let mut rng = worker_rng(1337, 0, tag::ALIAS_SAMPLE);
        for _ in 0..draws {
            counts[sampler.sample_with(&mut rng)] += 1;
        }
        for i in 0..4 {
            let freq = counts[i] as f64 / draws as f64;
            log::debug!("bin {i}: expected {} got {}", p[i], freq);
            assert!((freq - p[i]).abs() < 0.005, "bin {i}: {freq} vs {}", p[i]);
        }
    }

    #[test]
    fn exponential_skips_batch_matches_distribution() {
        log_init_test();
        let p = vec![0.1, 0.2, 0.3, 0.4];
        let sampler = AliasSampler::new(p.clone(), None, 1337).unwrap();
        let draws = sampler.sample_batch_exponential_skips(1_000_000, 1337);
        assert_eq!(draws.len(), 1_000_000);
        let mut counts = vec![0u64; 4];
        for d in &draws {
            counts[*d] += 1;
        }
        for i in 0..4 {
            let freq = counts[i] as f64 / draws.len() as f64;
            assert!((freq - p[i]).abs() < 0.005, "bin {i}: {freq} vs {}", p[i]);
        }
    }

    #[test]
    fn exponential_skips_batch_empty_for_zero_m() {
        let sampler = AliasSampler::new(vec![0.5, 0.5], None, 1).unwrap();
        assert!(sampler.sample_batch_exponential_skips(0, 1).is_empty());
    }

    #[test]
    fn serialization_round_trip() {
        let sampler = AliasSampler::new(vec![0.1, 0.2, 0.3, 0.4], Some(vec![1.0, 2.0, 3.0, 4.0]), 7).unwrap();
        let mut buf = Vec::new();
        sampler.write(&mut buf).unwrap();
        let back = AliasSampler::read(&buf[..]).unwrap();
        assert_eq!(back.seed(), sampler.seed());
        assert_eq!(back.len(), sampler.len());
        for i in 0..4 {
            assert!((back.prob_of(i) - sampler.prob_of(i)).abs() < 1e-12);
            assert_eq!(back.weight_of(i), sampler.weight_of(i));
        }
    }
}
