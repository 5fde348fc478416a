//! Importance-sampling coreset builder (§4.2).
//!
//! Turns a bicriteria solution (per-point costs + assignments, optional weights)
//! into a sampling distribution under one of three sensitivity schemes, builds an
//! [`AliasSampler`] over it, and draws weighted samples into a [`Coreset`].

use rayon::prelude::*;
use std::collections::HashMap;

use crate::alias::AliasSampler;
use crate::error::{SumError, SumResult};
use crate::rng::{tag, worker_rng};

/// Sensitivity scheme used to turn (costs, assignments, weights) into sampling
/// probabilities (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityScheme {
    /// Braverman-Feldman-Lang 2016.
    Bfl,
    /// Feldman-Langberg 2011.
    Fl,
    /// Lucic-Faulkner-Krause-Feldman 2017 (for Gaussian mixture models).
    Lfkf,
}

/// A weighted subset of the point set: `indices[i]` paired with `weights[i]`.
///
/// Points may repeat — [`Coreset::compact`] sums the weights of duplicate
/// indices and shrinks the arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Coreset {
    pub indices: Vec<u32>,
    pub weights: Vec<f32>,
}

impl Coreset {
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    pub fn to_pairs(&self) -> Vec<(u32, f32)> {
        self.indices
            .iter()
            .copied()
            .zip(self.weights.iter().copied())
            .collect()
    }

    /// Sum the weights of duplicate indices and shrink to the unique index set.
    /// Preserves `sum(weights)` exactly in f64 accumulation and never grows the
    /// coreset (§8 invariant 3).
    pub fn compact(&mut self) {
        let mut merged: HashMap<u32, f64> = HashMap::with_capacity(self.indices.len());
        for (idx, w) in self.indices.iter().zip(self.weights.iter()) {
            *merged.entry(*idx).or_insert(0.) += *w as f64;
        }
        if merged.len() == self.indices.len() {
            return;
        }
        let mut indices = Vec::with_capacity(merged.len());
        let mut weights = Vec::with_capacity(merged.len());
        for (idx, w) in merged {
            indices.push(idx);
            weights.push(w as f32);
        }
        self.indices = indices;
        self.weights = weights;
    }

    /// Baseline uniform-weight coreset: no importance weighting, every sampled
    /// point gets weight `np / m`. Ported from the source's `UniformSampler`
    /// (see DESIGN.md) — a control/fallback usable before any bicriteria
    /// solution is available.
    pub fn uniform(np: usize, m: usize, seed: u64) -> SumResult<Self> {
        if np == 0 {
            return Err(SumError::InvalidArgument("num_points is zero".to_string()));
        }
        let mut rng = worker_rng(seed, 0, tag::ALIAS_SAMPLE);
        use rand::Rng;
        let indices: Vec<u32> = (0..m).map(|_| rng.random_range(0..np) as u32).collect();
        let weight = np as f32 / m as f32;
        Ok(Coreset {
            indices,
            weights: vec![weight; m],
        })
    }
}

/// Built sampling distribution, ready to draw a [`Coreset`] from.
#[derive(Debug)]
pub struct SensitivitySampler {
    sampler: AliasSampler,
    np: usize,
}

impl SensitivitySampler {
    /// Build from a bicriteria solution: `costs[i]` is point i's distance to its
    /// assigned center, `assignments[i]` its center index in `[0, k)`, `weights`
    /// optional per-point weight (absent == uniform 1, §9).
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        np: usize,
        k: usize,
        costs: &[f32],
        assignments: &[u32],
        weights: Option<&[f32]>,
        scheme: SensitivityScheme,
        seed: u64,
        alpha_est: f64,
    ) -> SumResult<Self> {
        if np == 0 {
            return Err(SumError::InvalidArgument("np is zero".to_string()));
        }
        if k == 0 {
            return Err(SumError::InvalidArgument("k is zero".to_string()));
        }
        if costs.len() != np || assignments.len() != np {
            return Err(SumError::InvalidArgument(
                "costs/assignments length must equal np".to_string(),
            ));
        }
        if let Some(w) = weights {
            if w.len() != np {
                return Err(SumError::InvalidArgument(
                    "weights length must equal np".to_string(),
                ));
            }
            if w.iter().any(|x| *x < 0. || !x.is_finite()) {
                return Err(SumError::InvalidArgument(
                    "weights must be non-negative and finite".to_string(),
                ));
            }
        }
        for (i, a) in assignments.iter().enumerate() {
            if *a as usize >= k {
                return Err(SumError::InvalidAssignment {
                    point: i,
                    cluster: *a as usize,
                    k,
                });
            }
        }

        let getw = |i: usize| weights.map(|w| w[i]).unwrap_or(1.0) as f64;

        let probs = match scheme {
            SensitivityScheme::Fl => fl_probs(np, costs, &getw),
            SensitivityScheme::Bfl => bfl_probs(np, k, costs, assignments, &getw)?,
            SensitivityScheme::Lfkf => {
                if alpha_est <= 0. {
                    return Err(SumError::InvalidArgument(
                        "LFKF requires alpha_est > 0 (alpha_est = 0 degenerates the formula; see DESIGN.md)"
                            .to_string(),
                    ));
                }
                lfkf_probs(np, k, costs, assignments, &getw, alpha_est)
            }
        };

        let owned_weights = weights.map(|w| w.to_vec());
        let sampler = AliasSampler::new(probs, owned_weights, seed)?;
        Ok(SensitivitySampler { sampler, np })
    }

    pub fn num_points(&self) -> usize {
        self.np
    }

    pub fn prob_of(&self, i: usize) -> f64 {
        self.sampler.prob_of(i)
    }

    /// Draw `m` indices, emitting weight `w(i) / (m * p[i])` for each — an
    /// unbiased estimator of any additive cost, provided `p[i] > 0` wherever the
    /// cost function is nonzero (§4.2).
    ///
    /// `use_exponential_skips` switches the draw itself from `m` independent
    /// per-worker alias-table lookups to the batch exponential-spacings
    /// construction (§6 `use_exponential_skips`, see
    /// [`AliasSampler::sample_batch_exponential_skips`]) — same distribution,
    /// cheaper for large `m` since it skips the per-draw RNG derivation per
    /// worker and sweeps the cumulative distribution once.
    pub fn sample(&self, m: usize, seed: u64, use_exponential_skips: bool) -> SumResult<Coreset> {
        if m == 0 {
            return Err(SumError::InvalidArgument("m is zero".to_string()));
        }
        let nsamplinv = 1.0 / m as f64;
        if use_exponential_skips {
            let idxs = self.sampler.sample_batch_exponential_skips(m, seed);
            let mut indices = Vec::with_capacity(m);
            let mut weights = Vec::with_capacity(m);
            for idx in idxs {
                let w = self.sampler.weight_of(idx) as f64 * nsamplinv / self.sampler.prob_of(idx);
                indices.push(idx as u32);
                weights.push(w as f32);
            }
            return Ok(Coreset { indices, weights });
        }
        let pairs: Vec<(u32, f32)> = (0..m)
            .into_par_iter()
            .map(|worker| {
                let mut rng = worker_rng(seed, worker, tag::ALIAS_SAMPLE);
                let idx = self.sampler.sample_with(&mut rng);
                let w = self.sampler.weight_of(idx) as f64 * nsamplinv / self.sampler.prob_of(idx);
                (idx as u32, w as f32)
            })
            .collect();
        let (indices, weights) = pairs.into_iter().unzip();
        Ok(Coreset { indices, weights })
    }
}

fn fl_probs(np: usize, costs: &[f32], getw: &dyn Fn(usize) -> f64) -> Vec<f64> {
    let raw: Vec<f64> = (0..np).map(|i| getw(i) * costs[i] as f64).collect();
    normalize(raw)
}

fn bfl_probs(
    np: usize,
    k: usize,
    costs: &[f32],
    assignments: &[u32],
    getw: &dyn Fn(usize) -> f64,
) -> SumResult<Vec<f64>> {
    let mut weight_sums = vec![0f64; k];
    let mut counts = vec![0u64; k];
    let mut total_cost = 0f64;
    for i in 0..np {
        let a = assignments[i] as usize;
        let w = getw(i);
        weight_sums[a] += w;
        counts[a] += 1;
        total_cost += w * costs[i] as f64;
    }
    for (a, c) in counts.iter().enumerate() {
        if *c == 0 {
            return Err(SumError::Degenerate(format!(
                "cluster {a} has no assigned points (BFL treats empty clusters as fatal)"
            )));
        }
    }
    let raw: Vec<f64> = (0..np)
        .map(|i| {
            let a = assignments[i] as usize;
            let w = getw(i);
            let fraccost = w * costs[i] as f64 / total_cost;
            let fracw = w / (weight_sums[a] * counts[a] as f64);
            0.5 * (fraccost + fracw)
        })
        .collect();
    Ok(normalize(raw))
}

fn lfkf_probs(
    np: usize,
    k: usize,
    costs: &[f32],
    assignments: &[u32],
    getw: &dyn Fn(usize) -> f64,
    alpha_est: f64,
) -> Vec<f64> {
    let mut weight_sums = vec![0f64; k];
    let mut weighted_cost_sums = vec![0f64; k];
    let mut sqcosts = vec![0f64; np];
    let mut total_cost = 0f64;
    for i in 0..np {
        let a = assignments[i] as usize;
        let w = getw(i);
        let cost = costs[i] as f64 * costs[i] as f64;
        let wcost = w * cost;
        weighted_cost_sums[a] += wcost;
        weight_sums[a] += w;
        total_cost += wcost;
        sqcosts[i] = cost;
    }
    let raw: Vec<f64> = (0..np)
        .map(|i| {
            let a = assignments[i] as usize;
            alpha_est * getw(i) * (sqcosts[i] + weighted_cost_sums[a] / weight_sums[a])
                + 2. * total_cost / weight_sums[a]
        })
        .collect();
    normalize(raw)
}

fn normalize(mut raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0. {
        for p in raw.iter_mut() {
            *p /= total;
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    // S5 (BFL probability): N=4, two clusters of two, asn=[0,0,1,1], costs=[1,1,2,2], w=[1,1,1,1].
    #[test]
    fn s5_bfl_probability() {
        let costs = [1f32, 1., 2., 2.];
        let assignments = [0u32, 0, 1, 1];
        let getw = |_: usize| 1.0;
        let probs = bfl_probs(4, 2, &costs, &assignments, &getw).unwrap();
        let expected = [5.0 / 24.0, 5.0 / 24.0, 7.0 / 24.0, 7.0 / 24.0];
        for i in 0..4 {
            assert!((probs[i] - expected[i]).abs() < 1e-12, "i={i}: {} vs {}", probs[i], expected[i]);
        }
    }

    #[test]
    fn bfl_empty_cluster_is_fatal() {
        let costs = [1f32, 2., 3.];
        let assignments = [0u32, 0, 0];
        let getw = |_: usize| 1.0;
        let err = bfl_probs(3, 2, &costs, &assignments, &getw).unwrap_err();
        assert!(matches!(err, SumError::Degenerate(_)));
    }

    // S2 (FL coreset): N=100 points at (i,0), unit weights, costs[i]=i, asn[i]=0, k=1.
    #[test]
    fn s2_fl_coreset_expected_mass() {
        let np = 100;
        let costs: Vec<f32> = (0..np).map(|i| i as f32).collect();
        let assignments = vec![0u32; np];
        let sampler =
            SensitivitySampler::build(np, 1, &costs, &assignments, None, SensitivityScheme::Fl, 7, 0.)
                .unwrap();
        // expected p[i] = i / 4950
        for i in [0usize, 50, 99] {
            let expected = i as f64 / 4950.0;
            assert!((sampler.prob_of(i) - expected).abs() < 1e-9, "i={i}");
        }
        // §8 invariant 2 prescribes m = 10^4 for this Monte Carlo check: at
        // m = 50 the per-draw weight for small i (p[i] near 1/4950) dominates
        // the variance and a single seed can land well outside a tight band.
        let coreset = sampler.sample(10_000, 7, false).unwrap();
        let total: f64 = coreset.weights.iter().map(|w| *w as f64).sum();
        assert!((total - 100.0).abs() < 5.0, "total weight {total}");
    }

    #[test]
    fn s2_fl_coreset_expected_mass_exponential_skips() {
        let np = 100;
        let costs: Vec<f32> = (0..np).map(|i| i as f32).collect();
        let assignments = vec![0u32; np];
        let sampler =
            SensitivitySampler::build(np, 1, &costs, &assignments, None, SensitivityScheme::Fl, 7, 0.)
                .unwrap();
        let coreset = sampler.sample(10_000, 7, true).unwrap();
        let total: f64 = coreset.weights.iter().map(|w| *w as f64).sum();
        assert!((total - 100.0).abs() < 5.0, "total weight {total}");
    }

    #[test]
    fn invalid_assignment_rejected() {
        let costs = [1f32, 2.];
        let assignments = [0u32, 5];
        let err = SensitivitySampler::build(2, 2, &costs, &assignments, None, SensitivityScheme::Fl, 1, 0.)
            .unwrap_err();
        assert!(matches!(err, SumError::InvalidAssignment { .. }));
    }

    #[test]
    fn lfkf_rejects_zero_alpha() {
        let costs = [1f32, 2.];
        let assignments = [0u32, 0];
        let err =
            SensitivitySampler::build(2, 1, &costs, &assignments, None, SensitivityScheme::Lfkf, 1, 0.)
                .unwrap_err();
        assert!(matches!(err, SumError::InvalidArgument(_)));
    }

    #[test]
    fn compact_preserves_total_weight() {
        let mut cs = Coreset {
            indices: vec![0, 1, 0, 2, 1],
            weights: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        };
        let total_before: f64 = cs.weights.iter().map(|w| *w as f64).sum();
        cs.compact();
        assert!(cs.size() <= 5);
        let total_after: f64 = cs.weights.iter().map(|w| *w as f64).sum();
        assert!((total_before - total_after).abs() < 1e-9);
    }
}
