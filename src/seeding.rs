//! D²/k-means++ seeding, with optional kmc² acceleration and local-search++
//! refinement (§4.3).

use rand::Rng;
use rayon::prelude::*;

use crate::distance::FeatureSource;
use crate::error::{SumError, SumResult};
use crate::measure::{msr_with_prior, Measure, Prior};
use crate::rng::{tag, worker_rng};

/// Options controlling a single seeding run (mirrors the relevant subset of
/// `SumOpts`, §6).
#[derive(Debug, Clone)]
pub struct SeedOpts {
    pub k: usize,
    pub measure: Measure,
    pub prior: Prior,
    /// kmc² chain length per step; 0 disables kmc² and uses a full D² pass.
    pub kmc2_rounds: usize,
    /// Number of local-search++ refinement rounds after the initial k centers.
    pub lspp_rounds: usize,
    /// Repeat the whole procedure this many times with independent seeds,
    /// keeping the center set with lowest sum of squared costs.
    pub ntimes: usize,
    /// Candidates drawn per D² step (§6 `n_local_trials`); the one minimizing
    /// the resulting Σd² is kept ("greedy" k-means++). 1 reduces to plain D².
    pub n_local_trials: usize,
    /// Fraction of points, by current D² cost, excluded from center-candidate
    /// sampling at every step (§6 `outlier_fraction`, "robust seeding"): the
    /// farthest `outlier_fraction` of points are presumed outliers and never
    /// proposed as the next center, though they still count toward Σd² and may
    /// still be covered by whichever center ends up nearest them.
    pub outlier_fraction: f64,
    pub seed: u64,
}

impl Default for SeedOpts {
    fn default() -> Self {
        SeedOpts {
            k: 1,
            measure: Measure::L2 { squared: true },
            prior: Prior::None,
            kmc2_rounds: 0,
            lspp_rounds: 0,
            ntimes: 1,
            n_local_trials: 1,
            outlier_fraction: 0.0,
            seed: 0,
        }
    }
}

/// Output of a seeding run: `indices` are the chosen centers (length k),
/// `assignments`/`costs` give the resulting bicriteria solution over all N
/// points (§4.3 "Outputs").
#[derive(Debug, Clone)]
pub struct SeedResult {
    pub indices: Vec<u32>,
    pub assignments: Vec<u32>,
    pub costs: Vec<f32>,
}

fn cost_fn<F: FeatureSource>(source: &F, measure: Measure, prior: &Prior, i: usize, c: usize) -> f32 {
    let prior_sum = prior.mass(source.dim());
    let xi = source.row(i).to_dense();
    let xc = source.row(c).to_dense();
    let sum_x = source.row_sum(i);
    let sum_c = source.row_sum(c);
    msr_with_prior(measure, &xi, &xc, prior, prior_sum, sum_x, sum_c) as f32
}

/// Recompute, in parallel, the min-cost-to-nearest-center vector and the
/// matching assignment vector against a fixed center list.
fn assign_to_centers<F: FeatureSource>(
    source: &F,
    measure: Measure,
    prior: &Prior,
    centers: &[u32],
) -> (Vec<f32>, Vec<u32>) {
    let n = source.num_points();
    let pairs: Vec<(f32, u32)> = (0..n)
        .into_par_iter()
        .map(|j| {
            let mut best_cost = f32::INFINITY;
            let mut best_c = 0u32;
            for (ci, c) in centers.iter().enumerate() {
                let cost = cost_fn(source, measure, prior, j, *c as usize);
                if cost < best_cost {
                    best_cost = cost;
                    best_c = ci as u32;
                }
            }
            (best_cost, best_c)
        })
        .collect();
    let mut costs = Vec::with_capacity(n);
    let mut assignments = Vec::with_capacity(n);
    for (c, a) in pairs {
        costs.push(c);
        assignments.push(a);
    }
    (costs, assignments)
}

fn weighted_sample_by_d2<R: Rng + ?Sized>(d2: &[f32], rng: &mut R) -> usize {
    let total: f64 = d2.iter().map(|x| *x as f64).sum();
    if total <= 0. {
        // All points coincide with the current center set: fall back to a
        // uniform draw, tie-broken by index as the lowest valid choice.
        return rng.random_range(0..d2.len());
    }
    let mut target = rng.random::<f64>() * total;
    for (i, v) in d2.iter().enumerate() {
        target -= *v as f64;
        if target <= 0. {
            return i;
        }
    }
    d2.len() - 1
}

/// Mask the farthest `outlier_fraction` of points out of the sampling weights
/// used to *propose* the next center (§6 `outlier_fraction`). `d2` itself is
/// left untouched — outliers still contribute to Σd² bookkeeping and can still
/// be assigned to whatever center ends up nearest; they are only prevented from
/// being drawn as a candidate center themselves, which is what keeps a single
/// far-flung point from hijacking a center slot under D² seeding.
fn robust_sampling_weights(d2: &[f32], outlier_fraction: f64) -> Vec<f32> {
    let n = d2.len();
    if outlier_fraction <= 0. || n == 0 {
        return d2.to_vec();
    }
    let n_outliers = ((outlier_fraction * n as f64).floor() as usize).min(n.saturating_sub(1));
    if n_outliers == 0 {
        return d2.to_vec();
    }
    let mut order: Vec<usize> = (0..n).collect();
    // farthest first, index ascending tie-break so masking is deterministic.
    order.sort_by(|&a, &b| d2[b].partial_cmp(&d2[a]).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b)));
    let mut weights = d2.to_vec();
    for &i in &order[..n_outliers] {
        weights[i] = 0.0;
    }
    weights
}

fn kmc2_select<R: Rng + ?Sized>(d2: &[f32], rounds: usize, rng: &mut R) -> usize {
    let n = d2.len();
    let mut x = rng.random_range(0..n);
    for _ in 0..rounds {
        let y = rng.random_range(0..n);
        let dx = d2[x] as f64;
        let accept = if dx <= 0. {
            true
        } else {
            rng.random::<f64>() < (d2[y] as f64 / dx).min(1.0)
        };
        if accept {
            x = y;
        }
    }
    x
}

/// One run of D²/kmc² seeding (no ntimes repetition, no LS++).
///
/// At every step, `n_local_trials` candidates are drawn (D²-weighted, over the
/// outlier-masked weights when `outlier_fraction > 0`) and the one minimizing
/// the resulting Σd² is kept — "greedy" k-means++ (§6 `n_local_trials`);
/// `n_local_trials == 1` reduces to plain D²/kmc² seeding.
fn seed_once<F: FeatureSource>(source: &F, opts: &SeedOpts, seed: u64) -> SumResult<(Vec<u32>, Vec<f32>)> {
    let n = source.num_points();
    let mut rng = worker_rng(seed, 0, tag::D2_SEED);
    let mut centers = Vec::with_capacity(opts.k);
    centers.push(rng.random_range(0..n) as u32);

    let mut d2 = vec![f32::INFINITY; n];
    for j in 0..n {
        d2[j] = cost_fn(source, opts.measure, &opts.prior, j, centers[0] as usize);
    }

    let n_trials = opts.n_local_trials.max(1);

    for step in 1..opts.k {
        let weights = robust_sampling_weights(&d2, opts.outlier_fraction);

        let mut best_next: Option<usize> = None;
        let mut best_d2: Vec<f32> = Vec::new();
        let mut best_total = f64::INFINITY;

        for trial in 0..n_trials {
            let candidate = if opts.kmc2_rounds > 0 {
                let mut chain_rng = worker_rng(
                    seed,
                    0,
                    tag::KMC2 ^ (step as u64) ^ (trial as u64).wrapping_mul(0x9E3779B97F4A7C15),
                );
                kmc2_select(&weights, opts.kmc2_rounds, &mut chain_rng)
            } else {
                weighted_sample_by_d2(&weights, &mut rng)
            };

            let candidate_d2: Vec<f32> = (0..n)
                .into_par_iter()
                .map(|j| {
                    let c = cost_fn(source, opts.measure, &opts.prior, j, candidate);
                    d2[j].min(c)
                })
                .collect();
            let total: f64 = candidate_d2.iter().map(|x| *x as f64).sum();
            if total < best_total {
                best_total = total;
                best_next = Some(candidate);
                best_d2 = candidate_d2;
            }
        }

        centers.push(best_next.expect("n_trials >= 1 guarantees at least one candidate") as u32);
        d2 = best_d2;
    }

    Ok((centers, d2))
}

/// Local-search++: `lspp_rounds` rounds of drawing a D²-weighted candidate and
/// swapping it in for whichever current center yields the largest strict
/// reduction in sum(d²) (§4.3).
fn local_search_pp<F: FeatureSource>(
    source: &F,
    opts: &SeedOpts,
    centers: &mut [u32],
    d2: &mut [f32],
    seed: u64,
) {
    let n = source.num_points();
    let mut rng = worker_rng(seed, 0, tag::LSPP);

    for _round in 0..opts.lspp_rounds {
        let y = weighted_sample_by_d2(d2, &mut rng) as u32;
        if centers.contains(&y) {
            continue;
        }
        let current_total: f64 = d2.iter().map(|x| *x as f64).sum();

        let mut best_reduction = 0f64;
        let mut best_idx: Option<usize> = None;
        let mut best_d2: Vec<f32> = Vec::new();

        for idx in 0..centers.len() {
            // cost to the nearest center excluding `idx`
            let without: Vec<f32> = (0..n)
                .into_par_iter()
                .map(|j| {
                    let mut best = f32::INFINITY;
                    for (ci, c) in centers.iter().enumerate() {
                        if ci == idx {
                            continue;
                        }
                        let cost = cost_fn(source, opts.measure, &opts.prior, j, *c as usize);
                        if cost < best {
                            best = cost;
                        }
                    }
                    best
                })
                .collect();
            let candidate_d2: Vec<f32> = (0..n)
                .into_par_iter()
                .map(|j| {
                    let to_y = cost_fn(source, opts.measure, &opts.prior, j, y as usize);
                    without[j].min(to_y)
                })
                .collect();
            let new_total: f64 = candidate_d2.iter().map(|x| *x as f64).sum();
            let reduction = current_total - new_total;
            // strictly reduces, and earliest candidate index wins ties (§4.3).
            if reduction > best_reduction {
                best_reduction = reduction;
                best_idx = Some(idx);
                best_d2 = candidate_d2;
            }
        }

        if let Some(idx) = best_idx {
            centers[idx] = y;
            d2.copy_from_slice(&best_d2);
        }
    }
}

/// Run D²/k-means++ seeding over `source`, producing `opts.k` centers and the
/// resulting bicriteria assignment. Repeats `opts.ntimes` times with
/// independent seeds and keeps the run with lowest sum(d²) (§4.3 "ntimes").
pub fn seed<F: FeatureSource>(source: &F, opts: &SeedOpts) -> SumResult<SeedResult> {
    let n = source.num_points();
    if n == 0 {
        return Err(SumError::InvalidArgument("num_points is zero".to_string()));
    }
    if opts.k == 0 {
        return Err(SumError::InvalidArgument("k is zero".to_string()));
    }
    if opts.k > n {
        return Err(SumError::InvalidArgument(format!(
            "k ({}) exceeds num_points ({n})",
            opts.k
        )));
    }
    if opts.k as u64 > u32::MAX as u64 {
        return Err(SumError::Overflow {
            what: "k".to_string(),
            value: opts.k as u64,
        });
    }
    let ntimes = opts.ntimes.max(1);

    let mut best: Option<(Vec<u32>, Vec<f32>, f64)> = None;
    for trial in 0..ntimes {
        let trial_seed = opts.seed ^ ((trial as u64).wrapping_mul(0x2545F4914F6CDD1D));
        let (mut centers, mut d2) = seed_once(source, opts, trial_seed)?;
        if opts.lspp_rounds > 0 {
            local_search_pp(source, opts, &mut centers, &mut d2, trial_seed);
        }
        let total: f64 = d2.iter().map(|x| *x as f64).sum();
        let better = match &best {
            None => true,
            Some((_, _, best_total)) => total < *best_total,
        };
        if better {
            best = Some((centers, d2, total));
        }
    }

    let (indices, _d2, _total) = best.expect("ntimes >= 1 guarantees at least one trial ran");
    let (costs, assignments) = assign_to_centers(source, opts.measure, &opts.prior, &indices);
    Ok(SeedResult {
        indices,
        assignments,
        costs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DenseMatrix;
    use ndarray::Array2;

    fn grid_points(n: usize) -> DenseMatrix {
        let mut data = Array2::<f32>::zeros((n, 2));
        for i in 0..n {
            data[[i, 0]] = i as f32;
        }
        DenseMatrix::new(data)
    }

    #[test]
    fn seeds_k_distinct_centers() {
        let pts = grid_points(50);
        let opts = SeedOpts {
            k: 5,
            ntimes: 3,
            seed: 42,
            ..Default::default()
        };
        let res = seed(&pts, &opts).unwrap();
        assert_eq!(res.indices.len(), 5);
        let mut sorted = res.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 5, "centers must be distinct");
        assert_eq!(res.assignments.len(), 50);
        assert_eq!(res.costs.len(), 50);
    }

    #[test]
    fn rejects_k_zero() {
        let pts = grid_points(10);
        let opts = SeedOpts {
            k: 0,
            ..Default::default()
        };
        assert!(seed(&pts, &opts).is_err());
    }

    #[test]
    fn rejects_k_exceeding_n() {
        let pts = grid_points(3);
        let opts = SeedOpts {
            k: 10,
            ..Default::default()
        };
        assert!(seed(&pts, &opts).is_err());
    }

    #[test]
    fn deterministic_given_seed() {
        let pts = grid_points(50);
        let opts = SeedOpts {
            k: 4,
            seed: 123,
            ..Default::default()
        };
        let r1 = seed(&pts, &opts).unwrap();
        let r2 = seed(&pts, &opts).unwrap();
        assert_eq!(r1.indices, r2.indices);
        assert_eq!(r1.assignments, r2.assignments);
    }

    #[test]
    fn kmc2_runs_and_produces_valid_output() {
        let pts = grid_points(50);
        let opts = SeedOpts {
            k: 4,
            kmc2_rounds: 20,
            seed: 11,
            ..Default::default()
        };
        let res = seed(&pts, &opts).unwrap();
        assert_eq!(res.indices.len(), 4);
    }

    #[test]
    fn lspp_does_not_increase_cost() {
        let pts = grid_points(30);
        let opts_plain = SeedOpts {
            k: 3,
            seed: 5,
            ..Default::default()
        };
        let opts_lspp = SeedOpts {
            k: 3,
            seed: 5,
            lspp_rounds: 5,
            ..Default::default()
        };
        let plain = seed(&pts, &opts_plain).unwrap();
        let refined = seed(&pts, &opts_lspp).unwrap();
        let plain_cost: f32 = plain.costs.iter().sum();
        let refined_cost: f32 = refined.costs.iter().sum();
        assert!(refined_cost <= plain_cost + 1e-3);
    }

    #[test]
    fn greedy_trials_do_not_increase_cost() {
        let pts = grid_points(40);
        let opts_plain = SeedOpts {
            k: 4,
            seed: 3,
            ..Default::default()
        };
        let opts_greedy = SeedOpts {
            k: 4,
            seed: 3,
            n_local_trials: 8,
            ..Default::default()
        };
        let plain = seed(&pts, &opts_plain).unwrap();
        let greedy = seed(&pts, &opts_greedy).unwrap();
        let plain_cost: f32 = plain.costs.iter().sum();
        let greedy_cost: f32 = greedy.costs.iter().sum();
        assert!(greedy_cost <= plain_cost + 1e-3, "greedy {greedy_cost} plain {plain_cost}");
    }

    #[test]
    fn outlier_fraction_excludes_farthest_point_from_candidates() {
        // one point pulled far away from an otherwise tight cluster: with
        // outlier_fraction masking it out of candidate sampling, it must not
        // be picked as the single additional center.
        let mut data = Array2::<f32>::zeros((11, 2));
        for i in 0..10 {
            data[[i, 0]] = i as f32 * 0.1;
        }
        data[[10, 0]] = 1000.0;
        let pts = DenseMatrix::new(data);
        let opts = SeedOpts {
            k: 2,
            seed: 17,
            outlier_fraction: 0.2,
            ..Default::default()
        };
        let res = seed(&pts, &opts).unwrap();
        assert!(!res.indices.contains(&10), "outlier must not be chosen as a center: {:?}", res.indices);
    }

    #[test]
    fn robust_sampling_weights_zeroes_farthest_fraction() {
        let d2 = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        let weights = robust_sampling_weights(&d2, 0.4);
        assert_eq!(weights[4], 0.0);
        assert_eq!(weights[3], 0.0);
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 2.0);
        assert_eq!(weights[2], 3.0);
    }
}
