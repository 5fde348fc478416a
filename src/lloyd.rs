//! Lloyd-style hard clustering refiner (§4.4).

use rayon::prelude::*;

use crate::distance::FeatureSource;
use crate::error::{SumError, SumResult};
use crate::measure::{msr_with_prior, Measure, Prior};

#[derive(Debug, Clone)]
pub struct LloydOpts {
    pub measure: Measure,
    pub prior: Prior,
    pub eps: f64,
    pub max_rounds: usize,
}

impl Default for LloydOpts {
    fn default() -> Self {
        LloydOpts {
            measure: Measure::L2 { squared: true },
            prior: Prior::None,
            eps: 1e-4,
            max_rounds: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LloydResult {
    pub centers: Vec<Vec<f32>>,
    pub assignments: Vec<u32>,
    pub costs: Vec<f32>,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations_used: usize,
}

fn assign<F: FeatureSource>(
    source: &F,
    centers: &[Vec<f32>],
    measure: Measure,
    prior: &Prior,
    prior_sum: f64,
) -> (Vec<u32>, Vec<f32>, Vec<f64>) {
    let n = source.num_points();
    let results: Vec<(u32, f32)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let xi = source.row(i).to_dense();
            let sum_x = source.row_sum(i);
            let mut best_cost = f32::INFINITY;
            let mut best_c = 0u32;
            for (j, c) in centers.iter().enumerate() {
                let sum_c: f64 = c.iter().map(|x| *x as f64).sum();
                let cost = msr_with_prior(measure, &xi, c, prior, prior_sum, sum_x, sum_c) as f32;
                if cost < best_cost {
                    best_cost = cost;
                    best_c = j as u32;
                }
            }
            (best_c, best_cost)
        })
        .collect();
    let mut assignments = Vec::with_capacity(n);
    let mut costs = Vec::with_capacity(n);
    for (a, c) in &results {
        assignments.push(*a);
        costs.push(*c);
    }
    let sum_costs: Vec<f64> = costs.iter().map(|c| *c as f64).collect();
    (assignments, costs, sum_costs)
}

/// Weighted-mean centroid update. For any Bregman divergence (which is how the
/// KL-family measures here are evaluated, smoothing aside) the minimizer of the
/// sum of divergences to a fixed point set is exactly the weighted arithmetic
/// mean of the raw feature vectors — so a single update rule covers the whole
/// L2/KL "generalized mean" family from §4.4 step 2.
fn update_centers<F: FeatureSource>(
    source: &F,
    k: usize,
    dim: usize,
    assignments: &[u32],
    weights: Option<&[f32]>,
) -> Vec<Option<Vec<f32>>> {
    let n = source.num_points();
    let shards: Vec<(Vec<Vec<f64>>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .fold(
            || (vec![vec![0f64; dim]; k], vec![0f64; k]),
            |(mut sums, mut wsums), i| {
                let a = assignments[i] as usize;
                let w = weights.map(|w| w[i]).unwrap_or(1.0) as f64;
                let xi = source.row(i).to_dense();
                for (d, v) in xi.iter().enumerate() {
                    sums[a][d] += w * *v as f64;
                }
                wsums[a] += w;
                (sums, wsums)
            },
        )
        .collect();

    let mut total_sums = vec![vec![0f64; dim]; k];
    let mut total_wsums = vec![0f64; k];
    // Deterministic reduction: shards are summed in index order (§5).
    for (sums, wsums) in shards {
        for j in 0..k {
            for d in 0..dim {
                total_sums[j][d] += sums[j][d];
            }
            total_wsums[j] += wsums[j];
        }
    }

    (0..k)
        .map(|j| {
            if total_wsums[j] <= 0. {
                None
            } else {
                Some(
                    total_sums[j]
                        .iter()
                        .map(|s| (*s / total_wsums[j]) as f32)
                        .collect(),
                )
            }
        })
        .collect()
}

/// Run Lloyd iterations starting from `initial_centers` until relative cost
/// improvement drops below `opts.eps` or `opts.max_rounds` is reached.
/// Empty clusters are reseeded from the farthest point by cost (§4.4 step 2).
pub fn refine<F: FeatureSource>(
    source: &F,
    initial_centers: Vec<Vec<f32>>,
    weights: Option<&[f32]>,
    opts: &LloydOpts,
) -> SumResult<LloydResult> {
    let n = source.num_points();
    let k = initial_centers.len();
    let dim = source.dim();
    if k == 0 {
        return Err(SumError::InvalidArgument("no initial centers supplied".to_string()));
    }
    if n == 0 {
        return Err(SumError::InvalidArgument("num_points is zero".to_string()));
    }
    for c in &initial_centers {
        if c.len() != dim {
            return Err(SumError::InvalidArgument(format!(
                "center dimension {} does not match source dimension {dim}",
                c.len()
            )));
        }
    }
    if let Some(w) = weights
        && w.len() != n
    {
        return Err(SumError::InvalidArgument("weights length must equal num_points".to_string()));
    }

    let prior_sum = opts.prior.mass(dim);
    let mut centers = initial_centers;

    let (mut assignments, mut costs, mut sum_costs) =
        assign(source, &centers, opts.measure, &opts.prior, prior_sum);
    let initial_cost: f64 = sum_costs.iter().sum();
    let mut prev_cost = initial_cost;
    let mut iterations_used = 0usize;

    for _iter in 0..opts.max_rounds {
        iterations_used += 1;
        let updated = update_centers(source, k, dim, &assignments, weights);
        for (j, maybe_center) in updated.into_iter().enumerate() {
            match maybe_center {
                Some(c) => centers[j] = c,
                None => {
                    // Empty cluster: reseed from the point currently farthest
                    // from its assigned center.
                    if let Some((farthest, _)) = costs
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    {
                        centers[j] = source.row(farthest).to_dense();
                    }
                }
            }
        }

        let (new_assignments, new_costs, new_sum_costs) =
            assign(source, &centers, opts.measure, &opts.prior, prior_sum);
        let new_cost: f64 = new_sum_costs.iter().sum();

        assignments = new_assignments;
        costs = new_costs;
        sum_costs = new_sum_costs;

        let rel_improvement = if prev_cost > 0. {
            (prev_cost - new_cost) / prev_cost
        } else {
            0.
        };
        prev_cost = new_cost;
        if rel_improvement < opts.eps {
            break;
        }
    }
    let _ = sum_costs;

    Ok(LloydResult {
        centers,
        assignments,
        costs,
        initial_cost,
        final_cost: prev_cost,
        iterations_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DenseMatrix;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use rand_xoshiro::Xoshiro256PlusPlus;

    // S4 (Lloyd on 2-Gaussian mix).
    #[test]
    fn s4_two_gaussian_mix() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let normal = Normal::new(0.0f32, 1.0f32).unwrap();
        let n = 200;
        let mut data = Array2::<f32>::zeros((n, 2));
        let mut truth = vec![0u32; n];
        for i in 0..n {
            let cluster = if i < n / 2 { 0 } else { 1 };
            truth[i] = cluster as u32;
            let cx = if cluster == 0 { 0.0 } else { 10.0 };
            data[[i, 0]] = cx + normal.sample(&mut rng);
            data[[i, 1]] = normal.sample(&mut rng);
        }
        let source = DenseMatrix::new(data);
        let initial_centers = vec![
            source.row(0).to_dense(),
            source.row(n - 1).to_dense(),
        ];
        use crate::distance::FeatureSource;
        let opts = LloydOpts {
            measure: Measure::L2 { squared: true },
            prior: Prior::None,
            eps: 1e-6,
            max_rounds: 50,
        };
        let res = refine(&source, initial_centers, None, &opts).unwrap();
        assert!(res.final_cost <= res.initial_cost + 1e-6);

        // the assignment should recover the true split, up to a global relabeling
        let mut agree = 0usize;
        let mut disagree = 0usize;
        for i in 0..n {
            if res.assignments[i] as u32 == truth[i] {
                agree += 1;
            } else {
                disagree += 1;
            }
        }
        let matched = agree.max(disagree);
        assert!(matched as f64 / n as f64 >= 0.95, "matched fraction too low: {matched}/{n}");
    }

    #[test]
    fn monotonic_cost_on_synthetic_grid() {
        let mut data = Array2::<f32>::zeros((20, 1));
        for i in 0..20 {
            data[[i, 0]] = i as f32;
        }
        let source = DenseMatrix::new(data);
        use crate::distance::FeatureSource;
        let initial_centers = vec![source.row(0).to_dense(), source.row(19).to_dense()];
        let opts = LloydOpts::default();
        let res = refine(&source, initial_centers, None, &opts).unwrap();
        assert!(res.final_cost <= res.initial_cost + 1e-9);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let data = Array2::<f32>::zeros((5, 2));
        let source = DenseMatrix::new(data);
        let bad_centers = vec![vec![0.0f32, 0.0, 0.0]];
        let opts = LloydOpts::default();
        assert!(refine(&source, bad_centers, None, &opts).is_err());
    }
}
