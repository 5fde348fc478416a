//! Mini-batch clustering refiner: a stochastic reseeding variant of the Lloyd
//! refiner (§4.5).

use rand::seq::index::sample as sample_without_replacement;
use rand::Rng;
use rayon::prelude::*;

use crate::distance::FeatureSource;
use crate::error::{SumError, SumResult};
use crate::measure::{msr_with_prior, Measure, Prior};
use crate::rng::{tag, worker_rng};

#[derive(Debug, Clone)]
pub struct MiniBatchOpts {
    pub measure: Measure,
    pub prior: Prior,
    pub batch_size: usize,
    pub with_rep: bool,
    pub max_iters: usize,
    /// Recompute global cost every this many iterations.
    pub checkin_freq: usize,
    /// Reseed the worst center after this many checkins without improvement.
    pub reseed_count: usize,
    pub seed: u64,
}

impl Default for MiniBatchOpts {
    fn default() -> Self {
        MiniBatchOpts {
            measure: Measure::L2 { squared: true },
            prior: Prior::None,
            batch_size: 100,
            with_rep: true,
            max_iters: 100,
            checkin_freq: 10,
            reseed_count: 3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MiniBatchResult {
    pub centers: Vec<Vec<f32>>,
    pub assignments: Vec<u32>,
    pub costs: Vec<f32>,
    pub final_cost: f64,
    pub iterations_used: usize,
    pub checkins_without_improvement: usize,
}

fn draw_batch<R: Rng>(n: usize, batch_size: usize, with_rep: bool, rng: &mut R) -> Vec<usize> {
    let b = batch_size.min(n).max(1);
    if with_rep {
        (0..b).map(|_| rng.random_range(0..n)).collect()
    } else {
        sample_without_replacement(rng, n, b).into_vec()
    }
}

fn nearest_center(
    source: &dyn FeatureSource,
    centers: &[Vec<f32>],
    measure: Measure,
    prior: &Prior,
    prior_sum: f64,
    i: usize,
) -> (u32, f32) {
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
}

fn global_cost_and_assign(
    source: &dyn FeatureSource,
    centers: &[Vec<f32>],
    measure: Measure,
    prior: &Prior,
    prior_sum: f64,
) -> (Vec<u32>, Vec<f32>, f64) {
    let n = source.num_points();
    let pairs: Vec<(u32, f32)> = (0..n)
        .into_par_iter()
        .map(|i| nearest_center(source, centers, measure, prior, prior_sum, i))
        .collect();
    let mut assignments = Vec::with_capacity(n);
    let mut costs = Vec::with_capacity(n);
    let mut total = 0f64;
    for (a, c) in pairs {
        assignments.push(a);
        total += c as f64;
        costs.push(c);
    }
    (assignments, costs, total)
}

/// Run the mini-batch refiner starting from `initial_centers` (§4.5): each
/// iteration reassigns only a sampled batch and nudges the touched centers
/// with a decaying learning rate; every `checkin_freq` iterations the global
/// cost is recomputed and, after `reseed_count` checkins without improvement,
/// the center with the highest per-point average cost is reseeded to the
/// farthest point in the full set.
pub fn refine<F: FeatureSource>(
    source: &F,
    initial_centers: Vec<Vec<f32>>,
    opts: &MiniBatchOpts,
) -> SumResult<MiniBatchResult> {
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
            return Err(SumError::InvalidArgument("center dimension mismatch".to_string()));
        }
    }

    let prior_sum = opts.prior.mass(dim);
    let mut centers = initial_centers;
    let mut count_seen = vec![0u64; k];

    let mut best_cost = f64::INFINITY;
    let mut checkins_without_improvement = 0usize;
    let mut iterations_used = 0usize;

    for iter in 0..opts.max_iters {
        iterations_used += 1;
        let mut rng = worker_rng(opts.seed, iter, tag::MINIBATCH);
        let batch = draw_batch(n, opts.batch_size, opts.with_rep, &mut rng);

        let mut batch_sum = vec![vec![0f64; dim]; k];
        let mut batch_count = vec![0u64; k];
        for &i in &batch {
            let (a, _cost) = nearest_center(source, &centers, opts.measure, &opts.prior, prior_sum, i);
            let a = a as usize;
            let xi = source.row(i).to_dense();
            for (d, v) in xi.iter().enumerate() {
                batch_sum[a][d] += *v as f64;
            }
            batch_count[a] += 1;
        }

        for j in 0..k {
            if batch_count[j] == 0 {
                continue;
            }
            let mean_batch_j: Vec<f64> = batch_sum[j].iter().map(|s| s / batch_count[j] as f64).collect();
            count_seen[j] += batch_count[j];
            let eta = 1.0 / (count_seen[j] as f64 + 1.0);
            for d in 0..dim {
                let cur = centers[j][d] as f64;
                centers[j][d] = (cur + eta * (mean_batch_j[d] - cur)) as f32;
            }
        }

        if (iter + 1) % opts.checkin_freq == 0 {
            let (assignments, _costs, total) =
                global_cost_and_assign(source, &centers, opts.measure, &opts.prior, prior_sum);
            if total < best_cost - 1e-12 {
                best_cost = total;
                checkins_without_improvement = 0;
            } else {
                checkins_without_improvement += 1;
            }
            if checkins_without_improvement >= opts.reseed_count {
                // reseed the center with the highest average cost among its
                // assigned points to the point currently farthest from its center.
                let mut per_center_cost = vec![0f64; k];
                let mut per_center_count = vec![0u64; k];
                for (i, a) in assignments.iter().enumerate() {
                    let (_, cost) = nearest_center(source, &centers, opts.measure, &opts.prior, prior_sum, i);
                    per_center_cost[*a as usize] += cost as f64;
                    per_center_count[*a as usize] += 1;
                }
                let worst = (0..k)
                    .max_by(|a, b| {
                        let avg = |j: usize| {
                            if per_center_count[j] == 0 {
                                0.
                            } else {
                                per_center_cost[j] / per_center_count[j] as f64
                            }
                        };
                        avg(*a).partial_cmp(&avg(*b)).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap();
                let (_, global_costs, _) =
                    global_cost_and_assign(source, &centers, opts.measure, &opts.prior, prior_sum);
                if let Some((farthest, _)) = global_costs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                {
                    centers[worst] = source.row(farthest).to_dense();
                    count_seen[worst] = 0;
                }
                checkins_without_improvement = 0;
            }
        }
    }

    let (assignments, costs, final_cost) =
        global_cost_and_assign(source, &centers, opts.measure, &opts.prior, prior_sum);

    Ok(MiniBatchResult {
        centers,
        assignments,
        costs,
        final_cost,
        iterations_used,
        checkins_without_improvement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DenseMatrix;
    use ndarray::Array2;

    #[test]
    fn runs_to_completion_and_improves() {
        let mut data = Array2::<f32>::zeros((100, 1));
        for i in 0..100 {
            data[[i, 0]] = if i < 50 { 0.0 } else { 10.0 };
        }
        let source = DenseMatrix::new(data);
        use crate::distance::FeatureSource;
        let initial_centers = vec![source.row(0).to_dense(), source.row(1).to_dense()];
        let opts = MiniBatchOpts {
            batch_size: 10,
            max_iters: 50,
            checkin_freq: 5,
            reseed_count: 2,
            seed: 9,
            ..Default::default()
        };
        let res = refine(&source, initial_centers, &opts).unwrap();
        assert_eq!(res.centers.len(), 2);
        assert!(res.final_cost.is_finite());
        assert_eq!(res.assignments.len(), 100);
    }

    #[test]
    fn rejects_empty_centers() {
        let data = Array2::<f32>::zeros((5, 1));
        let source = DenseMatrix::new(data);
        let opts = MiniBatchOpts::default();
        assert!(refine(&source, vec![], &opts).is_err());
    }
}
