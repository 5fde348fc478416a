//! Local-search k-median refiner: single-swap hill-climbing over a precomputed
//! distance matrix (§4.6).
//!
//! The source this spec distills (`zeta1999/minicore`, see
//! `examples/original_source/code/include/fgc/lsearch.h`) computes swap gain
//! under-approximately: it ignores that evicting the old center requires
//! reassigning its points to their true second-nearest center in the solution.
//! §4.6/§9 flag this as a deviation worth fixing; this implementation takes
//! that option and maintains a second-nearest-assignment vector (`asn2`) so
//! [`LocalKMedSearcher::evaluate_swap`] is exact.

use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;

use crate::distance::DistanceMatrix;
use crate::error::{SumError, SumResult};
use crate::rng::{tag, worker_rng};

/// k-center 2-approximation via farthest-first traversal, used to initialize
/// the local-search solution (§4.6 "Initialization"; ported from the source's
/// `kcenter_greedy_2approx`, see DESIGN.md). Assumes `mat.nrows() == mat.ncols()`
/// — the common case of a full pairwise distance matrix over one point set —
/// so that a farthest column can be reused directly as the next candidate row.
pub fn kcenter_greedy_2approx(mat: &dyn DistanceMatrix, k: usize, seed: u64) -> SumResult<Vec<usize>> {
    let nrows = mat.nrows();
    let ncols = mat.ncols();
    if k == 0 || k > nrows {
        return Err(SumError::InvalidArgument(format!(
            "k ({k}) must be in [1, nrows={nrows}]"
        )));
    }
    let mut rng = worker_rng(seed, 0, tag::LOCAL_SEARCH_INIT);
    let first = rng.random_range(0..nrows);
    let mut sol = vec![first];
    let mut dist: Vec<f32> = (0..ncols).map(|j| mat.get(first, j)).collect();

    while sol.len() < k {
        let (far_col, _) = dist
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        let next_row = far_col.min(nrows - 1);
        sol.push(next_row);
        for j in 0..ncols {
            let d = mat.get(next_row, j);
            if d < dist[j] {
                dist[j] = d;
            }
        }
    }
    Ok(sol)
}

/// Per-§3 local-search state: a candidate solution `sol`, the nearest-center
/// assignment `asn` for every column, and `current_cost = sum_j D[asn[j], j]`.
pub struct LocalKMedSearcher<'a> {
    mat: &'a dyn DistanceMatrix,
    sol: HashSet<usize>,
    asn: Vec<usize>,
    asn2: Vec<usize>,
    current_cost: f64,
    eps: f64,
    k: usize,
    swap_count: usize,
}

impl<'a> LocalKMedSearcher<'a> {
    pub fn new(mat: &'a dyn DistanceMatrix, k: usize, eps: f64, seed: u64) -> SumResult<Self> {
        if k == 0 {
            return Err(SumError::InvalidArgument("k is zero".to_string()));
        }
        if eps <= 0. {
            return Err(SumError::InvalidArgument("eps must be positive".to_string()));
        }
        let init = kcenter_greedy_2approx(mat, k, seed)?;
        let mut searcher = LocalKMedSearcher {
            mat,
            sol: init.into_iter().collect(),
            asn: vec![0; mat.ncols()],
            asn2: vec![0; mat.ncols()],
            current_cost: f64::INFINITY,
            eps,
            k,
            swap_count: 0,
        };
        searcher.assign();
        Ok(searcher)
    }

    pub fn solution(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.sol.iter().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn assignments(&self) -> &[usize] {
        &self.asn
    }

    pub fn current_cost(&self) -> f64 {
        self.current_cost
    }

    pub fn swap_count(&self) -> usize {
        self.swap_count
    }

    /// Recompute nearest and second-nearest assignments for every column
    /// against the current `sol`, and `current_cost` from the nearest-center
    /// distances.
    fn assign(&mut self) {
        let sol: Vec<usize> = self.sol.iter().copied().collect();
        let ncols = self.mat.ncols();
        let results: Vec<(usize, usize, f32)> = (0..ncols)
            .into_par_iter()
            .map(|j| {
                let mut best = f32::INFINITY;
                let mut best_c = sol[0];
                let mut second = f32::INFINITY;
                let mut second_c = sol[0];
                for &c in &sol {
                    let d = self.mat.get(c, j);
                    if d < best {
                        second = best;
                        second_c = best_c;
                        best = d;
                        best_c = c;
                    } else if d < second {
                        second = d;
                        second_c = c;
                    }
                }
                let _ = second;
                (best_c, second_c, best)
            })
            .collect();
        let mut total = 0f64;
        for (j, (c, c2, d)) in results.into_iter().enumerate() {
            self.asn[j] = c;
            self.asn2[j] = c2;
            total += d as f64;
        }
        self.current_cost = total;
    }

    /// Exact swap gain of replacing `old_center` with `new_center`: for columns
    /// currently assigned to `old_center`, the fallback cost is the true
    /// second-nearest distance (`asn2`), not the under-approximation from the
    /// source (see module docs).
    pub fn evaluate_swap(&self, new_center: usize, old_center: usize) -> f64 {
        (0..self.mat.ncols())
            .into_par_iter()
            .map(|j| {
                let cur = self.mat.get(self.asn[j], j);
                let to_new = self.mat.get(new_center, j);
                if self.asn[j] == old_center {
                    let fallback = self.mat.get(self.asn2[j], j);
                    let new_best = fallback.min(to_new);
                    (cur - new_best) as f64
                } else if to_new < cur {
                    (cur - to_new) as f64
                } else {
                    0.
                }
            })
            .sum()
    }

    /// Run the single-swap improvement loop to convergence (§4.6 "Main loop"):
    /// repeatedly scan (old center, candidate) pairs and take the first swap
    /// whose exact gain exceeds `current_cost * eps / k`, restarting the scan
    /// after every accepted swap. Stops when a full scan finds none.
    pub fn run(&mut self) {
        loop {
            let threshold = self.current_cost * self.eps / self.k as f64;
            let old_centers: Vec<usize> = self.solution();
            let mut swapped = false;
            'outer: for &old_center in &old_centers {
                for candidate in 0..self.mat.nrows() {
                    if self.sol.contains(&candidate) {
                        continue;
                    }
                    let gain = self.evaluate_swap(candidate, old_center);
                    if gain > threshold {
                        log::trace!(
                            "swapping {candidate} for {old_center}, swap {}",
                            self.swap_count + 1
                        );
                        self.sol.remove(&old_center);
                        self.sol.insert(candidate);
                        self.assign();
                        self.swap_count += 1;
                        swapped = true;
                        break 'outer;
                    }
                }
            }
            if !swapped {
                log::debug!(
                    "local search converged after {} swaps, cost {}",
                    self.swap_count,
                    self.current_cost
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DenseDistanceMatrix;
    use ndarray::Array2;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn line_matrix(n: usize) -> DenseDistanceMatrix {
        let mut data = Array2::<f32>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                data[[i, j]] = (i as f32 - j as f32).abs();
            }
        }
        DenseDistanceMatrix::new(data)
    }

    // S3 (local search convergence): D 5x5 with D[i][j]=|i-j|, k=2, eps=0.01.
    // Optimal sol = {1,3} with cost 3; must terminate with cost <= 3 within <= 10 swaps.
    #[test]
    fn s3_local_search_convergence() {
        log_init_test();
        let mat = line_matrix(5);
        let mut searcher = LocalKMedSearcher::new(&mat, 2, 0.01, 7).unwrap();
        searcher.run();
        assert!(searcher.current_cost() <= 3.0 + 1e-9, "cost {}", searcher.current_cost());
        assert!(searcher.swap_count() <= 10);
    }

    #[test]
    fn no_swap_improves_past_threshold() {
        let mat = line_matrix(8);
        let mut searcher = LocalKMedSearcher::new(&mat, 3, 0.01, 1).unwrap();
        searcher.run();
        let threshold = searcher.current_cost() * 0.01 / 3.0;
        for old in searcher.solution() {
            for cand in 0..mat.nrows() {
                if searcher.solution().contains(&cand) {
                    continue;
                }
                let gain = searcher.evaluate_swap(cand, old);
                assert!(gain <= threshold + 1e-9, "swap ({cand},{old}) gain {gain} > {threshold}");
            }
        }
    }

    #[test]
    fn rejects_k_zero() {
        let mat = line_matrix(5);
        assert!(LocalKMedSearcher::new(&mat, 0, 0.01, 1).is_err());
    }

    #[test]
    fn assignments_always_in_solution() {
        let mat = line_matrix(6);
        let mut searcher = LocalKMedSearcher::new(&mat, 2, 0.05, 3).unwrap();
        searcher.run();
        let sol = searcher.solution();
        for a in searcher.assignments() {
            assert!(sol.contains(a));
        }
    }
}
