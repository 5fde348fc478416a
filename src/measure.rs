//! Dissimilarity measures and priors (§3 of the spec).
//!
//! A [`Measure`] is a tagged enum rather than a trait object: the set of measures
//! is closed and small, and dispatch needs to stay on the hot path of assignment
//! and sensitivity-sampling loops.

use crate::error::{SumError, SumResult};

/// Smoothing applied to KL-family measures on sparse / zero-containing inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    None,
    /// Symmetric Dirichlet smoothing with concentration beta, added to every coordinate.
    Dirichlet(f64),
    /// Gamma/Beta conjugate-style smoothing, parameterized the same way as Dirichlet
    /// but kept distinct because the centroid update differs (see [`crate::lloyd`]).
    GammaBeta(f64),
    /// Per-feature smoothing vector, one entry per dimension.
    FeatureSpecific(Vec<f64>),
}

impl Prior {
    /// Sum of the prior mass added across all D dimensions, given D.
    pub fn mass(&self, dim: usize) -> f64 {
        match self {
            Prior::None => 0.,
            Prior::Dirichlet(beta) | Prior::GammaBeta(beta) => beta * dim as f64,
            Prior::FeatureSpecific(v) => v.iter().sum(),
        }
    }

    /// Smoothing mass contributed to coordinate `j`.
    pub fn at(&self, j: usize) -> f64 {
        match self {
            Prior::None => 0.,
            Prior::Dirichlet(beta) | Prior::GammaBeta(beta) => *beta,
            Prior::FeatureSpecific(v) => v.get(j).copied().unwrap_or(0.),
        }
    }
}

/// Dissimilarity measures supported by the core.
///
/// `L2` carries a `squared` flag rather than being split into two variants:
/// every downstream consumer (D² seeding, Lloyd, local search) needs to know
/// whether it is already looking at a squared cost, so the flag travels with
/// the tag instead of being inferred from context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    L1,
    L2 { squared: bool },
    Bhattacharyya,
    Kl,
    SymmetricKl,
    ItakuraSaito,
    JensenShannon,
    TotalVariation,
    Hellinger,
}

impl Measure {
    /// Whether the measure satisfies the triangle inequality (matters for
    /// which seeding/local-search guarantees apply).
    pub fn is_metric(self) -> bool {
        matches!(
            self,
            Measure::L1
                | Measure::L2 { squared: false }
                | Measure::Bhattacharyya
                | Measure::JensenShannon
                | Measure::TotalVariation
                | Measure::Hellinger
        )
    }

    /// Whether this measure needs prior smoothing to stay finite on inputs with zeros.
    pub fn requires_prior(self) -> bool {
        matches!(
            self,
            Measure::Kl | Measure::SymmetricKl | Measure::ItakuraSaito | Measure::JensenShannon
        )
    }

    /// Whether this measure assumes its inputs already sum to one (a distribution).
    pub fn is_normalized(self) -> bool {
        matches!(
            self,
            Measure::Kl
                | Measure::SymmetricKl
                | Measure::JensenShannon
                | Measure::Bhattacharyya
                | Measure::TotalVariation
                | Measure::Hellinger
        )
    }

    pub fn from_key(key: &str) -> SumResult<Self> {
        Ok(match key {
            "l1" => Measure::L1,
            "l2" => Measure::L2 { squared: false },
            "sql2" | "l2sq" => Measure::L2 { squared: true },
            "bhattacharyya" => Measure::Bhattacharyya,
            "kl" => Measure::Kl,
            "symmetric_kl" | "skl" => Measure::SymmetricKl,
            "itakura_saito" | "is" => Measure::ItakuraSaito,
            "jensen_shannon" | "js" => Measure::JensenShannon,
            "total_variation" | "tv" => Measure::TotalVariation,
            "hellinger" => Measure::Hellinger,
            other => {
                return Err(SumError::InvalidArgument(format!(
                    "unknown measure key '{other}'"
                )))
            }
        })
    }
}

/// Evaluate `measure(x, c)` with prior smoothing, following the
/// `msr_with_prior(measure, x, c, prior, prior_sum, sum_x, sum_c)` contract from §4.4:
/// callers pass precomputed row sums so the evaluation stays O(nnz) on sparse rows
/// instead of re-summing on every call.
///
/// `x` and `c` are dense rows here (the sparse path densifies locally via
/// [`crate::distance::RowView::to_dense`] before calling this); that keeps the
/// measure implementations simple while the sparse/dense dispatch lives in the
/// distance oracle layer (§9 design note).
pub fn msr_with_prior(
    measure: Measure,
    x: &[f32],
    c: &[f32],
    prior: &Prior,
    prior_sum: f64,
    sum_x: f64,
    sum_c: f64,
) -> f64 {
    debug_assert_eq!(x.len(), c.len());
    match measure {
        Measure::L1 => x
            .iter()
            .zip(c.iter())
            .map(|(a, b)| (*a as f64 - *b as f64).abs())
            .sum(),
        Measure::L2 { squared } => {
            let sq: f64 = x
                .iter()
                .zip(c.iter())
                .map(|(a, b)| {
                    let d = *a as f64 - *b as f64;
                    d * d
                })
                .sum();
            if squared {
                sq
            } else {
                sq.sqrt()
            }
        }
        Measure::Bhattacharyya => {
            let norm_x = sum_x.max(f64::EPSILON);
            let norm_c = sum_c.max(f64::EPSILON);
            let bc: f64 = x
                .iter()
                .zip(c.iter())
                .enumerate()
                .map(|(j, (a, b))| {
                    let pa = (*a as f64 + prior.at(j)) / norm_x;
                    let pb = (*b as f64 + prior.at(j)) / norm_c;
                    (pa * pb).sqrt()
                })
                .sum();
            -bc.max(f64::EPSILON).ln()
        }
        Measure::Kl => {
            let norm_x = sum_x + prior_sum;
            let norm_c = sum_c + prior_sum;
            x.iter()
                .zip(c.iter())
                .enumerate()
                .map(|(j, (a, b))| {
                    let pa = (*a as f64 + prior.at(j)) / norm_x;
                    let pb = (*b as f64 + prior.at(j)) / norm_c;
                    if pa <= 0. {
                        0.
                    } else {
                        pa * (pa / pb.max(f64::EPSILON)).ln()
                    }
                })
                .sum()
        }
        Measure::SymmetricKl => {
            0.5 * msr_with_prior(Measure::Kl, x, c, prior, prior_sum, sum_x, sum_c)
                + 0.5 * msr_with_prior(Measure::Kl, c, x, prior, prior_sum, sum_c, sum_x)
        }
        Measure::ItakuraSaito => {
            let norm_x = sum_x + prior_sum;
            let norm_c = sum_c + prior_sum;
            x.iter()
                .zip(c.iter())
                .enumerate()
                .map(|(j, (a, b))| {
                    let pa = ((*a as f64 + prior.at(j)) / norm_x).max(f64::EPSILON);
                    let pb = ((*b as f64 + prior.at(j)) / norm_c).max(f64::EPSILON);
                    pa / pb - (pa / pb).ln() - 1.
                })
                .sum()
        }
        Measure::JensenShannon => {
            let norm_x = sum_x + prior_sum;
            let norm_c = sum_c + prior_sum;
            let mut kl_x_m = 0.;
            let mut kl_c_m = 0.;
            for j in 0..x.len() {
                let pa = (x[j] as f64 + prior.at(j)) / norm_x;
                let pb = (c[j] as f64 + prior.at(j)) / norm_c;
                let m = 0.5 * (pa + pb);
                if pa > 0. {
                    kl_x_m += pa * (pa / m.max(f64::EPSILON)).ln();
                }
                if pb > 0. {
                    kl_c_m += pb * (pb / m.max(f64::EPSILON)).ln();
                }
            }
            0.5 * kl_x_m + 0.5 * kl_c_m
        }
        Measure::TotalVariation => {
            let norm_x = sum_x.max(f64::EPSILON);
            let norm_c = sum_c.max(f64::EPSILON);
            0.5 * x
                .iter()
                .zip(c.iter())
                .map(|(a, b)| ((*a as f64 / norm_x) - (*b as f64 / norm_c)).abs())
                .sum::<f64>()
        }
        Measure::Hellinger => {
            let norm_x = sum_x.max(f64::EPSILON);
            let norm_c = sum_c.max(f64::EPSILON);
            let sq: f64 = x
                .iter()
                .zip(c.iter())
                .map(|(a, b)| {
                    let d = (*a as f64 / norm_x).sqrt() - (*b as f64 / norm_c).sqrt();
                    d * d
                })
                .sum();
            (0.5 * sq).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_squared_matches_manual() {
        let x = [1.0f32, 2.0, 3.0];
        let c = [0.0f32, 2.0, 5.0];
        let got = msr_with_prior(Measure::L2 { squared: true }, &x, &c, &Prior::None, 0., 0., 0.);
        assert!((got - (1.0 + 0.0 + 4.0)).abs() < 1e-9);
    }

    #[test]
    fn l1_distance() {
        let x = [1.0f32, -2.0, 3.0];
        let c = [0.0f32, 2.0, 5.0];
        let got = msr_with_prior(Measure::L1, &x, &c, &Prior::None, 0., 0., 0.);
        assert!((got - (1.0 + 4.0 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn kl_zero_when_identical() {
        let x = [0.25f32, 0.25, 0.25, 0.25];
        let got = msr_with_prior(Measure::Kl, &x, &x, &Prior::None, 0., 1., 1.);
        assert!(got.abs() < 1e-6);
    }

    #[test]
    fn unknown_measure_key_errors() {
        assert!(Measure::from_key("bogus").is_err());
        assert_eq!(Measure::from_key("l1").unwrap(), Measure::L1);
    }
}
