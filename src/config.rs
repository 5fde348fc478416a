//! Run configuration (`SumOpts`, §6).

use crate::error::{SumError, SumResult};
use crate::measure::{Measure, Prior};
use crate::sensitivity::SensitivityScheme;

/// Recognized run options from §6's `SumOpts` table. This is a plain struct
/// rather than a builder with setters: every field is meaningful on its own
/// and callers construct it with struct-update syntax from `SumOpts::default()`.
#[derive(Debug, Clone)]
pub struct SumOpts {
    pub measure: Measure,
    pub k: usize,
    pub prior: Prior,
    pub sensitivity: SensitivityScheme,
    pub outlier_fraction: f64,
    pub max_rounds: usize,
    pub kmc2_rounds: usize,
    pub lspp: usize,
    pub n_local_trials: usize,
    pub extra_sample_tries: usize,
    pub mbsize: i64,
    pub ncheckins: usize,
    pub reseed_count: usize,
    pub with_rep: bool,
    /// Draw coreset samples via the batch exponential-spacings construction
    /// instead of per-draw alias-table lookups; same distribution, see
    /// [`crate::sensitivity::SensitivitySampler::sample`].
    pub use_exponential_skips: bool,
    pub seed: u64,
}

impl Default for SumOpts {
    fn default() -> Self {
        SumOpts {
            measure: Measure::L2 { squared: true },
            k: 1,
            prior: Prior::None,
            sensitivity: SensitivityScheme::Bfl,
            outlier_fraction: 0.0,
            max_rounds: 100,
            kmc2_rounds: 0,
            lspp: 0,
            n_local_trials: 1,
            extra_sample_tries: 1,
            mbsize: -1,
            ncheckins: 10,
            reseed_count: 3,
            with_rep: true,
            use_exponential_skips: false,
            seed: 0,
        }
    }
}

impl SumOpts {
    /// Surface malformed option combinations as `InvalidArgument` rather than
    /// letting them fail deep inside a component.
    pub fn validate(&self) -> SumResult<()> {
        if self.k == 0 {
            return Err(SumError::InvalidArgument("k must be >= 1".to_string()));
        }
        if self.k as u64 > u32::MAX as u64 {
            return Err(SumError::Overflow {
                what: "k".to_string(),
                value: self.k as u64,
            });
        }
        if !(0.0..1.0).contains(&self.outlier_fraction) {
            return Err(SumError::InvalidArgument(
                "outlier_fraction must be in [0, 1)".to_string(),
            ));
        }
        if self.n_local_trials == 0 {
            return Err(SumError::InvalidArgument("n_local_trials must be >= 1".to_string()));
        }
        if self.extra_sample_tries == 0 {
            return Err(SumError::InvalidArgument(
                "extra_sample_tries must be >= 1".to_string(),
            ));
        }
        if self.measure.requires_prior() && matches!(self.prior, Prior::None) {
            log::warn!(
                "measure {:?} normally requires prior smoothing but Prior::None was supplied",
                self.measure
            );
        }
        Ok(())
    }

    /// Mini-batch size, or `None` when mini-batch is disabled (`mbsize == -1`).
    pub fn minibatch_size(&self) -> Option<usize> {
        if self.mbsize < 0 {
            None
        } else {
            Some(self.mbsize as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opts_validate() {
        assert!(SumOpts::default().validate().is_ok());
    }

    #[test]
    fn rejects_k_zero() {
        let opts = SumOpts {
            k: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_bad_outlier_fraction() {
        let opts = SumOpts {
            outlier_fraction: 1.0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn minibatch_off_by_default() {
        assert_eq!(SumOpts::default().minibatch_size(), None);
    }
}
