//! Thin CLI front door over the `sumcore` library: seed centers, refine with
//! Lloyd iterations, and emit a weighted coreset. Library code never touches
//! stdout or initializes a logging backend (§6 "Exit conditions") — this
//! binary is the only place `env_logger` gets installed.

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array2;
use rand_distr::{Distribution, Normal};

use sumcore::config::SumOpts;
use sumcore::distance::{DenseMatrix, FeatureSource};
use sumcore::lloyd::{self, LloydOpts};
use sumcore::measure::{Measure, Prior};
use sumcore::seeding::{self, SeedOpts};
use sumcore::sensitivity::SensitivitySampler;

/// Build a coreset and a refined k-median/k-means solution for a dataset of
/// synthetic 2-D points (a stand-in for the out-of-scope CSV/graph/sparse
/// ingestion layer, §1).
#[derive(Parser, Debug)]
#[command(name = "sumcore", about = "coreset + k-median/k-means over a point set")]
struct CliOpts {
    /// Number of synthetic points to generate.
    #[arg(long, default_value_t = 1000)]
    n: usize,

    /// Number of centers.
    #[arg(long, default_value_t = 5)]
    k: usize,

    /// Coreset size to sample.
    #[arg(long, default_value_t = 200)]
    coreset_size: usize,

    /// Base RNG seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// kmc2 chain length per seeding step; 0 disables kmc2.
    #[arg(long, default_value_t = 0)]
    kmc2_rounds: usize,

    /// Local-search++ refinement rounds after initial seeding.
    #[arg(long, default_value_t = 0)]
    lspp: usize,

    /// Lloyd iteration cap.
    #[arg(long, default_value_t = 50)]
    max_rounds: usize,

    /// Candidates drawn per D² seeding step; the one minimizing resulting sum
    /// of squared costs is kept ("greedy" k-means++). 1 disables it.
    #[arg(long, default_value_t = 1)]
    n_local_trials: usize,

    /// Fraction of points, by D² cost, excluded from center-candidate
    /// sampling during seeding (robust/outlier-aware seeding).
    #[arg(long, default_value_t = 0.0)]
    outlier_fraction: f64,

    /// Draw the coreset via the batch exponential-spacings construction
    /// instead of per-draw alias-table lookups.
    #[arg(long, default_value_t = false)]
    use_exponential_skips: bool,
}

impl From<&CliOpts> for SumOpts {
    fn from(cli: &CliOpts) -> Self {
        SumOpts {
            k: cli.k,
            kmc2_rounds: cli.kmc2_rounds,
            lspp: cli.lspp,
            max_rounds: cli.max_rounds,
            n_local_trials: cli.n_local_trials,
            outlier_fraction: cli.outlier_fraction,
            use_exponential_skips: cli.use_exponential_skips,
            seed: cli.seed,
            ..Default::default()
        }
    }
}

fn synthetic_points(n: usize, seed: u64) -> Array2<f32> {
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0f32).unwrap();
    let mut data = Array2::<f32>::zeros((n, 2));
    for i in 0..n {
        let cx = if i % 2 == 0 { 0.0 } else { 20.0 };
        data[[i, 0]] = cx + normal.sample(&mut rng);
        data[[i, 1]] = normal.sample(&mut rng);
    }
    data
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = CliOpts::parse();
    let opts: SumOpts = (&cli).into();
    opts.validate().context("invalid run configuration")?;

    log::info!("generating {} synthetic points", cli.n);
    let data = synthetic_points(cli.n, cli.seed);
    let source = DenseMatrix::new(data);

    log::info!("seeding {} centers", cli.k);
    let seed_opts = SeedOpts {
        k: opts.k,
        measure: Measure::L2 { squared: true },
        prior: Prior::None,
        kmc2_rounds: opts.kmc2_rounds,
        lspp_rounds: opts.lspp,
        ntimes: 1,
        n_local_trials: opts.n_local_trials,
        outlier_fraction: opts.outlier_fraction,
        seed: opts.seed,
    };
    let seeded = seeding::seed(&source, &seed_opts).context("seeding failed")?;
    log::info!(
        "seeded {} centers, total bicriteria cost {:.3}",
        seeded.indices.len(),
        seeded.costs.iter().map(|c| *c as f64).sum::<f64>()
    );

    let lloyd_opts = LloydOpts {
        measure: Measure::L2 { squared: true },
        prior: Prior::None,
        eps: 1e-4,
        max_rounds: cli.max_rounds,
    };
    let initial_centers: Vec<Vec<f32>> = seeded
        .indices
        .iter()
        .map(|idx| source.row(*idx as usize).to_dense())
        .collect();
    let refined = lloyd::refine(&source, initial_centers, None, &lloyd_opts).context("Lloyd refinement failed")?;
    log::info!(
        "Lloyd refined in {} iterations: {:.3} -> {:.3}",
        refined.iterations_used,
        refined.initial_cost,
        refined.final_cost
    );

    let sensitivity = SensitivitySampler::build(
        cli.n,
        cli.k,
        &refined.costs,
        &refined.assignments,
        None,
        opts.sensitivity,
        cli.seed,
        1.0,
    )
    .context("sensitivity sampling failed")?;
    let mut coreset = sensitivity
        .sample(cli.coreset_size, cli.seed, opts.use_exponential_skips)
        .context("coreset sampling failed")?;
    coreset.compact();

    println!(
        "coreset: {} points (requested {}), total weight {:.3}",
        coreset.size(),
        cli.coreset_size,
        coreset.weights.iter().map(|w| *w as f64).sum::<f64>()
    );

    Ok(())
}
