use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::account::Account;
use crate::bins::BinConfig;
use crate::error::EngineError;
use crate::evaluation::{self, Totals};
use crate::generator::GridGenerator;
use crate::grid::RebateGrid;
use crate::projection::Projector;

/// Best grid found for one bin configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub config_index: usize,
    pub bins: BinConfig,
    pub best_net_revenue: f64,
    pub best_iteration: usize,
    /// Net revenue of every iteration, in iteration order.
    pub net_revenue_trace: Vec<f64>,
}

/// Spread of the winning grid's net revenue over portfolios resampled with
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BootstrapInterval {
    pub resamples: usize,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
    /// Standard deviation of the resampled net revenues.
    pub std_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestGridResult {
    pub grid: RebateGrid,
    pub volume_labels: Vec<String>,
    pub growth_labels: Vec<String>,
    pub totals: Totals,
    /// Totals under the all-zero grid on the winning bins.
    pub baseline: Totals,
    /// `totals.net_revenue - baseline.net_revenue`.
    pub uplift: f64,
    pub seed: u64,
    pub config_index: usize,
    /// Zero-based. `None` when no candidate beat a supplied starting grid.
    pub iteration: Option<usize>,
    pub candidates_evaluated: usize,
    pub per_config: Vec<ConfigSummary>,
    pub bootstrap: Option<BootstrapInterval>,
}

struct Candidate {
    config_index: usize,
    iteration: usize,
    grid: RebateGrid,
    totals: Totals,
}

/// Bootstrap resamples draw from streams in the upper half so they never
/// share one with a candidate.
const BOOTSTRAP_STREAM: u64 = 1 << 63;

/// Randomized search over bin configurations and candidate grids.
///
/// Every (configuration, iteration) candidate owns a `ChaCha20Rng` seeded
/// from the run seed and placed on its own stream, so the set of candidates
/// is fixed by the seed alone. Candidates are scored on the rayon pool and
/// the winner is picked in one sequential pass in candidate order, keeping
/// the earlier candidate on ties.
pub struct Search<'a> {
    projector: Projector<'a>,
    generator: GridGenerator,
    seed: u64,
    iterations: usize,
    bootstrap: Option<usize>,
}

impl<'a> Search<'a> {
    pub fn new(projector: Projector<'a>, generator: GridGenerator, seed: u64, iterations: usize) -> Self {
        Search { projector, generator, seed, iterations, bootstrap: None }
    }

    /// Attach a bootstrap interval with this many resamples to the result.
    pub fn with_bootstrap(mut self, resamples: Option<usize>) -> Self {
        self.bootstrap = resamples.filter(|&n| n > 0);
        self
    }

    /// Explore `iterations` fresh random grids on each bin configuration.
    pub fn run(&self, accounts: &[Account], configs: &[BinConfig]) -> Result<BestGridResult, EngineError> {
        if configs.is_empty() || self.iterations == 0 {
            return Err(EngineError::EmptySearch);
        }
        for bins in configs {
            self.generator.constraints().check_feasible(bins)?;
        }

        info!(
            configs = configs.len(),
            iterations = self.iterations,
            accounts = accounts.len(),
            seed = self.seed,
            "starting grid search"
        );

        let candidates = self.candidates(accounts, configs.len(), |ci, rng| {
            self.generator.generate(&configs[ci], rng)
        })?;
        self.finalize(accounts, configs, candidates, None)
    }

    /// Explore random perturbations of `start`, which must itself be valid.
    /// The result is never worse than `start`.
    pub fn refine(&self, accounts: &[Account], start: &RebateGrid) -> Result<BestGridResult, EngineError> {
        if self.iterations == 0 {
            return Err(EngineError::EmptySearch);
        }
        start.validate(self.generator.constraints())?;

        info!(
            iterations = self.iterations,
            accounts = accounts.len(),
            seed = self.seed,
            "refining supplied grid"
        );

        let incumbent = Candidate {
            config_index: 0,
            iteration: usize::MAX,
            grid: start.clone(),
            totals: evaluation::score(&self.projector, accounts, start)?,
        };
        let candidates =
            self.candidates(accounts, 1, |_, rng| self.generator.generate_from(start, rng))?;
        self.finalize(accounts, std::slice::from_ref(start.bins()), candidates, Some(incumbent))
    }

    fn candidates<F>(&self, accounts: &[Account], n_configs: usize, make: F) -> Result<Vec<Candidate>, EngineError>
    where
        F: Fn(usize, &mut ChaCha20Rng) -> Result<RebateGrid, EngineError> + Sync,
    {
        let iterations = self.iterations;
        (0..n_configs * iterations)
            .into_par_iter()
            .map(|idx| {
                let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
                rng.set_stream(idx as u64);
                let config_index = idx / iterations;
                let grid = make(config_index, &mut rng)?;
                let totals = evaluation::score(&self.projector, accounts, &grid)?;
                Ok(Candidate { config_index, iteration: idx % iterations, grid, totals })
            })
            .collect()
    }

    /// Resample `accounts` with replacement `resamples` times and sum the
    /// net revenue `grid` earns on each sample. Accounts with undefined
    /// growth are drawn like any other and contribute nothing.
    pub fn bootstrap_interval(
        &self,
        accounts: &[Account],
        grid: &RebateGrid,
        resamples: usize,
    ) -> Result<BootstrapInterval, EngineError> {
        if resamples == 0 {
            return Err(EngineError::InvalidConstraints("bootstrap needs at least one resample".into()));
        }
        let nets = accounts
            .iter()
            .map(|a| match self.projector.project(a, grid) {
                Ok(r) => Ok(r.net_revenue),
                Err(EngineError::UndefinedGrowth { .. }) => Ok(0.0),
                Err(e) => Err(e),
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let n = nets.len();
        let mut sums: Vec<f64> = (0..resamples)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
                rng.set_stream(BOOTSTRAP_STREAM | i as u64);
                (0..n).map(|_| nets[rng.random_range(0..n)]).sum::<f64>()
            })
            .collect();
        sums.sort_by(f64::total_cmp);

        let mean = sums.iter().sum::<f64>() / resamples as f64;
        let variance = sums.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / resamples as f64;
        Ok(BootstrapInterval {
            resamples,
            lower: percentile(&sums, 2.5),
            upper: percentile(&sums, 97.5),
            std_error: variance.sqrt(),
        })
    }

    fn finalize(
        &self,
        accounts: &[Account],
        configs: &[BinConfig],
        candidates: Vec<Candidate>,
        incumbent: Option<Candidate>,
    ) -> Result<BestGridResult, EngineError> {
        let candidates_evaluated = candidates.len();

        let mut per_config: Vec<ConfigSummary> = configs
            .iter()
            .enumerate()
            .map(|(config_index, bins)| ConfigSummary {
                config_index,
                bins: bins.clone(),
                best_net_revenue: f64::NEG_INFINITY,
                best_iteration: 0,
                net_revenue_trace: Vec::with_capacity(self.iterations),
            })
            .collect();

        let mut best = incumbent;
        for c in candidates {
            let summary = &mut per_config[c.config_index];
            summary.net_revenue_trace.push(c.totals.net_revenue);
            if c.totals.net_revenue > summary.best_net_revenue {
                summary.best_net_revenue = c.totals.net_revenue;
                summary.best_iteration = c.iteration;
            }
            if best.as_ref().is_none_or(|b| c.totals.net_revenue > b.totals.net_revenue) {
                best = Some(c);
            }
        }
        let best = best.ok_or(EngineError::EmptySearch)?;

        for s in &per_config {
            debug!(
                config = s.config_index,
                best_net_revenue = s.best_net_revenue,
                best_iteration = s.best_iteration,
                "configuration searched"
            );
        }

        let baseline_grid = RebateGrid::zeros(best.grid.bins().clone());
        let baseline = evaluation::score(&self.projector, accounts, &baseline_grid)?;
        let uplift = best.totals.net_revenue - baseline.net_revenue;

        let bootstrap = self
            .bootstrap
            .map(|resamples| self.bootstrap_interval(accounts, &best.grid, resamples))
            .transpose()?;
        if let Some(b) = &bootstrap {
            debug!(lower = b.lower, upper = b.upper, std_error = b.std_error, "bootstrap interval");
        }

        let iteration = (best.iteration != usize::MAX).then_some(best.iteration);
        info!(
            net_revenue = best.totals.net_revenue,
            baseline = baseline.net_revenue,
            uplift,
            config = best.config_index,
            iteration = ?iteration,
            excluded = best.totals.undefined_growth,
            "grid search finished"
        );

        Ok(BestGridResult {
            volume_labels: best.grid.bins().volume.labels(),
            growth_labels: best.grid.bins().growth.labels(),
            grid: best.grid,
            totals: best.totals,
            baseline,
            uplift,
            seed: self.seed,
            config_index: best.config_index,
            iteration,
            candidates_evaluated,
            per_config,
            bootstrap,
        })
    }
}

/// Linear interpolation between closest ranks of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let Some(&last) = sorted.last() else {
        return 0.0;
    };
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    match sorted.get(lo + 1) {
        Some(&hi) => sorted[lo] + (hi - sorted[lo]) * (pos - lo as f64),
        None => last,
    }
}
