use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::bins::BinConfig;
use crate::error::EngineError;
use crate::grid::{Constraints, RebateGrid};
use crate::types::TierPair;

/// Range the per-cell random increment is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IncrementRange {
    pub low: f64,
    pub high: f64,
}

impl Default for IncrementRange {
    fn default() -> Self {
        IncrementRange { low: 0.01, high: 0.03 }
    }
}

/// Builds random valid grids. Cells are walked volume-major; each paying
/// cell takes the larger of its left and lower neighbours, adds a random
/// increment, and only then is clamped:
///
/// ```text
/// lower   = max(min_rate, left + min_step, below)
/// ceiling = max_rate - (tiers to the right) * min_step
/// ```
#[derive(Debug, Clone)]
pub struct GridGenerator {
    constraints: Constraints,
    increment: Uniform<f64>,
    jitter: Uniform<f64>,
}

impl GridGenerator {
    pub fn new(constraints: Constraints, increment: IncrementRange) -> Result<Self, EngineError> {
        constraints.check()?;
        let bad = |reason: String| EngineError::InvalidConstraints(reason);
        if !increment.low.is_finite() || !increment.high.is_finite() || increment.low < 0.0 {
            return Err(bad(format!(
                "increment range [{}, {}] must be finite and non-negative",
                increment.low, increment.high
            )));
        }
        let range = Uniform::new_inclusive(increment.low, increment.high)
            .map_err(|e| bad(format!("increment range [{}, {}]: {e}", increment.low, increment.high)))?;
        let jitter = Uniform::new_inclusive(-increment.high, increment.high)
            .map_err(|e| bad(format!("jitter range: {e}")))?;
        Ok(GridGenerator { constraints, increment: range, jitter })
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// A fresh random grid on `bins`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        bins: &BinConfig,
        rng: &mut R,
    ) -> Result<RebateGrid, EngineError> {
        self.walk(RebateGrid::zeros(bins.clone()), rng, |grid, cell, rng| {
            let left = left_of(grid, cell);
            let below = below_of(grid, cell);
            left.max(below) + self.increment.sample(rng)
        })
    }

    /// A random perturbation of `seed`: each paying cell moves by up to
    /// `increment.high` either way before the same clamp is applied.
    pub fn generate_from<R: Rng + ?Sized>(
        &self,
        seed: &RebateGrid,
        rng: &mut R,
    ) -> Result<RebateGrid, EngineError> {
        self.walk(RebateGrid::zeros(seed.bins().clone()), rng, |_, cell, rng| {
            seed.rate(cell) + self.jitter.sample(rng)
        })
    }

    fn walk<R, F>(&self, mut grid: RebateGrid, rng: &mut R, mut propose: F) -> Result<RebateGrid, EngineError>
    where
        R: Rng + ?Sized,
        F: FnMut(&RebateGrid, TierPair, &mut R) -> f64,
    {
        let c = &self.constraints;
        c.check_feasible(grid.bins())?;

        let (n_volume, n_growth) = grid.shape();
        for v in 0..n_volume {
            for g in 0..n_growth {
                let cell = TierPair::new(v, g);
                if grid.bins().is_floor_tier(g, c.growth_floor) {
                    grid.set(cell, 0.0);
                    continue;
                }

                let left_paying = g > 0 && !grid.bins().is_floor_tier(g - 1, c.growth_floor);
                let step_floor = if left_paying { left_of(&grid, cell) + c.min_step } else { 0.0 };
                let lower = c.min_rate.max(step_floor).max(below_of(&grid, cell));
                let ceiling = c.max_rate - (n_growth - 1 - g) as f64 * c.min_step;

                let candidate = propose(&grid, cell, rng);
                grid.set(cell, candidate.max(lower).min(ceiling));
            }
        }
        Ok(grid)
    }
}

fn left_of(grid: &RebateGrid, cell: TierPair) -> f64 {
    if cell.growth == 0 { 0.0 } else { grid.rate(TierPair::new(cell.volume, cell.growth - 1)) }
}

fn below_of(grid: &RebateGrid, cell: TierPair) -> f64 {
    if cell.volume == 0 { 0.0 } else { grid.rate(TierPair::new(cell.volume - 1, cell.growth)) }
}
