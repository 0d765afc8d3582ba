use serde::{Deserialize, Serialize};

use crate::bins::BinConfig;
use crate::error::{EngineError, Rule};
use crate::types::TierPair;

/// Absolute tolerance for rate comparisons during validation.
pub const RATE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Growth tiers whose upper edge is at or below this pay nothing.
    pub growth_floor: f64,
    /// Required rate increase from one growth tier to the next.
    pub min_step: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Reject grids whose rate falls when moving up a volume tier.
    pub volume_monotonic: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            growth_floor: 0.08,
            min_step: 0.01,
            min_rate: 0.01,
            max_rate: 0.15,
            volume_monotonic: true,
        }
    }
}

impl Constraints {
    /// Check the constraints on their own.
    pub fn check(&self) -> Result<(), EngineError> {
        let fields = [
            ("growth_floor", self.growth_floor),
            ("min_step", self.min_step),
            ("min_rate", self.min_rate),
            ("max_rate", self.max_rate),
        ];
        if let Some((name, v)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::InvalidConstraints(format!("{name} is not finite ({v})")));
        }
        if !(0.0..=1.0).contains(&self.min_rate)
            || !(0.0..=1.0).contains(&self.max_rate)
            || self.min_rate > self.max_rate
        {
            return Err(EngineError::InvalidConstraints(format!(
                "rate bounds must satisfy 0 <= min_rate <= max_rate <= 1 (got [{}, {}])",
                self.min_rate, self.max_rate
            )));
        }
        if self.min_step <= 0.0 {
            return Err(EngineError::InvalidConstraints(format!(
                "min_step must be positive (got {})",
                self.min_step
            )));
        }
        Ok(())
    }

    /// Check that some grid on `bins` can satisfy the constraints: the
    /// non-floor growth tiers must fit between `min_rate` and `max_rate` in
    /// steps of `min_step`.
    pub fn check_feasible(&self, bins: &BinConfig) -> Result<(), EngineError> {
        self.check()?;
        let (_, n_growth) = bins.shape();
        let paying = n_growth - bins.floor_tier_count(self.growth_floor);
        if paying == 0 {
            return Ok(());
        }
        let needed = self.min_rate + (paying - 1) as f64 * self.min_step;
        if needed > self.max_rate + RATE_TOLERANCE {
            return Err(EngineError::ConstraintViolation {
                cell: TierPair::new(0, n_growth - 1),
                rule: Rule::Infeasible,
                rate: needed,
            });
        }
        Ok(())
    }
}

/// One rate per (volume tier, growth tier), stored volume-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebateGrid {
    bins: BinConfig,
    rates: Vec<f64>,
}

impl RebateGrid {
    /// The all-zero grid: the no-rebate baseline.
    pub fn zeros(bins: BinConfig) -> Self {
        let (v, g) = bins.shape();
        RebateGrid { bins, rates: vec![0.0; v * g] }
    }

    /// Build from one row of rates per volume tier.
    pub fn from_rows(bins: BinConfig, rows: Vec<Vec<f64>>) -> Result<Self, EngineError> {
        let expected = bins.shape();
        let width = rows.first().map_or(0, Vec::len);
        if rows.len() != expected.0 || rows.iter().any(|r| r.len() != expected.1) {
            let found = rows.iter().find(|r| r.len() != expected.1).map_or(width, Vec::len);
            return Err(EngineError::InvalidGridShape { expected, found: (rows.len(), found) });
        }
        Ok(RebateGrid { bins, rates: rows.into_iter().flatten().collect() })
    }

    pub fn bins(&self) -> &BinConfig {
        &self.bins
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bins.shape()
    }

    fn index(&self, cell: TierPair) -> usize {
        cell.volume * self.bins.growth.tier_count() + cell.growth
    }

    /// Rate for `cell`. Panics if the cell is outside the grid; tier pairs
    /// produced by this grid's own bins are always inside.
    pub fn rate(&self, cell: TierPair) -> f64 {
        self.rates[self.index(cell)]
    }

    pub(crate) fn set(&mut self, cell: TierPair, rate: f64) {
        let i = self.index(cell);
        self.rates[i] = rate;
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.rates.chunks(self.bins.growth.tier_count()).map(<[f64]>::to_vec).collect()
    }

    /// Cells with their rates, in volume-major order.
    pub fn cells(&self) -> impl Iterator<Item = (TierPair, f64)> + '_ {
        let (v, g) = self.shape();
        (0..v).flat_map(move |vi| (0..g).map(move |gi| TierPair::new(vi, gi)))
            .map(|c| (c, self.rate(c)))
    }

    /// Check every invariant in cell order, reporting the first failure.
    /// Never modifies the grid.
    pub fn validate(&self, constraints: &Constraints) -> Result<(), EngineError> {
        constraints.check()?;
        let violation = |cell: TierPair, rule: Rule, rate: f64| {
            Err(EngineError::ConstraintViolation { cell, rule, rate })
        };

        for (cell, rate) in self.cells() {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return violation(cell, Rule::Bounds, rate);
            }

            if self.bins.is_floor_tier(cell.growth, constraints.growth_floor) {
                if rate != 0.0 {
                    return violation(cell, Rule::Floor, rate);
                }
                continue;
            }

            if rate != 0.0
                && (rate < constraints.min_rate - RATE_TOLERANCE
                    || rate > constraints.max_rate + RATE_TOLERANCE)
            {
                return violation(cell, Rule::Bounds, rate);
            }

            if cell.growth > 0 && !self.bins.is_floor_tier(cell.growth - 1, constraints.growth_floor) {
                let prev = self.rate(TierPair::new(cell.volume, cell.growth - 1));
                if rate < prev + constraints.min_step - RATE_TOLERANCE {
                    return violation(cell, Rule::GrowthMonotonicity, rate);
                }
            }

            if constraints.volume_monotonic && cell.volume > 0 {
                let below = self.rate(TierPair::new(cell.volume - 1, cell.growth));
                if rate < below - RATE_TOLERANCE {
                    return violation(cell, Rule::VolumeMonotonicity, rate);
                }
            }
        }
        Ok(())
    }
}
