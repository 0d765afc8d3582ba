use serde::Serialize;
use tracing::info;

use crate::account::Account;
use crate::bins::{BinConfig, quantile_bin_configs};
use crate::config::EngineConfig;
use crate::elasticity::ElasticityModel;
use crate::error::EngineError;
use crate::evaluation::{self, Evaluation, Totals};
use crate::generator::GridGenerator;
use crate::grid::RebateGrid;
use crate::projection::Projector;
use crate::search::{BestGridResult, Search};

/// Calculate-mode output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculateReport {
    pub model: ElasticityModel,
    pub volume_labels: Vec<String>,
    pub growth_labels: Vec<String>,
    pub grid: RebateGrid,
    pub evaluation: Evaluation,
    pub baseline: Totals,
    pub uplift: f64,
}

/// Optimize-mode output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub model: ElasticityModel,
    #[serde(flatten)]
    pub best: BestGridResult,
}

pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.constraints.check()?;
        if config.bootstrap == Some(0) {
            return Err(EngineError::InvalidConstraints("bootstrap needs at least one resample".into()));
        }
        Ok(Engine { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn build_model(&self, accounts: &[Account]) -> Result<ElasticityModel, EngineError> {
        self.config.elasticity.build(accounts)
    }

    fn projector<'a>(&self, model: &'a ElasticityModel) -> Projector<'a> {
        Projector::new(model).with_growth_floor(self.config.predicted_growth_floor)
    }

    /// Validate `grid`, then project every account through it.
    pub fn calculate(&self, accounts: &[Account], grid: &RebateGrid) -> Result<CalculateReport, EngineError> {
        grid.validate(&self.config.constraints)?;
        let model = self.build_model(accounts)?;
        let projector = self.projector(&model);

        let evaluation = evaluation::evaluate(&projector, accounts, grid)?;
        let baseline = evaluation::score(&projector, accounts, &RebateGrid::zeros(grid.bins().clone()))?;
        let uplift = evaluation.totals.net_revenue - baseline.net_revenue;

        info!(
            accounts = evaluation.totals.evaluated,
            net_revenue = evaluation.totals.net_revenue,
            uplift,
            "grid evaluated"
        );

        Ok(CalculateReport {
            model,
            volume_labels: grid.bins().volume.labels(),
            growth_labels: grid.bins().growth.labels(),
            grid: grid.clone(),
            evaluation,
            baseline,
            uplift,
        })
    }

    /// Random search over every configured bin configuration.
    pub fn optimize(&self, accounts: &[Account]) -> Result<OptimizeReport, EngineError> {
        let configs = self.bin_configs(accounts)?;
        let model = self.build_model(accounts)?;
        let best = self.search(&model)?.run(accounts, &configs)?;
        Ok(OptimizeReport { model, best })
    }

    /// Random search around a caller-supplied starting grid.
    pub fn refine(&self, accounts: &[Account], start: &RebateGrid) -> Result<OptimizeReport, EngineError> {
        let model = self.build_model(accounts)?;
        let best = self.search(&model)?.refine(accounts, start)?;
        Ok(OptimizeReport { model, best })
    }

    fn search<'a>(&self, model: &'a ElasticityModel) -> Result<Search<'a>, EngineError> {
        let generator = GridGenerator::new(self.config.constraints, self.config.increment)?;
        Ok(Search::new(self.projector(model), generator, self.config.seed, self.config.iterations_per_config)
            .with_bootstrap(self.config.bootstrap))
    }

    /// Configured bin sets, plus quantile cuts of the account volumes if asked.
    pub fn bin_configs(&self, accounts: &[Account]) -> Result<Vec<BinConfig>, EngineError> {
        let mut configs = self.config.bin_configs.clone();
        if let Some(q) = &self.config.quantile_bins {
            let volumes: Vec<f64> = accounts.iter().map(|a| a.current_revenue).collect();
            let extra = quantile_bin_configs(&volumes, q.volume_cuts, &q.growth_edges)?;
            info!(count = extra.len(), "added quantile bin configurations");
            configs.extend(extra);
        }
        Ok(configs)
    }
}
