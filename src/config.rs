use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bins::{BinConfig, default_bin_configs};
use crate::elasticity::ElasticitySpec;
use crate::error::LoadError;
use crate::generator::IncrementRange;
use crate::grid::Constraints;

/// Extra bin configurations cut at quantiles of the account volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBins {
    /// How many of the four quintile points become volume edges.
    pub volume_cuts: usize,
    pub growth_edges: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub seed: u64,
    pub iterations_per_config: usize,
    pub bin_configs: Vec<BinConfig>,
    pub quantile_bins: Option<QuantileBins>,
    pub constraints: Constraints,
    pub increment: IncrementRange,
    pub elasticity: ElasticitySpec,
    /// Lower bound applied to predicted growth. Off unless set.
    pub predicted_growth_floor: Option<f64>,
    /// Resamples for the winning grid's bootstrap interval. Off unless set.
    pub bootstrap: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

impl EngineConfig {
    pub fn canonical() -> Self {
        EngineConfig {
            seed: 42,
            iterations_per_config: 50,
            // 5 volume tiers x 4 growth tiers each; growth floor at 8%.
            bin_configs: default_bin_configs(),
            quantile_bins: None,
            constraints: Constraints::default(),
            increment: IncrementRange::default(),
            elasticity: ElasticitySpec::Fixed { coefficient: 2.0 },
            predicted_growth_floor: None,
            bootstrap: None,
        }
    }

    /// Read a JSON config. Fields the file leaves out keep their canonical
    /// values.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_str(&text)?)
    }
}
