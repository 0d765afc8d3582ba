use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::{AccountId, Axis, TierPair};

/// Which grid invariant a cell broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rule {
    /// Non-zero rate outside `[min_rate, max_rate]`, or not a rate at all.
    Bounds,
    /// Growth tier at or below the floor carries a non-zero rate.
    Floor,
    /// Rate does not clear the previous growth tier by `min_step`.
    GrowthMonotonicity,
    /// Rate is below the same growth tier one volume tier down.
    VolumeMonotonicity,
    /// No grid can satisfy the constraints on this bin configuration.
    Infeasible,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rule::Bounds => "rate bounds",
            Rule::Floor => "zero-growth floor",
            Rule::GrowthMonotonicity => "growth monotonicity",
            Rule::VolumeMonotonicity => "volume monotonicity",
            Rule::Infeasible => "feasibility",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid {axis} bin edges: {reason}")]
    InvalidBinEdges { axis: Axis, reason: String },

    #[error("grid shape mismatch: expected {expected:?} (volume x growth), found {found:?}")]
    InvalidGridShape { expected: (usize, usize), found: (usize, usize) },

    #[error("cell {cell} breaks {rule} (rate {rate:.4})")]
    ConstraintViolation { cell: TierPair, rule: Rule, rate: f64 },

    #[error("invalid constraints: {0}")]
    InvalidConstraints(String),

    #[error("account {account} has zero previous revenue; growth is undefined")]
    UndefinedGrowth { account: AccountId },

    #[error("elasticity model fit failed: {0}")]
    ModelFit(String),

    #[error("account {account} has non-positive current revenue ({value})")]
    NonPositiveRevenue { account: AccountId, value: f64 },

    #[error("{what} is not finite ({value})")]
    NonFiniteValue { what: &'static str, value: f64 },

    #[error("search has no candidates: need at least one bin configuration and one iteration")]
    EmptySearch,
}

/// Errors raised while reading accounts, grids, or configuration from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error at line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("grid table: {0}")]
    Table(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<csv::Error> for LoadError {
    fn from(source: csv::Error) -> Self {
        let line = source.position().map(|p| p.line()).unwrap_or(0);
        LoadError::Csv { line, source }
    }
}
