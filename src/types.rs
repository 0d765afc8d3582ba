use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two axes of a rebate grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Current-period revenue. The first bucket is `[0, e0]`.
    Volume,
    /// Period-over-period growth as a fraction. The first bucket is `(-inf, e0]`.
    Growth,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Volume => f.write_str("volume"),
            Axis::Growth => f.write_str("growth"),
        }
    }
}

/// One grid cell: (volume tier index, growth tier index).
///
/// Ordering is volume-major, the same order the generator walks cells in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TierPair {
    pub volume: usize,
    pub growth: usize,
}

impl TierPair {
    pub fn new(volume: usize, growth: usize) -> Self {
        TierPair { volume, growth }
    }
}

impl fmt::Display for TierPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(V{}, G{})", self.volume + 1, self.growth + 1)
    }
}
