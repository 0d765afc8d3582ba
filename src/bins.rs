use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{Axis, TierPair};

/// Strictly increasing boundaries for one axis.
///
/// `n` edges give `n + 1` right-closed buckets:
/// `(-inf, e0], (e0, e1], ..., (e[n-1], +inf)`. On the volume axis the first
/// bucket is read as `[0, e0]` since revenue is never negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinEdges {
    axis: Axis,
    edges: Vec<f64>,
}

impl BinEdges {
    pub fn new(axis: Axis, edges: Vec<f64>) -> Result<Self, EngineError> {
        let invalid = |reason: String| EngineError::InvalidBinEdges { axis, reason };

        if edges.is_empty() {
            return Err(invalid("at least one edge is required".into()));
        }
        if let Some(e) = edges.iter().find(|e| !e.is_finite()) {
            return Err(invalid(format!("edge {e} is not finite")));
        }
        if let Some(w) = edges.windows(2).find(|w| w[1] <= w[0]) {
            return Err(invalid(format!("edges must strictly increase ({} then {})", w[0], w[1])));
        }
        if axis == Axis::Volume && edges[0] < 0.0 {
            return Err(invalid(format!("volume edge {} is negative", edges[0])));
        }
        Ok(BinEdges { axis, edges })
    }

    pub fn volume(edges: Vec<f64>) -> Result<Self, EngineError> {
        Self::new(Axis::Volume, edges)
    }

    pub fn growth(edges: Vec<f64>) -> Result<Self, EngineError> {
        Self::new(Axis::Growth, edges)
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of buckets (always `edges.len() + 1`).
    pub fn tier_count(&self) -> usize {
        self.edges.len() + 1
    }

    /// Bucket index for `value`. Total over finite reals and monotone.
    pub fn assign(&self, value: f64) -> Result<usize, EngineError> {
        if !value.is_finite() {
            let what = match self.axis {
                Axis::Volume => "volume",
                Axis::Growth => "growth",
            };
            return Err(EngineError::NonFiniteValue { what, value });
        }
        Ok(self.edges.partition_point(|&e| e < value))
    }

    /// Upper edge of bucket `tier`, or `None` for the open-ended last bucket.
    pub fn upper(&self, tier: usize) -> Option<f64> {
        self.edges.get(tier).copied()
    }

    /// Lower edge of bucket `tier`, or `None` for the first bucket.
    pub fn lower(&self, tier: usize) -> Option<f64> {
        tier.checked_sub(1).and_then(|i| self.edges.get(i).copied())
    }

    /// Human-readable label: `0-5000`, `5000-15000`, `50000+` on volume,
    /// `<=8%`, `8%-15%`, `20%+` on growth.
    pub fn label(&self, tier: usize) -> String {
        match self.axis {
            Axis::Volume => match (self.lower(tier), self.upper(tier)) {
                (None, Some(hi)) => format!("0-{hi}"),
                (Some(lo), Some(hi)) => format!("{lo}-{hi}"),
                (Some(lo), None) => format!("{lo}+"),
                (None, None) => "all".to_string(),
            },
            Axis::Growth => match (self.lower(tier), self.upper(tier)) {
                (None, Some(hi)) => format!("<={}", pct(hi)),
                (Some(lo), Some(hi)) => format!("{}-{}", pct(lo), pct(hi)),
                (Some(lo), None) => format!("{}+", pct(lo)),
                (None, None) => "all".to_string(),
            },
        }
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.tier_count()).map(|t| self.label(t)).collect()
    }
}

fn pct(x: f64) -> String {
    let p = x * 100.0;
    if (p - p.round()).abs() < 1e-9 {
        format!("{}%", p.round())
    } else {
        format!("{p:.1}%")
    }
}

/// A candidate pair of edge sets: one bin configuration for the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBinConfig", into = "RawBinConfig")]
pub struct BinConfig {
    pub volume: BinEdges,
    pub growth: BinEdges,
}

/// Wire form: `{"volume_edges": [...], "growth_edges": [...]}`.
#[derive(Serialize, Deserialize)]
struct RawBinConfig {
    volume_edges: Vec<f64>,
    growth_edges: Vec<f64>,
}

impl TryFrom<RawBinConfig> for BinConfig {
    type Error = EngineError;

    fn try_from(raw: RawBinConfig) -> Result<Self, Self::Error> {
        BinConfig::new(raw.volume_edges, raw.growth_edges)
    }
}

impl From<BinConfig> for RawBinConfig {
    fn from(c: BinConfig) -> Self {
        RawBinConfig { volume_edges: c.volume.edges, growth_edges: c.growth.edges }
    }
}

impl BinConfig {
    pub fn new(volume_edges: Vec<f64>, growth_edges: Vec<f64>) -> Result<Self, EngineError> {
        Ok(BinConfig {
            volume: BinEdges::volume(volume_edges)?,
            growth: BinEdges::growth(growth_edges)?,
        })
    }

    /// (volume tiers, growth tiers).
    pub fn shape(&self) -> (usize, usize) {
        (self.volume.tier_count(), self.growth.tier_count())
    }

    pub fn assign(&self, volume: f64, growth: f64) -> Result<TierPair, EngineError> {
        Ok(TierPair::new(self.volume.assign(volume)?, self.growth.assign(growth)?))
    }

    /// Whether growth tier `tier` lies entirely at or below `floor`.
    pub fn is_floor_tier(&self, tier: usize, floor: f64) -> bool {
        self.growth.upper(tier).is_some_and(|hi| hi <= floor)
    }

    /// Number of leading growth tiers forced to a zero rate.
    pub fn floor_tier_count(&self, floor: f64) -> usize {
        (0..self.growth.tier_count())
            .take_while(|&t| self.is_floor_tier(t, floor))
            .count()
    }
}

/// Three hand-picked configurations of 5 volume x 4 growth tiers.
pub fn default_bin_configs() -> Vec<BinConfig> {
    let raw: [([f64; 4], [f64; 3]); 3] = [
        ([5_000.0, 15_000.0, 30_000.0, 50_000.0], [0.08, 0.15, 0.20]),
        ([7_000.0, 20_000.0, 35_000.0, 50_000.0], [0.08, 0.12, 0.18]),
        ([10_000.0, 20_000.0, 40_000.0, 50_000.0], [0.08, 0.14, 0.20]),
    ];
    raw.iter()
        .map(|(v, g)| BinConfig {
            volume: BinEdges { axis: Axis::Volume, edges: v.to_vec() },
            growth: BinEdges { axis: Axis::Growth, edges: g.to_vec() },
        })
        .collect()
}

/// Bin configurations cut at quantiles of the observed data.
///
/// Every combination of `volume_cuts` volume quantiles (from the quintile
/// points of `volumes`) is paired with the fixed `growth_edges`. Duplicate
/// quantiles (heavily tied data) are skipped rather than producing invalid
/// edges.
pub fn quantile_bin_configs(
    volumes: &[f64],
    volume_cuts: usize,
    growth_edges: &[f64],
) -> Result<Vec<BinConfig>, EngineError> {
    let growth = BinEdges::growth(growth_edges.to_vec())?;
    let mut sorted: Vec<f64> = volumes.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() || volume_cuts == 0 {
        return Ok(Vec::new());
    }
    sorted.sort_by(f64::total_cmp);

    let points: Vec<f64> = [0.2, 0.4, 0.6, 0.8].iter().map(|&q| quantile(&sorted, q)).collect();

    let mut out = Vec::new();
    for combo in combinations(points.len(), volume_cuts) {
        let edges: Vec<f64> = combo.iter().map(|&i| points[i]).collect();
        if let Ok(volume) = BinEdges::volume(edges) {
            out.push(BinConfig { volume, growth: growth.clone() });
        }
    }
    Ok(out)
}

/// Linear-interpolated quantile of pre-sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// All increasing index tuples of length `k` drawn from `0..n`.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    fn go(start: usize, n: usize, k: usize, cur: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if cur.len() == k {
            out.push(cur.clone());
            return;
        }
        for i in start..n {
            cur.push(i);
            go(i + 1, n, k, cur, out);
            cur.pop();
        }
    }
    let mut out = Vec::new();
    if k <= n {
        go(0, n, k, &mut Vec::with_capacity(k), &mut out);
    }
    out
}
