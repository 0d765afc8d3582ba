use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::account::Account;
use crate::error::EngineError;
use crate::grid::RebateGrid;
use crate::projection::{EvaluationRecord, Projector};
use crate::types::{AccountId, TierPair};

/// Grid-level sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub projected_revenue: f64,
    pub rebate_cost: f64,
    pub net_revenue: f64,
    /// Accounts that contributed to the sums.
    pub evaluated: usize,
    /// Evaluated accounts with a non-zero rebate.
    pub rebated: usize,
    /// Accounts left out because previous revenue was zero.
    pub undefined_growth: usize,
}

impl Totals {
    fn add(&mut self, r: &EvaluationRecord) {
        self.projected_revenue += r.projected_revenue;
        self.rebate_cost += r.rebate_cost;
        self.net_revenue += r.net_revenue;
        self.evaluated += 1;
        if r.rebate_cost != 0.0 {
            self.rebated += 1;
        }
    }

    /// Rebate paid per unit of projected revenue. Zero if nothing was projected.
    pub fn effective_rebate_rate(&self) -> f64 {
        if self.projected_revenue == 0.0 { 0.0 } else { self.rebate_cost / self.projected_revenue }
    }

    /// Share of evaluated accounts that receive a rebate.
    pub fn coverage(&self) -> f64 {
        if self.evaluated == 0 { 0.0 } else { self.rebated as f64 / self.evaluated as f64 }
    }
}

/// Accounts and money that landed in one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellSummary {
    pub tier: TierPair,
    pub volume_tier: String,
    pub growth_tier: String,
    pub rate: f64,
    pub accounts: usize,
    pub projected_revenue: f64,
    pub rebate_cost: f64,
    pub net_revenue: f64,
}

impl CellSummary {
    fn new(r: &EvaluationRecord) -> Self {
        CellSummary {
            tier: r.tier,
            volume_tier: r.volume_tier.clone(),
            growth_tier: r.growth_tier.clone(),
            rate: r.rate,
            accounts: 0,
            projected_revenue: 0.0,
            rebate_cost: 0.0,
            net_revenue: 0.0,
        }
    }

    fn add(&mut self, r: &EvaluationRecord) {
        self.accounts += 1;
        self.projected_revenue += r.projected_revenue;
        self.rebate_cost += r.rebate_cost;
        self.net_revenue += r.net_revenue;
    }
}

/// Per-account table plus totals for one grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub records: Vec<EvaluationRecord>,
    /// Occupied cells only, volume-major.
    pub cells: Vec<CellSummary>,
    pub totals: Totals,
    /// Accounts excluded for undefined growth.
    pub excluded: Vec<AccountId>,
}

/// Project every account and keep the per-account records.
pub fn evaluate(
    projector: &Projector<'_>,
    accounts: &[Account],
    grid: &RebateGrid,
) -> Result<Evaluation, EngineError> {
    let mut records = Vec::with_capacity(accounts.len());
    let mut excluded = Vec::new();
    let mut totals = Totals::default();
    let mut cells: BTreeMap<TierPair, CellSummary> = BTreeMap::new();

    for account in accounts {
        match projector.project(account, grid) {
            Ok(r) => {
                totals.add(&r);
                cells.entry(r.tier).or_insert_with(|| CellSummary::new(&r)).add(&r);
                records.push(r);
            }
            Err(EngineError::UndefinedGrowth { account }) => excluded.push(account),
            Err(e) => return Err(e),
        }
    }
    totals.undefined_growth = excluded.len();

    if !excluded.is_empty() {
        warn!(count = excluded.len(), "accounts with zero previous revenue excluded");
    }
    Ok(Evaluation { records, cells: cells.into_values().collect(), totals, excluded })
}

/// Totals only. Used inside the search loop, where records would be thrown
/// away immediately.
pub fn score(
    projector: &Projector<'_>,
    accounts: &[Account],
    grid: &RebateGrid,
) -> Result<Totals, EngineError> {
    let mut totals = Totals::default();
    for account in accounts {
        match projector.project(account, grid) {
            Ok(r) => totals.add(&r),
            Err(EngineError::UndefinedGrowth { .. }) => totals.undefined_growth += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bins::BinConfig;
    use crate::elasticity::ElasticityModel;
    use crate::types::TierPair;

    fn bins() -> BinConfig {
        BinConfig::new(vec![50_000.0], vec![0.08]).unwrap()
    }

    fn ten_percent_grid() -> RebateGrid {
        let rows = vec![vec![0.0, 0.10], vec![0.0, 0.10]];
        RebateGrid::from_rows(bins(), rows).unwrap()
    }

    #[test]
    fn uplift_example() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts = vec![Account::new(1, 100_000.0, 50_000.0)];

        let best = score(&projector, &accounts, &ten_percent_grid()).unwrap();
        let baseline = score(&projector, &accounts, &RebateGrid::zeros(bins())).unwrap();

        assert!((best.projected_revenue - 120_000.0).abs() < 1e-6);
        assert!((best.rebate_cost - 12_000.0).abs() < 1e-6);
        assert!((best.net_revenue - 108_000.0).abs() < 1e-6);
        assert_eq!(baseline.net_revenue, 100_000.0);
        assert!((best.net_revenue - baseline.net_revenue - 8_000.0).abs() < 1e-6);
    }

    #[test]
    fn undefined_growth_is_excluded_and_counted_once() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts = vec![
            Account::new(1, 100_000.0, 50_000.0),
            Account::new(2, 80_000.0, 0.0),
            Account::new(3, 10_000.0, 9_000.0),
        ];
        let grid = ten_percent_grid();

        let eval = evaluate(&projector, &accounts, &grid).unwrap();
        assert_eq!(eval.totals.undefined_growth, 1);
        assert_eq!(eval.excluded, vec![AccountId(2)]);
        assert_eq!(eval.records.len(), 2);
        assert!(eval.records.iter().all(|r| r.account != AccountId(2)));

        let sum: f64 = eval.records.iter().map(|r| r.net_revenue).sum();
        assert_eq!(eval.totals.net_revenue, sum);
        assert_eq!(score(&projector, &accounts, &grid).unwrap(), eval.totals);
    }

    #[test]
    fn coverage_and_effective_rate() {
        let model = ElasticityModel::fixed(0.0);
        let projector = Projector::new(&model);
        let accounts = vec![
            // 100% growth, pays 10%
            Account::new(1, 100_000.0, 50_000.0),
            // 1% growth, floor tier
            Account::new(2, 100_000.0, 99_009.9),
        ];
        let t = score(&projector, &accounts, &ten_percent_grid()).unwrap();
        assert_eq!(t.rebated, 1);
        assert_eq!(t.coverage(), 0.5);
        assert!((t.effective_rebate_rate() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn calculate_is_bit_identical_across_runs() {
        let model = ElasticityModel::fixed(3.3);
        let projector = Projector::new(&model);
        let accounts: Vec<Account> = (1..200)
            .map(|i| Account::new(i, 1_000.0 * i as f64, 900.0 * i as f64 + (i % 7) as f64 * 50.0))
            .collect();
        let grid = ten_percent_grid();
        let a = evaluate(&projector, &accounts, &grid).unwrap();
        let b = evaluate(&projector, &accounts, &grid).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.totals.net_revenue.to_bits(), b.totals.net_revenue.to_bits());
    }

    #[test]
    fn floor_accounts_have_exactly_zero_cost() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts: Vec<Account> =
            (1..50).map(|i| Account::new(i, 10_000.0 * i as f64, 10_000.0 * i as f64)).collect();
        let eval = evaluate(&projector, &accounts, &ten_percent_grid()).unwrap();
        for r in &eval.records {
            assert_eq!(r.tier, TierPair::new(r.tier.volume, 0));
            assert_eq!(r.rebate_cost, 0.0);
        }
    }

    #[test]
    fn cells_group_accounts_by_tier_pair() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts = vec![
            Account::new(1, 100_000.0, 50_000.0),
            Account::new(2, 10_000.0, 9_900.0),
            Account::new(3, 120_000.0, 60_000.0),
            Account::new(4, 70_000.0, 0.0),
            Account::new(5, 20_000.0, 10_000.0),
        ];
        let eval = evaluate(&projector, &accounts, &ten_percent_grid()).unwrap();

        let tiers: Vec<TierPair> = eval.cells.iter().map(|c| c.tier).collect();
        assert_eq!(tiers, vec![TierPair::new(0, 0), TierPair::new(0, 1), TierPair::new(1, 1)]);
        let top = &eval.cells[2];
        assert_eq!((top.volume_tier.as_str(), top.growth_tier.as_str()), ("50000+", "8%+"));
        assert_eq!(top.accounts, 2);
        assert_eq!(top.rate, 0.10);
        let expected: f64 = eval.records.iter().filter(|r| r.tier == top.tier).map(|r| r.rebate_cost).sum();
        assert_eq!(top.rebate_cost, expected);

        assert_eq!(eval.cells.iter().map(|c| c.accounts).sum::<usize>(), eval.totals.evaluated);
        let net: f64 = eval.cells.iter().map(|c| c.net_revenue).sum();
        assert!((net - eval.totals.net_revenue).abs() < 1e-6);
    }

    #[test]
    fn non_finite_input_aborts() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts = vec![Account::new(1, f64::INFINITY, 10.0)];
        assert!(score(&projector, &accounts, &ten_percent_grid()).is_err());
    }

    #[test]
    fn non_positive_revenue_aborts() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        let accounts = vec![Account::new(1, 100_000.0, 50_000.0), Account::new(2, -10.0, 10.0)];
        let err = evaluate(&projector, &accounts, &ten_percent_grid()).unwrap_err();
        assert!(matches!(err, EngineError::NonPositiveRevenue { account: AccountId(2), .. }));
    }
}
