use serde::Serialize;

use crate::account::Account;
use crate::elasticity::ElasticityModel;
use crate::error::EngineError;
use crate::grid::RebateGrid;
use crate::types::{AccountId, TierPair};

/// One account's outcome under one grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub account: AccountId,
    pub group: Option<String>,
    pub name: Option<String>,
    pub current_revenue: f64,
    /// Observed growth, used only to place the account in a tier.
    pub growth: f64,
    pub tier: TierPair,
    pub volume_tier: String,
    pub growth_tier: String,
    pub rate: f64,
    pub predicted_growth: f64,
    pub projected_revenue: f64,
    pub rebate_cost: f64,
    pub net_revenue: f64,
}

/// Applies a grid to accounts through an elasticity model.
///
/// Negative predicted growth passes through unchanged unless a
/// `predicted_growth_floor` is set.
#[derive(Debug, Clone, Copy)]
pub struct Projector<'a> {
    model: &'a ElasticityModel,
    predicted_growth_floor: Option<f64>,
}

impl<'a> Projector<'a> {
    pub fn new(model: &'a ElasticityModel) -> Self {
        Projector { model, predicted_growth_floor: None }
    }

    pub fn with_growth_floor(mut self, floor: Option<f64>) -> Self {
        self.predicted_growth_floor = floor;
        self
    }

    pub fn model(&self) -> &ElasticityModel {
        self.model
    }

    pub fn project(&self, account: &Account, grid: &RebateGrid) -> Result<EvaluationRecord, EngineError> {
        let growth = account.growth().ok_or(EngineError::UndefinedGrowth { account: account.id })?;
        if !account.current_revenue.is_finite() {
            return Err(EngineError::NonFiniteValue {
                what: "current revenue",
                value: account.current_revenue,
            });
        }
        if account.current_revenue <= 0.0 {
            return Err(EngineError::NonPositiveRevenue { account: account.id, value: account.current_revenue });
        }

        let tier = grid.bins().assign(account.current_revenue, growth)?;
        let rate = grid.rate(tier);

        let mut predicted_growth = self.model.predict_growth(rate);
        if let Some(floor) = self.predicted_growth_floor {
            predicted_growth = predicted_growth.max(floor);
        }

        let projected_revenue = account.current_revenue * (1.0 + predicted_growth);
        let rebate_cost = projected_revenue * rate;
        let net_revenue = projected_revenue - rebate_cost;

        Ok(EvaluationRecord {
            account: account.id,
            group: account.group.clone(),
            name: account.name.clone(),
            current_revenue: account.current_revenue,
            growth,
            tier,
            volume_tier: grid.bins().volume.label(tier.volume),
            growth_tier: grid.bins().growth.label(tier.growth),
            rate,
            predicted_growth,
            projected_revenue,
            rebate_cost,
            net_revenue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bins::BinConfig;
    use crate::elasticity::LinearFit;

    fn bins() -> BinConfig {
        BinConfig::new(vec![5_000.0, 15_000.0, 30_000.0, 50_000.0], vec![0.08, 0.15, 0.20]).unwrap()
    }

    fn grid_with(cell: TierPair, rate: f64) -> RebateGrid {
        let mut g = RebateGrid::zeros(bins());
        g.set(cell, rate);
        g
    }

    #[test]
    fn walkthrough_account() {
        let previous = 20_000.0 / 1.1;
        let account = Account::new(1, 20_000.0, previous);
        let grid = grid_with(TierPair::new(2, 1), 0.11);
        let model = ElasticityModel::fixed(5.0);

        let r = Projector::new(&model).project(&account, &grid).unwrap();

        assert_eq!(r.tier, TierPair::new(2, 1));
        assert_eq!(r.volume_tier, "15000-30000");
        assert_eq!(r.growth_tier, "8%-15%");
        let predicted = 5.0 * 0.11;
        let projected = 20_000.0 * (1.0 + predicted);
        assert_eq!(r.predicted_growth, predicted);
        assert_eq!(r.projected_revenue, projected);
        assert_eq!(r.rebate_cost, projected * 0.11);
        assert_eq!(r.net_revenue, projected - projected * 0.11);
        assert!((r.predicted_growth - 0.55).abs() < 1e-12);
        assert!((r.projected_revenue - 31_000.0).abs() < 1e-6);
        assert!((r.rebate_cost - 3_410.0).abs() < 1e-6);
        assert!((r.net_revenue - 27_590.0).abs() < 1e-6);
    }

    #[test]
    fn zero_previous_revenue_is_undefined_growth() {
        let model = ElasticityModel::fixed(2.0);
        let err = Projector::new(&model)
            .project(&Account::new(9, 8_000.0, 0.0), &RebateGrid::zeros(bins()))
            .unwrap_err();
        assert_eq!(err, EngineError::UndefinedGrowth { account: AccountId(9) });
    }

    #[test]
    fn floor_tier_pays_nothing() {
        let model = ElasticityModel::fixed(2.0);
        let grid = grid_with(TierPair::new(2, 2), 0.05);
        let r = Projector::new(&model).project(&Account::new(1, 20_000.0, 19_500.0), &grid).unwrap();
        assert_eq!(r.tier.growth, 0);
        assert_eq!(r.rebate_cost, 0.0);
        assert_eq!(r.net_revenue, 20_000.0);
    }

    #[test]
    fn negative_predicted_growth_propagates_unless_floored() {
        let model = ElasticityModel::Learned(LinearFit { coefficient: 0.5, intercept: -0.2, samples: 10 });
        let grid = grid_with(TierPair::new(2, 3), 0.10);
        let account = Account::new(1, 20_000.0, 10_000.0);

        let r = Projector::new(&model).project(&account, &grid).unwrap();
        assert!((r.predicted_growth + 0.15).abs() < 1e-12);
        assert!(r.projected_revenue < 20_000.0);

        let floored = Projector::new(&model).with_growth_floor(Some(0.0)).project(&account, &grid).unwrap();
        assert_eq!(floored.predicted_growth, 0.0);
        assert_eq!(floored.projected_revenue, 20_000.0);
    }

    #[test]
    fn non_finite_revenue_is_rejected() {
        let model = ElasticityModel::fixed(2.0);
        let err = Projector::new(&model)
            .project(&Account::new(1, f64::NAN, 100.0), &RebateGrid::zeros(bins()))
            .unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteValue { .. }));
    }

    #[test]
    fn zero_or_negative_revenue_is_rejected() {
        let model = ElasticityModel::fixed(2.0);
        let projector = Projector::new(&model);
        for current in [0.0, -250.0] {
            let err = projector.project(&Account::new(4, current, 100.0), &RebateGrid::zeros(bins())).unwrap_err();
            assert_eq!(err, EngineError::NonPositiveRevenue { account: AccountId(4), value: current });
        }
    }

    #[test]
    fn undefined_growth_wins_over_zero_revenue() {
        let model = ElasticityModel::fixed(2.0);
        let err = Projector::new(&model)
            .project(&Account::new(5, 0.0, 0.0), &RebateGrid::zeros(bins()))
            .unwrap_err();
        assert_eq!(err, EngineError::UndefinedGrowth { account: AccountId(5) });
    }
}
