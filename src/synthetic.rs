use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub accounts: usize,
    /// ln(previous revenue) ~ Normal(mu, sigma).
    pub revenue_mu: f64,
    pub revenue_sigma: f64,
    /// Growth the account would have shown with no rebate.
    pub organic_growth_mean: f64,
    pub organic_growth_sd: f64,
    /// Historical rebate rates are drawn uniformly from `[0, max_historical_rate]`.
    pub max_historical_rate: f64,
    /// Extra growth per unit of historical rate. This is the slope a learned
    /// model should recover.
    pub pass_through: f64,
    /// Share of accounts with no previous revenue.
    pub new_account_share: f64,
    pub groups: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        PortfolioConfig {
            accounts: 1_000,
            revenue_mu: 10.0,
            revenue_sigma: 1.0,
            organic_growth_mean: 0.03,
            organic_growth_sd: 0.10,
            max_historical_rate: 0.20,
            pass_through: 2.0,
            new_account_share: 0.0,
            groups: 5,
        }
    }
}

pub fn synth_accounts<R: Rng + ?Sized>(config: &PortfolioConfig, rng: &mut R) -> Result<Vec<Account>, EngineError> {
    let bad = |what: &str, e: &dyn std::fmt::Display| EngineError::InvalidConstraints(format!("{what}: {e}"));
    // rand_distr accepts a negative log-normal sigma and only rejects NaN
    // for the normal sd, so the parameter ranges are checked here.
    let checks = [
        ("revenue_mu", config.revenue_mu, config.revenue_mu.is_finite()),
        ("revenue_sigma", config.revenue_sigma, config.revenue_sigma.is_finite() && config.revenue_sigma >= 0.0),
        ("organic_growth_mean", config.organic_growth_mean, config.organic_growth_mean.is_finite()),
        (
            "organic_growth_sd",
            config.organic_growth_sd,
            config.organic_growth_sd.is_finite() && config.organic_growth_sd >= 0.0,
        ),
        ("max_historical_rate", config.max_historical_rate, (0.0..=1.0).contains(&config.max_historical_rate)),
        ("pass_through", config.pass_through, config.pass_through.is_finite()),
    ];
    if let Some((name, value, _)) = checks.iter().find(|(_, _, ok)| !ok) {
        return Err(EngineError::InvalidConstraints(format!("{name} out of range (got {value})")));
    }
    let revenue = LogNormal::new(config.revenue_mu, config.revenue_sigma).map_err(|e| bad("revenue distribution", &e))?;
    let organic = Normal::new(config.organic_growth_mean, config.organic_growth_sd)
        .map_err(|e| bad("organic growth distribution", &e))?;
    let historical = Uniform::new_inclusive(0.0, config.max_historical_rate)
        .map_err(|e| bad("historical rate range", &e))?;
    if !(0.0..=1.0).contains(&config.new_account_share) {
        return Err(EngineError::InvalidConstraints(format!(
            "new_account_share must be in [0, 1] (got {})",
            config.new_account_share
        )));
    }

    let groups = config.groups.max(1);
    let accounts = (1..=config.accounts as u64)
        .map(|id| {
            let previous = revenue.sample(rng);
            let rate = historical.sample(rng);
            // Growth below -90% would mean a vanished account; keep it a customer.
            let growth = (organic.sample(rng) + config.pass_through * rate).max(-0.9);
            let is_new = rng.random_bool(config.new_account_share);

            let mut account = Account::new(id, previous * (1.0 + growth), if is_new { 0.0 } else { previous })
                .with_historical_rate(rate);
            account.group = Some(format!("G{}", (id - 1) as usize % groups + 1));
            account.name = Some(format!("Account {id:05}"));
            account
        })
        .collect();
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::elasticity::{LinearFit, samples_from_accounts};

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    #[test]
    fn same_seed_same_portfolio() {
        let cfg = PortfolioConfig { accounts: 200, ..PortfolioConfig::default() };
        assert_eq!(synth_accounts(&cfg, &mut rng()).unwrap(), synth_accounts(&cfg, &mut rng()).unwrap());
    }

    #[test]
    fn revenues_are_positive_and_rates_in_range() {
        let cfg = PortfolioConfig::default();
        let accounts = synth_accounts(&cfg, &mut rng()).unwrap();
        assert_eq!(accounts.len(), 1_000);
        for a in &accounts {
            assert!(a.current_revenue > 0.0);
            assert!(a.previous_revenue > 0.0);
            let r = a.historical_rate.unwrap();
            assert!((0.0..=0.2).contains(&r));
        }
    }

    #[test]
    fn learned_fit_recovers_pass_through() {
        let cfg = PortfolioConfig { accounts: 5_000, organic_growth_sd: 0.02, ..PortfolioConfig::default() };
        let accounts = synth_accounts(&cfg, &mut rng()).unwrap();
        let fit = LinearFit::fit(&samples_from_accounts(&accounts)).unwrap();
        assert!((fit.coefficient - 2.0).abs() < 0.05, "coefficient {}", fit.coefficient);
        assert!((fit.intercept - 0.03).abs() < 0.01, "intercept {}", fit.intercept);
    }

    #[test]
    fn new_accounts_have_undefined_growth() {
        let cfg = PortfolioConfig { accounts: 500, new_account_share: 0.1, ..PortfolioConfig::default() };
        let accounts = synth_accounts(&cfg, &mut rng()).unwrap();
        let new = accounts.iter().filter(|a| a.growth().is_none()).count();
        assert!((20..=80).contains(&new), "{new} new accounts");
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let cfg = PortfolioConfig { revenue_sigma: -1.0, ..PortfolioConfig::default() };
        assert!(synth_accounts(&cfg, &mut rng()).is_err());
        let cfg = PortfolioConfig { new_account_share: 1.5, ..PortfolioConfig::default() };
        assert!(synth_accounts(&cfg, &mut rng()).is_err());
    }

    #[test]
    fn out_of_range_spreads_and_rates_name_the_parameter() {
        let cases = [
            ("revenue_sigma", PortfolioConfig { revenue_sigma: -0.5, ..PortfolioConfig::default() }),
            ("revenue_sigma", PortfolioConfig { revenue_sigma: f64::INFINITY, ..PortfolioConfig::default() }),
            ("revenue_mu", PortfolioConfig { revenue_mu: f64::NAN, ..PortfolioConfig::default() }),
            ("organic_growth_sd", PortfolioConfig { organic_growth_sd: -0.1, ..PortfolioConfig::default() }),
            ("max_historical_rate", PortfolioConfig { max_historical_rate: 1.5, ..PortfolioConfig::default() }),
            ("max_historical_rate", PortfolioConfig { max_historical_rate: -0.1, ..PortfolioConfig::default() }),
        ];
        for (name, cfg) in cases {
            match synth_accounts(&cfg, &mut rng()) {
                Err(EngineError::InvalidConstraints(msg)) => assert!(msg.starts_with(name), "{msg}"),
                other => panic!("{name}: expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_spreads_are_allowed() {
        let cfg = PortfolioConfig {
            accounts: 10,
            revenue_sigma: 0.0,
            organic_growth_sd: 0.0,
            max_historical_rate: 0.0,
            ..PortfolioConfig::default()
        };
        let accounts = synth_accounts(&cfg, &mut rng()).unwrap();
        assert!(accounts.iter().all(|a| a.previous_revenue == accounts[0].previous_revenue));
    }
}
