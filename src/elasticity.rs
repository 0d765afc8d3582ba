use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::Account;
use crate::error::EngineError;

/// One historical observation: the rebate rate an account was paid and the
/// growth it showed over the same period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub rate: f64,
    pub growth: f64,
}

/// Ordinary least squares fit of `growth = coefficient * rate + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub coefficient: f64,
    pub intercept: f64,
    /// Observations the fit was computed from (after any filtering).
    pub samples: usize,
}

impl LinearFit {
    pub fn fit(samples: &[Observation]) -> Result<Self, EngineError> {
        if let Some(o) = samples.iter().find(|o| !o.rate.is_finite() || !o.growth.is_finite()) {
            return Err(EngineError::ModelFit(format!(
                "non-finite observation (rate {}, growth {})",
                o.rate, o.growth
            )));
        }
        if samples.len() < 2 {
            return Err(EngineError::ModelFit(format!(
                "need at least 2 observations, have {}",
                samples.len()
            )));
        }

        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|o| o.rate).sum::<f64>() / n;
        let mean_y = samples.iter().map(|o| o.growth).sum::<f64>() / n;

        let (sxx, sxy) = samples.iter().fold((0.0, 0.0), |(sxx, sxy), o| {
            let dx = o.rate - mean_x;
            (sxx + dx * dx, sxy + dx * (o.growth - mean_y))
        });

        if sxx <= f64::EPSILON * n {
            return Err(EngineError::ModelFit(
                "historical rates have no variance; the slope is unidentifiable".into(),
            ));
        }

        let coefficient = sxy / sxx;
        Ok(LinearFit { coefficient, intercept: mean_y - coefficient * mean_x, samples: samples.len() })
    }

    /// Fit after dropping observations whose |growth| reaches `outlier_bound`.
    pub fn fit_filtered(samples: &[Observation], outlier_bound: f64) -> Result<Self, EngineError> {
        let kept: Vec<Observation> =
            samples.iter().copied().filter(|o| o.growth.abs() < outlier_bound).collect();
        if kept.len() < samples.len() {
            info!(
                dropped = samples.len() - kept.len(),
                kept = kept.len(),
                outlier_bound,
                "dropped outlier observations before fitting"
            );
        }
        Self::fit(&kept)
    }
}

/// Growth response to a rebate rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ElasticityModel {
    Fixed { coefficient: f64 },
    Learned(LinearFit),
}

impl ElasticityModel {
    pub fn fixed(coefficient: f64) -> Self {
        ElasticityModel::Fixed { coefficient }
    }

    pub fn predict_growth(&self, rate: f64) -> f64 {
        match self {
            ElasticityModel::Fixed { coefficient } => coefficient * rate,
            ElasticityModel::Learned(fit) => fit.coefficient * rate + fit.intercept,
        }
    }

    pub fn coefficient(&self) -> f64 {
        match self {
            ElasticityModel::Fixed { coefficient } => *coefficient,
            ElasticityModel::Learned(fit) => fit.coefficient,
        }
    }
}

/// (historical rate, growth) pairs for every account that has both.
pub fn samples_from_accounts(accounts: &[Account]) -> Vec<Observation> {
    accounts
        .iter()
        .filter_map(|a| {
            let rate = a.historical_rate?;
            let growth = a.growth()?;
            Some(Observation { rate, growth })
        })
        .collect()
}

/// How the engine should obtain its elasticity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElasticitySpec {
    Fixed {
        coefficient: f64,
    },
    Learned {
        /// Explicit history. When empty, samples are taken from the account
        /// table's `rebate_rate` column.
        #[serde(default)]
        samples: Vec<Observation>,
        /// Drop observations with |growth| at or above this before fitting.
        #[serde(default)]
        outlier_bound: Option<f64>,
        /// Coefficient for a Fixed model if the fit fails. Without one a
        /// failed fit aborts the run.
        #[serde(default)]
        fallback_coefficient: Option<f64>,
    },
}

impl ElasticitySpec {
    pub fn build(&self, accounts: &[Account]) -> Result<ElasticityModel, EngineError> {
        match self {
            ElasticitySpec::Fixed { coefficient } => {
                if !coefficient.is_finite() {
                    return Err(EngineError::NonFiniteValue {
                        what: "elasticity coefficient",
                        value: *coefficient,
                    });
                }
                Ok(ElasticityModel::fixed(*coefficient))
            }
            ElasticitySpec::Learned { samples, outlier_bound, fallback_coefficient } => {
                let owned;
                let samples: &[Observation] = if samples.is_empty() {
                    owned = samples_from_accounts(accounts);
                    &owned
                } else {
                    samples
                };

                let fitted = match outlier_bound {
                    Some(bound) => LinearFit::fit_filtered(samples, *bound),
                    None => LinearFit::fit(samples),
                };

                match (fitted, fallback_coefficient) {
                    (Ok(fit), _) => {
                        info!(
                            coefficient = fit.coefficient,
                            intercept = fit.intercept,
                            samples = fit.samples,
                            "fitted learned elasticity model"
                        );
                        Ok(ElasticityModel::Learned(fit))
                    }
                    (Err(e), Some(c)) => {
                        warn!(error = %e, fallback_coefficient = c, "falling back to fixed elasticity");
                        Ok(ElasticityModel::fixed(*c))
                    }
                    (Err(e), None) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(rate: f64, growth: f64) -> Observation {
        Observation { rate, growth }
    }

    #[test]
    fn fixed_is_proportional() {
        let m = ElasticityModel::fixed(5.0);
        assert_eq!(m.predict_growth(0.0), 0.0);
        assert!((m.predict_growth(0.11) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn fit_recovers_exact_line() {
        let samples: Vec<Observation> =
            (0..10).map(|i| i as f64 * 0.02).map(|r| obs(r, 0.4 * r + 0.03)).collect();
        let fit = LinearFit::fit(&samples).unwrap();
        assert!((fit.coefficient - 0.4).abs() < 1e-9);
        assert!((fit.intercept - 0.03).abs() < 1e-9);
        assert_eq!(fit.samples, 10);

        let m = ElasticityModel::Learned(fit);
        assert!((m.predict_growth(0.10) - 0.07).abs() < 1e-9);
    }

    #[test]
    fn fit_allows_negative_slope() {
        let fit = LinearFit::fit(&[obs(0.0, 0.1), obs(0.1, 0.0)]).unwrap();
        assert!((fit.coefficient + 1.0).abs() < 1e-9);
    }

    #[test]
    fn fit_needs_two_observations() {
        assert!(matches!(LinearFit::fit(&[]), Err(EngineError::ModelFit(_))));
        assert!(matches!(LinearFit::fit(&[obs(0.05, 0.1)]), Err(EngineError::ModelFit(_))));
    }

    #[test]
    fn fit_rejects_constant_rates() {
        let samples = [obs(0.05, 0.1), obs(0.05, 0.2), obs(0.05, 0.3)];
        assert!(matches!(LinearFit::fit(&samples), Err(EngineError::ModelFit(_))));
    }

    #[test]
    fn fit_rejects_non_finite() {
        let samples = [obs(0.05, 0.1), obs(f64::NAN, 0.2)];
        assert!(matches!(LinearFit::fit(&samples), Err(EngineError::ModelFit(_))));
    }

    #[test]
    fn outliers_are_dropped_before_fitting() {
        let mut samples: Vec<Observation> =
            (0..10).map(|i| i as f64 * 0.01).map(|r| obs(r, 2.0 * r)).collect();
        samples.push(obs(0.05, 9.0));
        let fit = LinearFit::fit_filtered(&samples, 0.5).unwrap();
        assert_eq!(fit.samples, 10);
        assert!((fit.coefficient - 2.0).abs() < 1e-9);
    }

    #[test]
    fn samples_come_from_accounts_with_history_and_growth() {
        let accounts = vec![
            Account::new(1, 110.0, 100.0).with_historical_rate(0.05),
            Account::new(2, 110.0, 100.0),
            Account::new(3, 110.0, 0.0).with_historical_rate(0.05),
        ];
        let s = samples_from_accounts(&accounts);
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].rate, 0.05);
    }

    #[test]
    fn learned_spec_falls_back_when_configured() {
        let spec = ElasticitySpec::Learned {
            samples: vec![obs(0.05, 0.1)],
            outlier_bound: None,
            fallback_coefficient: Some(2.0),
        };
        assert_eq!(spec.build(&[]).unwrap(), ElasticityModel::fixed(2.0));
    }

    #[test]
    fn learned_spec_without_fallback_aborts() {
        let spec = ElasticitySpec::Learned {
            samples: vec![],
            outlier_bound: None,
            fallback_coefficient: None,
        };
        assert!(matches!(spec.build(&[]), Err(EngineError::ModelFit(_))));
    }

    #[test]
    fn spec_deserializes_tagged() {
        let spec: ElasticitySpec =
            serde_json::from_str(r#"{"kind":"fixed","coefficient":2.0}"#).unwrap();
        assert_eq!(spec, ElasticitySpec::Fixed { coefficient: 2.0 });
        let spec: ElasticitySpec =
            serde_json::from_str(r#"{"kind":"learned","outlier_bound":0.5}"#).unwrap();
        assert!(matches!(spec, ElasticitySpec::Learned { outlier_bound: Some(_), .. }));
    }
}
