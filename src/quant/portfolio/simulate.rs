//! # Correlated GBM
//!
//! $$
//! S^i_{t+1} = S^i_t \exp\left((\mu_i - \tfrac12\sigma_i^2)\Delta t + \sigma_i\sqrt{\Delta t}\left(\beta_i M_t + \sqrt{1-\beta_i^2}\,\varepsilon^i_t\right)\right)
//! $$
//!
//! One-factor correlated geometric Brownian motion sampled on weekdays. Assets
//! `i` and `j` have return correlation `beta_i * beta_j`.

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::Weekday;
use impl_new_derive::ImplNew;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::StandardNormal;

use super::data::PriceMatrix;
use super::data::PERIODS_PER_YEAR;
use crate::error::PortfolioError;
use crate::error::Result;

#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct CorrelatedGbm {
  /// Annual drift per asset.
  pub mu: Vec<f64>,
  /// Annual volatility per asset.
  pub sigma: Vec<f64>,
  /// Loading on the common factor, in `[-1, 1]`.
  pub beta: Vec<f64>,
  pub x0: f64,
  pub start: NaiveDate,
  /// Number of trading days, including `start`.
  pub n: usize,
  pub seed: u64,
}

fn is_weekday(d: NaiveDate) -> bool {
  !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The first `n` weekdays on or after `start`.
pub fn weekdays(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
  start
    .iter_days()
    .filter(|d| is_weekday(*d))
    .take(n)
    .collect()
}

impl CorrelatedGbm {
  fn validate(&self) -> Result<()> {
    let n_assets = self.mu.len();
    if n_assets == 0 || self.sigma.len() != n_assets || self.beta.len() != n_assets {
      return Err(PortfolioError::InvalidInput(format!(
        "need matching non-empty mu/sigma/beta, got {}/{}/{}",
        self.mu.len(),
        self.sigma.len(),
        self.beta.len()
      )));
    }
    if self.sigma.iter().any(|s| !s.is_finite() || *s < 0.0) {
      return Err(PortfolioError::InvalidInput("volatility must be non-negative".into()));
    }
    if self.beta.iter().any(|b| !(-1.0..=1.0).contains(b)) {
      return Err(PortfolioError::InvalidInput("factor loading outside [-1, 1]".into()));
    }
    if !(self.x0.is_finite() && self.x0 > 0.0) {
      return Err(PortfolioError::InvalidInput("initial price must be positive".into()));
    }
    if self.n == 0 {
      return Err(PortfolioError::InvalidInput("at least one date is required".into()));
    }
    Ok(())
  }

  /// Sample a price history with assets named `ASSET0`, `ASSET1`, ...
  pub fn sample(&self) -> Result<PriceMatrix> {
    self.validate()?;

    let n_assets = self.mu.len();
    let dt = 1.0 / PERIODS_PER_YEAR;
    let drift: Vec<f64> = self
      .mu
      .iter()
      .zip(&self.sigma)
      .map(|(m, s)| (m - 0.5 * s * s) * dt)
      .collect();
    let idio: Vec<f64> = self.beta.iter().map(|b| (1.0 - b * b).sqrt()).collect();

    let mut rng = StdRng::seed_from_u64(self.seed);
    let mut prices = Array2::<f64>::zeros((self.n, n_assets));
    prices.row_mut(0).fill(self.x0);

    for t in 1..self.n {
      let market: f64 = StandardNormal.sample(&mut rng);
      for i in 0..n_assets {
        let eps: f64 = StandardNormal.sample(&mut rng);
        let z = self.beta[i] * market + idio[i] * eps;
        prices[[t, i]] = prices[[t - 1, i]] * (drift[i] + self.sigma[i] * dt.sqrt() * z).exp();
      }
    }

    let assets = (0..n_assets).map(|i| format!("ASSET{i}")).collect();
    PriceMatrix::new(weekdays(self.start, self.n), assets, prices)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::quant::portfolio::risk_model::RiskModel;

  fn gbm(n: usize, seed: u64) -> CorrelatedGbm {
    CorrelatedGbm::new(
      vec![0.05, 0.08, 0.10],
      vec![0.10, 0.20, 0.30],
      vec![0.9, 0.9, 0.0],
      100.0,
      NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
      n,
      seed,
    )
  }

  #[test]
  fn sample_is_seeded_and_skips_weekends() {
    let a = gbm(50, 11).sample().unwrap();
    let b = gbm(50, 11).sample().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, gbm(50, 12).sample().unwrap());
    assert_eq!(a.len(), 50);
    assert!(a.dates().iter().all(|d| is_weekday(*d)));
    assert!(a.prices().row(0).iter().all(|p| *p == 100.0));
  }

  #[test]
  fn loadings_drive_correlation() {
    let risk = RiskModel::from_prices(&gbm(3000, 5).sample().unwrap()).unwrap();
    let rho = risk.correlation();
    assert!((rho[[0, 1]] - 0.81).abs() < 0.06, "{}", rho[[0, 1]]);
    assert!(rho[[0, 2]].abs() < 0.08, "{}", rho[[0, 2]]);
    assert!((risk.annualized_volatility()[1] - 0.20).abs() < 0.02);
  }

  #[test]
  fn invalid_parameters_are_rejected() {
    let mut bad = gbm(10, 1);
    bad.beta[0] = 1.5;
    assert!(bad.sample().is_err());

    let mut bad = gbm(10, 1);
    bad.sigma.pop();
    assert!(bad.sample().is_err());

    assert!(gbm(0, 1).sample().is_err());
  }
}
