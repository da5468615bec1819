//! # Risk Model
//!
//! $$
//! \mu^{geo} = \Big(\prod_{t=1}^{n}(1+r_t)\Big)^{252/n} - 1,\qquad
//! \Sigma = 252\cdot\widehat{\operatorname{Cov}}(r),\qquad
//! \rho_{ij} = \frac{\Sigma_{ij}}{\sqrt{\Sigma_{ii}\Sigma_{jj}}}
//! $$
//!
//! Annualised return, volatility, covariance and correlation of a return matrix.

use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;

use super::data::sample_covariance;
use super::data::sample_mean;
use super::data::sample_variance;
use super::data::PriceMatrix;
use super::data::ReturnMatrix;
use super::data::PERIODS_PER_YEAR;
use crate::error::PortfolioError;
use crate::error::Result;

/// Variance below which an asset is treated as riskless.
pub(crate) const VARIANCE_EPS: f64 = 1e-14;

/// Smallest covariance eigenvalue, relative to the trace, accepted by the allocators.
const SINGULAR_RTOL: f64 = 1e-10;

fn require_observations(n: usize) -> Result<()> {
  if n < 2 {
    Err(PortfolioError::InsufficientData {
      required: 2,
      actual: n,
    })
  } else {
    Ok(())
  }
}

/// Geometric annual return of a per-period series.
pub fn annualized_return(series: &[f64]) -> Result<f64> {
  require_observations(series.len())?;
  let growth: f64 = series.iter().map(|r| 1.0 + r).product();
  Ok(growth.max(0.0).powf(PERIODS_PER_YEAR / series.len() as f64) - 1.0)
}

/// Sample standard deviation scaled by `sqrt(252)`.
pub fn annualized_volatility(series: &[f64]) -> Result<f64> {
  require_observations(series.len())?;
  Ok(sample_variance(series).max(0.0).sqrt() * PERIODS_PER_YEAR.sqrt())
}

pub(crate) fn corr_from_cov(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd: Vec<f64> = (0..n).map(|i| cov[[i, i]].max(0.0).sqrt()).collect();

  Array2::from_shape_fn((n, n), |(i, j)| {
    let denom = sd[i] * sd[j];
    if i == j {
      1.0
    } else if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

/// Risk inputs estimated from one return window.
#[derive(Clone, Debug)]
pub struct RiskModel {
  assets: Vec<String>,
  n_periods: usize,
  annualized_return: Array1<f64>,
  expected_returns: Array1<f64>,
  volatility: Array1<f64>,
  covariance: Array2<f64>,
  correlation: Array2<f64>,
}

impl RiskModel {
  /// Estimate from returns. Needs at least two periods.
  pub fn from_returns(returns: &ReturnMatrix) -> Result<Self> {
    let n_periods = returns.n_periods();
    require_observations(n_periods)?;

    let columns = returns.columns();
    let n = columns.len();

    let mut annual = Array1::zeros(n);
    let mut expected = Array1::zeros(n);
    let mut vol = Array1::zeros(n);
    for (i, col) in columns.iter().enumerate() {
      annual[i] = annualized_return(col)?;
      expected[i] = sample_mean(col) * PERIODS_PER_YEAR;
      vol[i] = annualized_volatility(col)?;
    }

    let mut cov = Array2::zeros((n, n));
    for i in 0..n {
      for j in i..n {
        let c = sample_covariance(&columns[i], &columns[j]) * PERIODS_PER_YEAR;
        cov[[i, j]] = c;
        cov[[j, i]] = c;
      }
    }
    let corr = corr_from_cov(&cov);

    Ok(Self {
      assets: returns.assets().to_vec(),
      n_periods,
      annualized_return: annual,
      expected_returns: expected,
      volatility: vol,
      covariance: cov,
      correlation: corr,
    })
  }

  pub fn from_prices(prices: &PriceMatrix) -> Result<Self> {
    Self::from_returns(&prices.returns())
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Number of return periods the model was estimated on.
  pub fn n_periods(&self) -> usize {
    self.n_periods
  }

  /// Geometric annual return per asset.
  pub fn annualized_return(&self) -> &Array1<f64> {
    &self.annualized_return
  }

  /// Arithmetic mean return times 252, the mean-variance input.
  pub fn expected_returns(&self) -> &Array1<f64> {
    &self.expected_returns
  }

  pub fn annualized_volatility(&self) -> &Array1<f64> {
    &self.volatility
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  pub fn correlation(&self) -> &Array2<f64> {
    &self.correlation
  }

  fn check_len(&self, w: &[f64]) -> Result<()> {
    if w.len() != self.n_assets() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} weights for {} assets",
        w.len(),
        self.n_assets()
      )));
    }
    Ok(())
  }

  /// `w' Σ w`.
  pub fn portfolio_variance(&self, w: &[f64]) -> Result<f64> {
    self.check_len(w)?;
    let mut var = 0.0;
    for (i, wi) in w.iter().enumerate() {
      for (j, wj) in w.iter().enumerate() {
        var += wi * wj * self.covariance[[i, j]];
      }
    }
    Ok(var)
  }

  pub fn portfolio_volatility(&self, w: &[f64]) -> Result<f64> {
    Ok(self.portfolio_variance(w)?.max(0.0).sqrt())
  }

  pub fn portfolio_return(&self, w: &[f64]) -> Result<f64> {
    self.check_len(w)?;
    Ok(
      w.iter()
        .zip(self.expected_returns.iter())
        .map(|(a, b)| a * b)
        .sum(),
    )
  }

  /// Fails when any asset is riskless, the covariance is near-singular or any
  /// input is non-finite.
  pub(crate) fn ensure_non_degenerate(&self) -> Result<()> {
    if self.covariance.iter().any(|c| !c.is_finite())
      || self.expected_returns.iter().any(|m| !m.is_finite())
    {
      return Err(PortfolioError::DegenerateInput(
        "non-finite covariance or mean".into(),
      ));
    }
    for i in 0..self.n_assets() {
      if self.covariance[[i, i]] < VARIANCE_EPS {
        return Err(PortfolioError::DegenerateInput(format!(
          "asset {} has near-zero variance",
          self.assets[i]
        )));
      }
    }

    let n = self.n_assets();
    let cov = DMatrix::from_fn(n, n, |i, j| self.covariance[[i, j]]);
    let trace = cov.trace();
    let min_eigen = cov.symmetric_eigen().eigenvalues.min();
    if min_eigen <= SINGULAR_RTOL * trace {
      return Err(PortfolioError::DegenerateInput(format!(
        "covariance is near-singular (smallest eigenvalue {min_eigen:e}, trace {trace:e}, {} periods for {n} assets)",
        self.n_periods
      )));
    }
    Ok(())
  }
}
