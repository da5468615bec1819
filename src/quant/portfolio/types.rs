//! # Portfolio Types
//!
//! $$
//! \mathbf{w}\in\Delta^{n-1}=\{\mathbf{w}\ge 0,\ \mathbf{1}^\top\mathbf{w}=1\}
//! $$
//!
//! Allocation methods, weight vectors and their model statistics.

use std::fmt;
use std::str::FromStr;

use super::risk_model::RiskModel;
use crate::error::PortfolioError;
use crate::error::Result;

/// Tolerance on `sum(w) = 1` and on the `[0, 1]` bounds.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Supported allocation methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllocationMethod {
  /// Long-only minimum volatility.
  MinimumVariance,
  /// Long-only maximum Sharpe ratio.
  MaximumSharpe,
  /// Hierarchical Risk Parity (Lopez de Prado).
  Hrp,
  /// `1/n` benchmark.
  EqualWeight,
}

impl AllocationMethod {
  /// Label used for return series and summary rows.
  pub fn label(&self) -> &'static str {
    match self {
      Self::MinimumVariance => "Minimum variance",
      Self::MaximumSharpe => "Maximum Sharpe",
      Self::Hrp => "HRP",
      Self::EqualWeight => "Equal weight",
    }
  }
}

impl fmt::Display for AllocationMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.label())
  }
}

impl FromStr for AllocationMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "min-vol" | "min-variance" | "minvar" | "minimum-variance" => Ok(Self::MinimumVariance),
      "max-sharpe" | "maxsharpe" | "sharpe" => Ok(Self::MaximumSharpe),
      "hrp" => Ok(Self::Hrp),
      "equal" | "equal-weight" | "1/n" => Ok(Self::EqualWeight),
      other => Err(PortfolioError::InvalidInput(format!(
        "unknown allocation method '{other}'"
      ))),
    }
  }
}

/// Long-only weights keyed by asset, summing to one.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
  assets: Vec<String>,
  weights: Vec<f64>,
}

impl WeightVector {
  /// Validates `0 <= w_i <= 1` and `|sum(w) - 1| <= 1e-6`.
  pub fn new(assets: Vec<String>, weights: Vec<f64>) -> Result<Self> {
    if assets.len() != weights.len() || assets.is_empty() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} assets but {} weights",
        assets.len(),
        weights.len()
      )));
    }
    if let Some(w) = weights
      .iter()
      .find(|w| !w.is_finite() || **w < -WEIGHT_TOLERANCE || **w > 1.0 + WEIGHT_TOLERANCE)
    {
      return Err(PortfolioError::InvalidInput(format!(
        "weight {w} outside [0, 1]"
      )));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
      return Err(PortfolioError::InvalidInput(format!(
        "weights sum to {sum}"
      )));
    }

    Ok(Self { assets, weights })
  }

  /// `1/n` on every asset.
  pub fn equal(assets: &[String]) -> Result<Self> {
    let n = assets.len();
    Self::new(assets.to_vec(), vec![1.0 / n.max(1) as f64; n])
  }

  /// Clip solver noise into `[0, 1]`, renormalise, then validate.
  pub(crate) fn from_raw(assets: &[String], raw: &[f64]) -> Result<Self> {
    let clipped: Vec<f64> = raw.iter().map(|w| w.clamp(0.0, 1.0)).collect();
    let total: f64 = clipped.iter().sum();
    if total <= 1e-15 {
      return Err(PortfolioError::Optimization(
        "all weights collapsed to zero".into(),
      ));
    }
    Self::new(
      assets.to_vec(),
      clipped.iter().map(|w| w / total).collect(),
    )
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn as_slice(&self) -> &[f64] {
    &self.weights
  }

  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  /// Model statistics of these weights under `risk`.
  pub fn stats(&self, risk: &RiskModel, risk_free: f64) -> Result<PortfolioStats> {
    if self.assets.as_slice() != risk.assets() {
      return Err(PortfolioError::InvalidInput(
        "weights and risk model cover different assets".into(),
      ));
    }
    let expected_return = risk.portfolio_return(&self.weights)?;
    let volatility = risk.portfolio_volatility(&self.weights)?;
    let sharpe = if volatility > 1e-15 {
      (expected_return - risk_free) / volatility
    } else {
      0.0
    };

    Ok(PortfolioStats {
      expected_return,
      volatility,
      sharpe,
    })
  }
}

/// Ex-ante statistics of a weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PortfolioStats {
  /// `w' mu` with annualised arithmetic means.
  pub expected_return: f64,
  /// `sqrt(w' Σ w)`.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero when volatility vanishes.
  pub sharpe: f64,
}
