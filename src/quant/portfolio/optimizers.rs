//! # Portfolio Optimizers
//!
//! $$
//! \min_{\mathbf{w}\in\Delta}\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}},\qquad
//! \min_{\mathbf{w}\in\Delta}-\frac{\mathbf{w}^\top\mu-r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! $$
//!
//! Long-only mean-variance allocators solved with [`SimplexSqp`], plus the
//! equal-weight benchmark and the method dispatcher.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use ndarray::Array1;
use ndarray::Array2;

use super::hrp::optimize_hrp;
use super::risk_model::RiskModel;
use super::sqp::SimplexSqp;
use super::sqp::SolverConfig;
use super::types::AllocationMethod;
use super::types::WeightVector;
use crate::error::Result;

/// Objective value returned when the candidate portfolio has no volatility.
const VOL_PENALTY: f64 = 1e10;
const VOL_EPS: f64 = 1e-12;

fn mat_vec_mul(mat: &Array2<f64>, v: &[f64]) -> Vec<f64> {
  mat
    .rows()
    .into_iter()
    .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
    .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct VolatilityCost {
  cov: Array2<f64>,
}

impl CostFunction for VolatilityCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let var = dot(w, &mat_vec_mul(&self.cov, w));
    if var < VOL_EPS * VOL_EPS {
      return Ok(VOL_PENALTY);
    }
    Ok(var.sqrt())
  }
}

impl Gradient for VolatilityCost {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let sigma_w = mat_vec_mul(&self.cov, w);
    let vol = dot(w, &sigma_w).max(0.0).sqrt();
    if vol < VOL_EPS {
      return Ok(vec![0.0; w.len()]);
    }
    Ok(sigma_w.iter().map(|s| s / vol).collect())
  }
}

struct NegativeSharpeCost {
  mu: Array1<f64>,
  cov: Array2<f64>,
  risk_free: f64,
}

impl NegativeSharpeCost {
  fn excess_return(&self, w: &[f64]) -> f64 {
    w.iter().zip(self.mu.iter()).map(|(a, b)| a * b).sum::<f64>() - self.risk_free
  }
}

impl CostFunction for NegativeSharpeCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let vol = dot(w, &mat_vec_mul(&self.cov, w)).max(0.0).sqrt();
    if vol < VOL_EPS {
      return Ok(VOL_PENALTY);
    }
    Ok(-self.excess_return(w) / vol)
  }
}

impl Gradient for NegativeSharpeCost {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let sigma_w = mat_vec_mul(&self.cov, w);
    let vol = dot(w, &sigma_w).max(0.0).sqrt();
    if vol < VOL_EPS {
      return Ok(vec![0.0; w.len()]);
    }

    let excess = self.excess_return(w);
    let vol3 = vol * vol * vol;
    Ok(
      self
        .mu
        .iter()
        .zip(sigma_w.iter())
        .map(|(m, s)| -m / vol + excess * s / vol3)
        .collect(),
    )
  }
}

fn equal_start(n: usize) -> Vec<f64> {
  vec![1.0 / n as f64; n]
}

/// Long-only minimum-volatility weights.
pub fn optimize_minimum_variance(risk: &RiskModel, solver: &SolverConfig) -> Result<WeightVector> {
  risk.ensure_non_degenerate()?;
  let cost = VolatilityCost {
    cov: risk.covariance().clone(),
  };

  let report = SimplexSqp::new(*solver).minimize(&cost, equal_start(risk.n_assets()))?;
  WeightVector::from_raw(risk.assets(), &report.param)
}

/// Long-only maximum-Sharpe weights using annualised arithmetic means.
pub fn optimize_maximum_sharpe(
  risk: &RiskModel,
  risk_free: f64,
  solver: &SolverConfig,
) -> Result<WeightVector> {
  risk.ensure_non_degenerate()?;
  let cost = NegativeSharpeCost {
    mu: risk.expected_returns().clone(),
    cov: risk.covariance().clone(),
    risk_free,
  };

  let report = SimplexSqp::new(*solver).minimize(&cost, equal_start(risk.n_assets()))?;
  WeightVector::from_raw(risk.assets(), &report.param)
}

/// `1/n` weights over the model's assets.
pub fn optimize_equal_weight(risk: &RiskModel) -> Result<WeightVector> {
  WeightVector::equal(risk.assets())
}

/// Dispatch to the selected allocator.
pub fn optimize_with_method(
  method: AllocationMethod,
  risk: &RiskModel,
  risk_free: f64,
  solver: &SolverConfig,
) -> Result<WeightVector> {
  match method {
    AllocationMethod::MinimumVariance => optimize_minimum_variance(risk, solver),
    AllocationMethod::MaximumSharpe => optimize_maximum_sharpe(risk, risk_free, solver),
    AllocationMethod::Hrp => optimize_hrp(risk),
    AllocationMethod::EqualWeight => optimize_equal_weight(risk),
  }
}
