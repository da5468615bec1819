//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\*_m = \operatorname{Allocate}_m(\mu, \Sigma, \rho),\qquad m\in\mathcal{M}
//! $$
//!
//! High-level API applying a configured set of allocation methods to one risk model.

use super::data::PriceMatrix;
use super::optimizers::optimize_with_method;
use super::risk_model::RiskModel;
use super::sqp::SolverConfig;
use super::types::AllocationMethod;
use super::types::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioEngineConfig {
  /// Methods run by [`PortfolioEngine::allocate_all`], in output order.
  pub methods: Vec<AllocationMethod>,
  /// Annual risk-free rate used by the Sharpe objective and statistics.
  pub risk_free: f64,
  /// Budget and tolerances of the SQP solver.
  pub solver: SolverConfig,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      methods: vec![
        AllocationMethod::MinimumVariance,
        AllocationMethod::MaximumSharpe,
        AllocationMethod::Hrp,
      ],
      risk_free: 0.0,
      solver: SolverConfig::default(),
    }
  }
}

/// Single entry point for allocation workflows.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Result<Self> {
    if config.methods.is_empty() {
      return Err(PortfolioError::InvalidInput(
        "at least one allocation method is required".into(),
      ));
    }
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Weights for a single method.
  pub fn optimize(&self, method: AllocationMethod, risk: &RiskModel) -> Result<WeightVector> {
    optimize_with_method(method, risk, self.config.risk_free, &self.config.solver)
  }

  /// Weights for every configured method; the first failure is returned.
  pub fn allocate_all(&self, risk: &RiskModel) -> Result<Vec<(AllocationMethod, WeightVector)>> {
    self
      .config
      .methods
      .iter()
      .map(|&m| self.optimize(m, risk).map(|w| (m, w)))
      .collect()
  }

  /// Estimate a risk model from `prices` and allocate with every method.
  pub fn allocate_prices(&self, prices: &PriceMatrix) -> Result<Vec<(AllocationMethod, WeightVector)>> {
    let risk = RiskModel::from_prices(prices)?;
    self.allocate_all(&risk)
  }
}
