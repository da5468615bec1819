//! # quant-alloc
//!
//! $$
//! \mathbf{w}^\* \in \Delta^{n-1} = \\{\mathbf{w}\in\mathbb{R}^n : \mathbf{w}\ge 0,\ \mathbf{1}^\top\mathbf{w}=1\\}
//! $$
//!
//! Long-only portfolio allocation and rolling-window backtesting on daily
//! adjusted close prices.
//!
//! - [`quant::portfolio::RiskModel`] annualised expected returns, volatility,
//!   covariance and correlation.
//! - Minimum variance and maximum Sharpe via a simplex-constrained SQP solver,
//!   hierarchical risk parity and equal weight.
//! - [`quant::portfolio::PerformanceEvaluator`] for realised returns, value
//!   curves, drawdowns and summary tables.
//! - [`quant::portfolio::BacktestEngine`] for contiguous train/evaluate windows.

pub mod error;
pub mod quant;

pub use error::ErrorKind;
pub use error::PortfolioError;
pub use error::Result;
