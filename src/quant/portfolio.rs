//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Risk estimation, long-only allocation and rolling-window backtesting.

pub mod backtest;
pub mod data;
pub mod engine;
pub mod hrp;
pub mod optimizers;
pub mod performance;
pub mod risk_model;
pub mod simulate;
pub mod sqp;
pub mod types;

pub use backtest::evaluate_window;
pub use backtest::plan_windows;
pub use backtest::BacktestConfig;
pub use backtest::BacktestEngine;
pub use backtest::BacktestRecord;
pub use backtest::BacktestReport;
pub use backtest::BacktestState;
pub use backtest::StrategyWindow;
pub use backtest::WindowBounds;
pub use backtest::WindowOutcome;
pub use data::pct_change;
pub use data::PriceMatrix;
pub use data::ReturnMatrix;
pub use data::PERIODS_PER_YEAR;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use hrp::optimize_hrp;
pub use hrp::Dendrogram;
pub use optimizers::optimize_equal_weight;
pub use optimizers::optimize_maximum_sharpe;
pub use optimizers::optimize_minimum_variance;
pub use optimizers::optimize_with_method;
pub use performance::price_drawdown;
pub use performance::returns_from_values;
pub use performance::PerformanceEvaluator;
pub use performance::PortfolioReturnSeries;
pub use performance::SummaryRow;
pub use performance::SummaryTable;
pub use performance::TimeSeries;
pub use risk_model::RiskModel;
pub use simulate::CorrelatedGbm;
pub use sqp::SolverConfig;
pub use types::AllocationMethod;
pub use types::PortfolioStats;
pub use types::WeightVector;
