//! # Errors
//!
//! $$
//! \text{Result}(T) = T \;\vee\; \{\text{InsufficientData}, \text{Optimization}, \text{DegenerateInput}, \text{EmptyWindow}, \text{InvalidInput}\}
//! $$
//!
//! Error type shared by every allocator, evaluator and the backtest loop.

use std::fmt;

use thiserror::Error;

/// Errors raised by portfolio analytics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  /// Fewer observations than a statistic needs.
  #[error("insufficient data: need at least {required} observations, got {actual}")]
  InsufficientData { required: usize, actual: usize },

  /// Solver did not converge or left the feasible set.
  #[error("optimization failed: {0}")]
  Optimization(String),

  /// Near-zero variance or a non-finite risk input.
  #[error("degenerate input: {0}")]
  DegenerateInput(String),

  /// A training or evaluation window holds no trading days.
  #[error("empty window: {0}")]
  EmptyWindow(String),

  /// Shape, ordering or asset-domain violation.
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

/// Discriminant of [`PortfolioError`], cheap to copy into backtest records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
  InsufficientData,
  Optimization,
  DegenerateInput,
  EmptyWindow,
  InvalidInput,
}

impl PortfolioError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InsufficientData { .. } => ErrorKind::InsufficientData,
      Self::Optimization(_) => ErrorKind::Optimization,
      Self::DegenerateInput(_) => ErrorKind::DegenerateInput,
      Self::EmptyWindow(_) => ErrorKind::EmptyWindow,
      Self::InvalidInput(_) => ErrorKind::InvalidInput,
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorKind::InsufficientData => write!(f, "InsufficientData"),
      ErrorKind::Optimization => write!(f, "Optimization"),
      ErrorKind::DegenerateInput => write!(f, "DegenerateInput"),
      ErrorKind::EmptyWindow => write!(f, "EmptyWindow"),
      ErrorKind::InvalidInput => write!(f, "InvalidInput"),
    }
  }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PortfolioError>;
