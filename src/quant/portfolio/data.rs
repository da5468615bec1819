//! # Portfolio Data
//!
//! $$
//! r_{t,i} = \frac{P_{t,i}}{P_{t-1,i}} - 1
//! $$
//!
//! Dated price and return matrices plus the sample moments built on them.

use chrono::NaiveDate;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;

use crate::error::PortfolioError;
use crate::error::Result;

/// Trading periods per year used for annualisation.
pub const PERIODS_PER_YEAR: f64 = 252.0;

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

pub(crate) fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(&x[..n]);
  let my = sample_mean(&y[..n]);
  let mut acc = 0.0;
  for i in 0..n {
    acc += (x[i] - mx) * (y[i] - my);
  }
  acc / (n - 1) as f64
}

pub(crate) fn sample_variance(xs: &[f64]) -> f64 {
  sample_covariance(xs, xs)
}

/// Period-over-period percentage change; output is one element shorter.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
  let mut out = Vec::with_capacity(values.len().saturating_sub(1));
  for i in 1..values.len() {
    out.push(values[i] / values[i - 1] - 1.0);
  }
  out
}

fn inclusive_rows(dates: &[NaiveDate], from: NaiveDate, to: NaiveDate) -> (usize, usize) {
  let lo = dates.partition_point(|d| *d < from);
  let hi = dates.partition_point(|d| *d <= to);
  (lo, hi.max(lo))
}

/// Adjusted close prices, one row per date and one column per asset.
///
/// Dates are strictly increasing and every price is finite and positive.
/// Gap filling is the caller's job.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  prices: Array2<f64>,
}

impl PriceMatrix {
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() || prices.ncols() != assets.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "price matrix is {}x{} but got {} dates and {} assets",
        prices.nrows(),
        prices.ncols(),
        dates.len(),
        assets.len()
      )));
    }
    if assets.is_empty() {
      return Err(PortfolioError::InvalidInput("no assets".into()));
    }
    if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
      return Err(PortfolioError::InvalidInput(format!(
        "dates must be strictly increasing ({} then {})",
        w[0], w[1]
      )));
    }
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
      return Err(PortfolioError::InvalidInput(
        "prices must be finite and positive".into(),
      ));
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  pub fn first_date(&self) -> Option<NaiveDate> {
    self.dates.first().copied()
  }

  pub fn last_date(&self) -> Option<NaiveDate> {
    self.dates.last().copied()
  }

  pub fn column(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
    let idx = self.assets.iter().position(|a| a == asset)?;
    Some(self.prices.column(idx))
  }

  /// Rows with `from <= date <= to`. The result may be empty.
  pub fn slice(&self, from: NaiveDate, to: NaiveDate) -> PriceMatrix {
    let (lo, hi) = inclusive_rows(&self.dates, from, to);
    PriceMatrix {
      dates: self.dates[lo..hi].to_vec(),
      assets: self.assets.clone(),
      prices: self.prices.slice(s![lo..hi, ..]).to_owned(),
    }
  }

  /// Percentage-change returns; the first date is dropped.
  pub fn returns(&self) -> ReturnMatrix {
    let n_assets = self.assets.len();
    if self.dates.len() < 2 {
      return ReturnMatrix {
        dates: Vec::new(),
        assets: self.assets.clone(),
        returns: Array2::zeros((0, n_assets)),
      };
    }

    let prev = self.prices.slice(s![..-1, ..]);
    let next = self.prices.slice(s![1.., ..]);
    ReturnMatrix {
      dates: self.dates[1..].to_vec(),
      assets: self.assets.clone(),
      returns: &next / &prev - 1.0,
    }
  }
}

/// Per-period asset returns aligned with a date index.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  returns: Array2<f64>,
}

impl ReturnMatrix {
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, returns: Array2<f64>) -> Result<Self> {
    if returns.nrows() != dates.len() || returns.ncols() != assets.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "return matrix is {}x{} but got {} dates and {} assets",
        returns.nrows(),
        returns.ncols(),
        dates.len(),
        assets.len()
      )));
    }
    if returns.iter().any(|r| !r.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "returns must be finite".into(),
      ));
    }

    Ok(Self {
      dates,
      assets,
      returns,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn n_periods(&self) -> usize {
    self.dates.len()
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  pub fn column(&self, i: usize) -> Vec<f64> {
    self.returns.column(i).to_vec()
  }

  pub(crate) fn columns(&self) -> Vec<Vec<f64>> {
    self
      .returns
      .axis_iter(Axis(1))
      .map(|c| c.to_vec())
      .collect()
  }

  /// Arithmetic mean per asset.
  pub fn mean(&self) -> Array1<f64> {
    self
      .returns
      .mean_axis(Axis(0))
      .unwrap_or_else(|| Array1::zeros(self.assets.len()))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 3, day).unwrap()
  }

  fn prices() -> PriceMatrix {
    PriceMatrix::new(
      vec![d(1), d(2), d(3), d(4)],
      vec!["AAA".into(), "BBB".into()],
      array![[100.0, 50.0], [110.0, 50.0], [99.0, 55.0], [99.0, 44.0]],
    )
    .unwrap()
  }

  #[test]
  fn returns_drop_first_row() {
    let r = prices().returns();
    assert_eq!(r.n_periods(), 3);
    assert_eq!(r.dates(), &[d(2), d(3), d(4)]);
    assert_abs_diff_eq!(r.values()[[0, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r.values()[[1, 0]], -0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r.values()[[2, 1]], -0.2, epsilon = 1e-12);
  }

  #[test]
  fn slice_is_inclusive_and_may_be_empty() {
    let p = prices();
    let s = p.slice(d(2), d(3));
    assert_eq!(s.dates(), &[d(2), d(3)]);
    assert_eq!(s.prices().nrows(), 2);

    let empty = p.slice(d(10), d(20));
    assert!(empty.is_empty());
    assert!(empty.returns().is_empty());

    let reversed = p.slice(d(3), d(2));
    assert!(reversed.is_empty());
  }

  #[test]
  fn rejects_unordered_dates_and_bad_prices() {
    let err = PriceMatrix::new(
      vec![d(2), d(1)],
      vec!["AAA".into()],
      array![[1.0], [2.0]],
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));

    let err = PriceMatrix::new(vec![d(1)], vec!["AAA".into()], array![[0.0]]).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));
  }

  #[test]
  fn sample_moments_use_unbiased_denominator() {
    let xs = [1.0, 2.0, 3.0, 4.0];
    assert_abs_diff_eq!(sample_mean(&xs), 2.5, epsilon = 1e-12);
    assert_abs_diff_eq!(sample_variance(&xs), 5.0 / 3.0, epsilon = 1e-12);
    assert_eq!(sample_variance(&[1.0]), 0.0);
  }

  #[test]
  fn pct_change_matches_manual_ratio() {
    let out = pct_change(&[1000.0, 1010.0, 999.9]);
    assert_eq!(out.len(), 2);
    assert_abs_diff_eq!(out[0], 0.01, epsilon = 1e-12);
    assert_abs_diff_eq!(out[1], -0.01, epsilon = 1e-12);
  }
}
