//! # Performance
//!
//! $$
//! V_t = V_0\prod_{s\le t}(1+r_s),\qquad
//! DD_t=\frac{V_t-\max_{s\le t}V_s}{\max_{s\le t}V_s},\qquad
//! S=\frac{\mu^{geo}-r_f}{\sigma\sqrt{252}}
//! $$
//!
//! Realised portfolio returns, value curves, drawdowns and summary statistics.
//! Performance is always the weighted sum of per-period asset *returns*.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray_stats::QuantileExt;
use prettytable::row;
use prettytable::Table;

use super::data::pct_change;
use super::data::PriceMatrix;
use super::data::ReturnMatrix;
use super::risk_model::annualized_return;
use super::risk_model::annualized_volatility;
use super::types::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

const SHARPE_VOL_EPS: f64 = 1e-12;

/// A labelled, strictly dated sequence of values.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
  label: String,
  dates: Vec<NaiveDate>,
  values: Vec<f64>,
}

/// Per-period returns of one strategy.
pub type PortfolioReturnSeries = TimeSeries;

impl TimeSeries {
  pub fn new(label: impl Into<String>, dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
    if dates.len() != values.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} dates but {} values",
        dates.len(),
        values.len()
      )));
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
      return Err(PortfolioError::InvalidInput(
        "series dates must be strictly increasing".into(),
      ));
    }

    Ok(Self {
      label: label.into(),
      dates,
      values,
    })
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
    self.dates.iter().copied().zip(self.values.iter().copied())
  }

  /// Chain `parts` in the given order; their dates must keep increasing.
  pub fn concat<'a, I>(label: impl Into<String>, parts: I) -> Result<Self>
  where
    I: IntoIterator<Item = &'a TimeSeries>,
  {
    let parts: Vec<&TimeSeries> = parts.into_iter().collect();
    let total = parts.iter().map(|p| p.len()).sum();
    let mut dates = Vec::with_capacity(total);
    let mut values = Vec::with_capacity(total);
    for part in parts {
      dates.extend_from_slice(&part.dates);
      values.extend_from_slice(&part.values);
    }
    Self::new(label, dates, values)
  }

  /// Inner join on date: only dates present in every series survive, with
  /// one value per series in input order.
  pub fn inner_join(series: &[TimeSeries]) -> Vec<(NaiveDate, Vec<f64>)> {
    let Some(first) = series.first() else {
      return Vec::new();
    };

    let lookups: Vec<BTreeMap<NaiveDate, f64>> = series
      .iter()
      .map(|s| s.iter().collect())
      .collect();

    first
      .dates
      .iter()
      .filter_map(|d| {
        let row: Option<Vec<f64>> = lookups.iter().map(|m| m.get(d).copied()).collect();
        row.map(|r| (*d, r))
      })
      .collect()
  }
}

/// One row of a [`SummaryTable`].
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
  pub label: String,
  /// Geometric annual return.
  pub annualized_return: f64,
  pub annualized_volatility: f64,
  pub sharpe: f64,
  /// Magnitude of the deepest drawdown, `>= 0`.
  pub max_drawdown: f64,
  pub max_drawdown_date: NaiveDate,
}

/// Summary statistics keyed by strategy or asset label, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryTable {
  rows: Vec<SummaryRow>,
}

impl SummaryTable {
  pub fn push(&mut self, row: SummaryRow) {
    self.rows.push(row);
  }

  pub fn get(&self, label: &str) -> Option<&SummaryRow> {
    self.rows.iter().find(|r| r.label == label)
  }

  pub fn rows(&self) -> &[SummaryRow] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Render as a text table; ratios are shown in percent.
  pub fn to_table(&self) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["", "Return %", "Volatility %", "Sharpe", "Max DD %", "Max DD date"]);
    for r in &self.rows {
      table.add_row(row![
        r.label,
        format!("{:.2}", 100.0 * r.annualized_return),
        format!("{:.2}", 100.0 * r.annualized_volatility),
        format!("{:.3}", r.sharpe),
        format!("{:.2}", 100.0 * r.max_drawdown),
        r.max_drawdown_date
      ]);
    }
    table
  }
}

impl FromIterator<SummaryRow> for SummaryTable {
  fn from_iter<T: IntoIterator<Item = SummaryRow>>(iter: T) -> Self {
    Self {
      rows: iter.into_iter().collect(),
    }
  }
}

/// Evaluates realised performance of weight vectors.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq)]
pub struct PerformanceEvaluator {
  /// Annual risk-free rate subtracted in the Sharpe ratio.
  pub risk_free: f64,
  /// Starting value of cumulative curves.
  pub base_value: f64,
}

impl Default for PerformanceEvaluator {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      base_value: 1000.0,
    }
  }
}

impl PerformanceEvaluator {
  /// Per-date `sum_i w_i r_{t,i}` labelled `label`.
  pub fn strategy_returns(
    &self,
    weights: &WeightVector,
    returns: &ReturnMatrix,
    label: &str,
  ) -> Result<PortfolioReturnSeries> {
    if weights.len() != returns.n_assets() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} weights for {} assets",
        weights.len(),
        returns.n_assets()
      )));
    }
    let aligned: Vec<f64> = returns
      .assets()
      .iter()
      .map(|a| {
        weights
          .get(a)
          .ok_or_else(|| PortfolioError::InvalidInput(format!("no weight for asset {a}")))
      })
      .collect::<Result<_>>()?;

    let w = Array1::from_vec(aligned);
    let values = returns.values().dot(&w).to_vec();
    TimeSeries::new(label, returns.dates().to_vec(), values)
  }

  /// `base * prod(1 + r)` at every date.
  pub fn cumulative_value(&self, series: &TimeSeries) -> TimeSeries {
    let mut acc = self.base_value;
    let values = series
      .values
      .iter()
      .map(|r| {
        acc *= 1.0 + r;
        acc
      })
      .collect();

    TimeSeries {
      label: series.label.clone(),
      dates: series.dates.clone(),
      values,
    }
  }

  /// Relative distance below the running peak of the value curve, `<= 0`.
  pub fn drawdown(&self, series: &TimeSeries) -> TimeSeries {
    drawdown_of_curve(&self.cumulative_value(series))
  }

  /// Deepest drawdown (a value `<= 0`) and the date it occurs.
  pub fn max_drawdown(&self, series: &TimeSeries) -> Result<(f64, NaiveDate)> {
    if series.is_empty() {
      return Err(PortfolioError::EmptyWindow(format!(
        "series '{}' has no observations",
        series.label
      )));
    }
    min_with_date(&self.drawdown(series))
  }

  /// Annual return, volatility, Sharpe and drawdown of a return series.
  pub fn summary(&self, series: &TimeSeries) -> Result<SummaryRow> {
    let (max_dd, max_dd_date) = self.max_drawdown(series)?;
    let annual_return = annualized_return(&series.values)?;
    let annual_vol = annualized_volatility(&series.values)?;
    if annual_vol < SHARPE_VOL_EPS {
      return Err(PortfolioError::DegenerateInput(format!(
        "series '{}' has zero volatility",
        series.label
      )));
    }

    Ok(SummaryRow {
      label: series.label.clone(),
      annualized_return: annual_return,
      annualized_volatility: annual_vol,
      sharpe: (annual_return - self.risk_free) / annual_vol,
      max_drawdown: -max_dd,
      max_drawdown_date: max_dd_date,
    })
  }

  /// Summary of every asset column held passively over the whole history.
  pub fn asset_summary(&self, prices: &PriceMatrix) -> Result<SummaryTable> {
    let returns = prices.returns();
    returns
      .assets()
      .iter()
      .enumerate()
      .map(|(i, asset)| {
        let series = TimeSeries::new(asset.as_str(), returns.dates().to_vec(), returns.column(i))?;
        self.summary(&series)
      })
      .collect()
  }
}

/// Drawdown of one asset's price path.
pub fn price_drawdown(prices: &PriceMatrix, asset: &str) -> Result<TimeSeries> {
  let column = prices
    .column(asset)
    .ok_or_else(|| PortfolioError::InvalidInput(format!("unknown asset {asset}")))?;
  let curve = TimeSeries::new(asset, prices.dates().to_vec(), column.to_vec())?;
  Ok(drawdown_of_curve(&curve))
}

/// Recover per-period returns from a value curve started at `base`.
pub fn returns_from_values(base: f64, curve: &TimeSeries) -> TimeSeries {
  let mut levels = Vec::with_capacity(curve.len() + 1);
  levels.push(base);
  levels.extend_from_slice(&curve.values);

  TimeSeries {
    label: curve.label.clone(),
    dates: curve.dates.clone(),
    values: pct_change(&levels),
  }
}

fn drawdown_of_curve(curve: &TimeSeries) -> TimeSeries {
  let mut peak = f64::NEG_INFINITY;
  let values = curve
    .values
    .iter()
    .map(|&v| {
      peak = peak.max(v);
      ((v - peak) / peak).min(0.0)
    })
    .collect();

  TimeSeries {
    label: curve.label.clone(),
    dates: curve.dates.clone(),
    values,
  }
}

fn min_with_date(series: &TimeSeries) -> Result<(f64, NaiveDate)> {
  let values = Array1::from_vec(series.values.clone());
  let idx = values
    .argmin()
    .map_err(|e| PortfolioError::DegenerateInput(format!("drawdown series: {e:?}")))?;
  Ok((values[idx], series.dates[idx]))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, day).unwrap()
  }

  fn series(values: Vec<f64>) -> TimeSeries {
    let dates = (1..=values.len() as u32).map(d).collect();
    TimeSeries::new("S", dates, values).unwrap()
  }

  #[test]
  fn strategy_returns_are_weighted_sums() {
    let returns = ReturnMatrix::new(
      vec![d(1), d(2)],
      vec!["A".into(), "B".into()],
      array![[0.01, 0.03], [-0.02, 0.02]],
    )
    .unwrap();
    // Weights listed in a different asset order than the matrix.
    let w = WeightVector::new(vec!["B".into(), "A".into()], vec![0.25, 0.75]).unwrap();
    let s = PerformanceEvaluator::default()
      .strategy_returns(&w, &returns, "mix")
      .unwrap();
    assert_eq!(s.label(), "mix");
    assert_abs_diff_eq!(s.values()[0], 0.75 * 0.01 + 0.25 * 0.03, epsilon = 1e-15);
    assert_abs_diff_eq!(s.values()[1], 0.75 * -0.02 + 0.25 * 0.02, epsilon = 1e-15);
  }

  #[test]
  fn mismatched_asset_domain_is_rejected() {
    let returns = ReturnMatrix::new(
      vec![d(1)],
      vec!["A".into(), "B".into()],
      array![[0.01, 0.03]],
    )
    .unwrap();
    let w = WeightVector::new(vec!["A".into(), "C".into()], vec![0.5, 0.5]).unwrap();
    let err = PerformanceEvaluator::default()
      .strategy_returns(&w, &returns, "x")
      .unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));
  }

  #[test]
  fn drawdown_is_non_positive_and_max_matches_minimum() {
    let eval = PerformanceEvaluator::default();
    let s = series(vec![0.1, -0.2, 0.05, -0.1, 0.3, -0.05]);
    let dd = eval.drawdown(&s);
    assert!(dd.values().iter().all(|v| *v <= 0.0));

    let (max_dd, date) = eval.max_drawdown(&s).unwrap();
    let min = dd.values().iter().cloned().fold(f64::INFINITY, f64::min);
    assert_eq!(max_dd, min);
    let pos = dd.values().iter().position(|v| *v == min).unwrap();
    assert_eq!(date, dd.dates()[pos]);

    // Peak 1100 after day 1, trough 1100 * 0.8 * 1.05 * 0.9 on day 4.
    assert_abs_diff_eq!(max_dd, 0.8 * 1.05 * 0.9 - 1.0, epsilon = 1e-12);
    assert_eq!(date, d(4));
  }

  #[test]
  fn empty_series_has_no_drawdown() {
    let eval = PerformanceEvaluator::default();
    let empty = TimeSeries::new("E", vec![], vec![]).unwrap();
    assert!(matches!(
      eval.max_drawdown(&empty),
      Err(PortfolioError::EmptyWindow(_))
    ));
    assert!(matches!(eval.summary(&empty), Err(PortfolioError::EmptyWindow(_))));
  }

  #[test]
  fn cumulative_value_round_trips_to_returns() {
    let eval = PerformanceEvaluator::default();
    let s = series(vec![0.012, -0.007, 0.0, 0.031, -0.015]);
    let curve = eval.cumulative_value(&s);
    assert_abs_diff_eq!(curve.values()[0], 1012.0, epsilon = 1e-9);

    let back = returns_from_values(eval.base_value, &curve);
    assert_eq!(back.dates(), s.dates());
    for (a, b) in back.values().iter().zip(s.values()) {
      assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
  }

  #[test]
  fn summary_uses_geometric_return_and_sample_volatility() {
    let eval = PerformanceEvaluator::new(0.01, 1000.0);
    let s = series(vec![0.01, -0.005, 0.002, 0.004]);
    let row = eval.summary(&s).unwrap();

    let growth: f64 = s.values().iter().map(|r| 1.0 + r).product();
    let expected_return = growth.powf(252.0 / 4.0) - 1.0;
    assert_abs_diff_eq!(row.annualized_return, expected_return, epsilon = 1e-12);
    assert_abs_diff_eq!(
      row.sharpe,
      (expected_return - 0.01) / row.annualized_volatility,
      epsilon = 1e-12
    );
    assert!(row.max_drawdown >= 0.0);
    assert_eq!(row.max_drawdown_date, d(2));
  }

  #[test]
  fn flat_series_is_degenerate_for_sharpe() {
    let eval = PerformanceEvaluator::default();
    let err = eval.summary(&series(vec![0.0, 0.0, 0.0])).unwrap_err();
    assert!(matches!(err, PortfolioError::DegenerateInput(_)));
  }

  #[test]
  fn inner_join_keeps_common_dates_only() {
    let a = TimeSeries::new("a", vec![d(1), d(2), d(3)], vec![1.0, 2.0, 3.0]).unwrap();
    let b = TimeSeries::new("b", vec![d(2), d(3), d(4)], vec![20.0, 30.0, 40.0]).unwrap();
    let joined = TimeSeries::inner_join(&[a, b]);
    assert_eq!(joined, vec![(d(2), vec![2.0, 20.0]), (d(3), vec![3.0, 30.0])]);
  }

  #[test]
  fn concat_requires_chronological_parts() {
    let a = series(vec![0.1, 0.2]);
    let late = TimeSeries::new("S", vec![d(5)], vec![0.3]).unwrap();
    let joined = TimeSeries::concat("all", [&a, &late]).unwrap();
    assert_eq!(joined.len(), 3);
    assert!(TimeSeries::concat("bad", [&late, &a]).is_err());
  }

  #[test]
  fn asset_summary_and_price_drawdown() {
    let prices = PriceMatrix::new(
      vec![d(1), d(2), d(3), d(4)],
      vec!["A".into(), "B".into()],
      array![[10.0, 5.0], [12.0, 5.5], [9.0, 5.0], [11.0, 6.0]],
    )
    .unwrap();
    let table = PerformanceEvaluator::default().asset_summary(&prices).unwrap();
    assert_eq!(table.len(), 2);
    assert_abs_diff_eq!(table.get("A").unwrap().max_drawdown, 0.25, epsilon = 1e-12);
    assert_eq!(table.get("A").unwrap().max_drawdown_date, d(3));

    let dd = price_drawdown(&prices, "B").unwrap();
    assert_abs_diff_eq!(dd.values()[2], 5.0 / 5.5 - 1.0, epsilon = 1e-12);
    assert!(price_drawdown(&prices, "Z").is_err());

    let rendered = table.to_table();
    assert_eq!(rendered.len(), 2);
    assert!(rendered.to_string().contains("25.00"));
  }
}
