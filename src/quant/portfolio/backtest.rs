//! # Rolling Backtest
//!
//! $$
//! [s_k - L,\ s_k - 1]\ \xrightarrow{\ \text{allocate}\ }\ \mathbf{w}_k\ \xrightarrow{\ \text{hold}\ }\ [s_k,\ s_k + D),\qquad s_{k+1}=s_k + D
//! $$
//!
//! Walks a cursor through the price history. Each window fits a risk model on
//! the trailing `lookback` days, derives weights with every configured method
//! and measures them on the next `duration` days. Windows are contiguous and
//! non-overlapping; a window that fails is recorded as skipped and the walk
//! goes on.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chrono::Days;
use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::data::PriceMatrix;
use super::engine::PortfolioEngine;
use super::engine::PortfolioEngineConfig;
use super::performance::PerformanceEvaluator;
use super::performance::PortfolioReturnSeries;
use super::performance::SummaryTable;
use super::performance::TimeSeries;
use super::risk_model::RiskModel;
use super::types::AllocationMethod;
use super::types::WeightVector;
use crate::error::ErrorKind;
use crate::error::PortfolioError;
use crate::error::Result;

/// Runtime configuration for [`BacktestEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
  /// First day of the first evaluation window.
  pub start: NaiveDate,
  /// Calendar days each allocation is held.
  pub duration_days: u64,
  /// Calendar days of history used to fit each allocation.
  pub lookback_days: u64,
  /// Starting value of cumulative curves.
  pub base_value: f64,
  /// Allocation methods, risk-free rate and solver settings.
  pub engine: PortfolioEngineConfig,
}

impl BacktestConfig {
  /// 30-day holding windows fitted on 365 days of history.
  pub fn new(start: NaiveDate) -> Self {
    Self {
      start,
      duration_days: 30,
      lookback_days: 365,
      base_value: 1000.0,
      engine: PortfolioEngineConfig::default(),
    }
  }
}

/// Date bounds of one rolling window. All bounds are inclusive except `eval_end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowBounds {
  pub index: usize,
  pub train_start: NaiveDate,
  pub train_end: NaiveDate,
  pub eval_start: NaiveDate,
  pub eval_end: NaiveDate,
}

impl WindowBounds {
  fn at(index: usize, start: NaiveDate, duration_days: u64, lookback_days: u64) -> Result<Self> {
    let overflow = || PortfolioError::InvalidInput(format!("window {index} leaves the calendar"));
    Ok(Self {
      index,
      train_start: start
        .checked_sub_days(Days::new(lookback_days))
        .ok_or_else(overflow)?,
      train_end: start.checked_sub_days(Days::new(1)).ok_or_else(overflow)?,
      eval_start: start,
      eval_end: start
        .checked_add_days(Days::new(duration_days))
        .ok_or_else(overflow)?,
    })
  }

  /// Whether `date` falls in the evaluation window.
  pub fn contains(&self, date: NaiveDate) -> bool {
    self.eval_start <= date && date < self.eval_end
  }

  /// Last calendar day of the evaluation window.
  fn eval_last(&self) -> NaiveDate {
    self.eval_end.pred_opt().unwrap_or(self.eval_start)
  }
}

/// Every window from `start` until the cursor passes `last`.
pub fn plan_windows(
  start: NaiveDate,
  last: NaiveDate,
  duration_days: u64,
  lookback_days: u64,
) -> Result<Vec<WindowBounds>> {
  if duration_days == 0 {
    return Err(PortfolioError::InvalidInput(
      "window duration must be positive".into(),
    ));
  }

  let span = (last - start).num_days().max(0) as u64;
  let mut windows = Vec::with_capacity((span / duration_days + 1) as usize);
  let mut cursor = start;
  while cursor <= last {
    let bounds = WindowBounds::at(windows.len(), cursor, duration_days, lookback_days)?;
    cursor = bounds.eval_end;
    windows.push(bounds);
  }
  Ok(windows)
}

/// Weights and realised returns of one method inside one window.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyWindow {
  pub method: AllocationMethod,
  pub weights: WeightVector,
  pub returns: PortfolioReturnSeries,
}

/// What happened in a window.
#[derive(Clone, Debug, PartialEq)]
pub enum WindowOutcome {
  /// One entry per configured method, in configuration order.
  Completed(Vec<StrategyWindow>),
  /// The window was dropped from aggregation.
  Skipped { kind: ErrorKind, message: String },
}

/// Result of one rolling window.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestRecord {
  pub bounds: WindowBounds,
  pub outcome: WindowOutcome,
}

impl BacktestRecord {
  pub fn is_skipped(&self) -> bool {
    matches!(self.outcome, WindowOutcome::Skipped { .. })
  }

  pub fn skip_kind(&self) -> Option<ErrorKind> {
    match &self.outcome {
      WindowOutcome::Skipped { kind, .. } => Some(*kind),
      WindowOutcome::Completed(_) => None,
    }
  }

  pub fn strategy(&self, method: AllocationMethod) -> Option<&StrategyWindow> {
    match &self.outcome {
      WindowOutcome::Completed(s) => s.iter().find(|s| s.method == method),
      WindowOutcome::Skipped { .. } => None,
    }
  }
}

fn try_window(
  prices: &PriceMatrix,
  bounds: &WindowBounds,
  engine: &PortfolioEngine,
  evaluator: &PerformanceEvaluator,
) -> Result<Vec<StrategyWindow>> {
  let train = prices.slice(bounds.train_start, bounds.train_end);
  let risk = RiskModel::from_prices(&train)?;
  let allocations = engine.allocate_all(&risk)?;

  let eval_returns = prices.slice(bounds.eval_start, bounds.eval_last()).returns();
  if eval_returns.is_empty() {
    return Err(PortfolioError::EmptyWindow(format!(
      "no returns between {} and {}",
      bounds.eval_start, bounds.eval_end
    )));
  }

  allocations
    .into_iter()
    .map(|(method, weights)| {
      let returns = evaluator.strategy_returns(&weights, &eval_returns, method.label())?;
      Ok(StrategyWindow {
        method,
        weights,
        returns,
      })
    })
    .collect()
}

/// Fit, allocate and evaluate a single window. Never fails: errors become a
/// skipped record.
pub fn evaluate_window(
  prices: &PriceMatrix,
  bounds: WindowBounds,
  engine: &PortfolioEngine,
  evaluator: &PerformanceEvaluator,
) -> BacktestRecord {
  let outcome = match try_window(prices, &bounds, engine, evaluator) {
    Ok(strategies) => {
      debug!(
        window = bounds.index,
        start = %bounds.eval_start,
        periods = strategies.first().map(|s| s.returns.len()).unwrap_or(0),
        "window evaluated"
      );
      WindowOutcome::Completed(strategies)
    }
    Err(err) => {
      warn!(window = bounds.index, start = %bounds.eval_start, kind = %err.kind(), "window skipped: {err}");
      WindowOutcome::Skipped {
        kind: err.kind(),
        message: err.to_string(),
      }
    }
  };

  BacktestRecord { bounds, outcome }
}

/// Lifecycle of a [`BacktestEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BacktestState {
  Running,
  Done,
}

/// Rolling-window backtest over an immutable price history.
///
/// Records accumulate in chronological order and can be read at any time, so a
/// caller may stop between windows without losing finished work.
#[derive(Debug)]
pub struct BacktestEngine<'a> {
  prices: &'a PriceMatrix,
  config: BacktestConfig,
  engine: PortfolioEngine,
  evaluator: PerformanceEvaluator,
  last_date: NaiveDate,
  cursor: NaiveDate,
  state: BacktestState,
  records: Vec<BacktestRecord>,
}

impl<'a> BacktestEngine<'a> {
  pub fn new(prices: &'a PriceMatrix, config: BacktestConfig) -> Result<Self> {
    if config.duration_days == 0 {
      return Err(PortfolioError::InvalidInput(
        "window duration must be positive".into(),
      ));
    }
    let last_date = prices
      .last_date()
      .ok_or_else(|| PortfolioError::EmptyWindow("price history is empty".into()))?;

    let engine = PortfolioEngine::new(config.engine.clone())?;
    let evaluator = PerformanceEvaluator::new(config.engine.risk_free, config.base_value);
    let span = (last_date - config.start).num_days().max(0) as u64;
    let state = if config.start <= last_date {
      BacktestState::Running
    } else {
      BacktestState::Done
    };

    Ok(Self {
      prices,
      cursor: config.start,
      records: Vec::with_capacity((span / config.duration_days + 1) as usize),
      config,
      engine,
      evaluator,
      last_date,
      state,
    })
  }

  pub fn config(&self) -> &BacktestConfig {
    &self.config
  }

  pub fn state(&self) -> BacktestState {
    self.state
  }

  /// Start of the next window to evaluate.
  pub fn cursor(&self) -> NaiveDate {
    self.cursor
  }

  /// Records produced so far, oldest first.
  pub fn records(&self) -> &[BacktestRecord] {
    &self.records
  }

  /// Evaluate the next window. Returns `None` once the history is exhausted.
  pub fn step(&mut self) -> Option<&BacktestRecord> {
    if self.state == BacktestState::Done {
      return None;
    }

    let bounds = match WindowBounds::at(
      self.records.len(),
      self.cursor,
      self.config.duration_days,
      self.config.lookback_days,
    ) {
      Ok(bounds) => bounds,
      Err(err) => {
        warn!("stopping backtest: {err}");
        self.state = BacktestState::Done;
        return None;
      }
    };

    let record = evaluate_window(self.prices, bounds, &self.engine, &self.evaluator);
    self.advance(record);
    self.records.last()
  }

  fn advance(&mut self, record: BacktestRecord) {
    self.cursor = record.bounds.eval_end;
    self.records.push(record);
    if self.cursor > self.last_date {
      self.state = BacktestState::Done;
      info!(
        windows = self.records.len(),
        skipped = self.records.iter().filter(|r| r.is_skipped()).count(),
        "backtest finished"
      );
    }
  }

  /// Evaluate every remaining window.
  pub fn run(&mut self) -> &[BacktestRecord] {
    info!(start = %self.cursor, last = %self.last_date, "backtest started");
    while self.step().is_some() {}
    &self.records
  }

  /// Evaluate windows until done or until `stop` is raised between windows.
  pub fn run_until(&mut self, stop: &AtomicBool) -> &[BacktestRecord] {
    while !stop.load(Ordering::Relaxed) && self.step().is_some() {}
    &self.records
  }

  /// Evaluate every remaining window on the rayon pool. Records are appended
  /// in chronological order.
  pub fn run_parallel(&mut self) -> Result<&[BacktestRecord]> {
    if self.state == BacktestState::Done {
      return Ok(&self.records);
    }

    let offset = self.records.len();
    let planned = plan_windows(
      self.cursor,
      self.last_date,
      self.config.duration_days,
      self.config.lookback_days,
    )?;
    info!(windows = planned.len(), "parallel backtest started");

    let prices = self.prices;
    let engine = &self.engine;
    let evaluator = &self.evaluator;
    let computed: Vec<BacktestRecord> = planned
      .into_par_iter()
      .map(|mut bounds| {
        bounds.index += offset;
        evaluate_window(prices, bounds, engine, evaluator)
      })
      .collect();

    for record in computed {
      self.advance(record);
    }
    Ok(&self.records)
  }

  /// Number of skipped windows per error kind.
  pub fn skipped_counts(&self) -> BTreeMap<ErrorKind, usize> {
    skipped_counts(&self.records)
  }

  /// Aggregate the records gathered so far.
  pub fn report(&self) -> Result<BacktestReport> {
    BacktestReport::from_records(&self.records, &self.config.engine.methods, &self.evaluator)
  }
}

fn skipped_counts(records: &[BacktestRecord]) -> BTreeMap<ErrorKind, usize> {
  let mut counts = BTreeMap::new();
  for kind in records.iter().filter_map(BacktestRecord::skip_kind) {
    *counts.entry(kind).or_insert(0) += 1;
  }
  counts
}

/// Aggregated view of a backtest.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestReport {
  /// Per-strategy statistics over the concatenated evaluation returns.
  pub summary: SummaryTable,
  /// Concatenated per-period returns, one series per method.
  pub returns: Vec<PortfolioReturnSeries>,
  /// `prod(1 + r) - 1` over the whole horizon, one series per method.
  pub cumulative_returns: Vec<TimeSeries>,
  pub completed_windows: usize,
  pub skipped: BTreeMap<ErrorKind, usize>,
}

impl BacktestReport {
  /// Concatenate completed windows per method and summarise. Skipped windows
  /// only show up in `skipped`.
  pub fn from_records(
    records: &[BacktestRecord],
    methods: &[AllocationMethod],
    evaluator: &PerformanceEvaluator,
  ) -> Result<Self> {
    let completed: Vec<&BacktestRecord> = records.iter().filter(|r| !r.is_skipped()).collect();

    let returns = methods
      .iter()
      .map(|&method| {
        TimeSeries::concat(
          method.label(),
          completed
            .iter()
            .filter_map(|r| r.strategy(method))
            .map(|s| &s.returns),
        )
      })
      .collect::<Result<Vec<_>>>()?;

    let summary = returns
      .iter()
      .map(|s| evaluator.summary(s))
      .collect::<Result<SummaryTable>>()?;

    let cumulative_returns = returns
      .iter()
      .map(|s| {
        let curve = evaluator.cumulative_value(s);
        let values = curve
          .values()
          .iter()
          .map(|v| v / evaluator.base_value - 1.0)
          .collect();
        TimeSeries::new(s.label(), s.dates().to_vec(), values)
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      summary,
      returns,
      cumulative_returns,
      completed_windows: completed.len(),
      skipped: skipped_counts(records),
    })
  }

  /// Strategy returns inner-joined on date, one column per method.
  pub fn aligned_returns(&self) -> Vec<(NaiveDate, Vec<f64>)> {
    TimeSeries::inner_join(&self.returns)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;
  use tracing_test::traced_test;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  /// Daily prices on every calendar day starting at `start`.
  fn synthetic_prices(start: NaiveDate, days: usize, seed: u64) -> PriceMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let market = Normal::new(0.0003, 0.008).unwrap();
    let idio = Normal::new(0.0, 0.01).unwrap();
    let n_assets = 4;

    let mut values = Array2::zeros((days, n_assets));
    let mut level = vec![100.0; n_assets];
    for t in 0..days {
      let m = market.sample(&mut rng);
      for i in 0..n_assets {
        if t > 0 {
          let beta = 0.5 + 0.25 * i as f64;
          level[i] *= 1.0 + beta * m + idio.sample(&mut rng) * (1.0 + 0.3 * i as f64);
        }
        values[[t, i]] = level[i];
      }
    }

    let dates = (0..days).map(|i| start + Days::new(i as u64)).collect();
    let assets = (0..n_assets).map(|i| format!("ASSET{i}")).collect();
    PriceMatrix::new(dates, assets, values).unwrap()
  }

  #[test]
  fn windows_are_contiguous_and_cover_the_range_once() {
    let start = date(2021, 1, 1);
    let last = date(2021, 12, 31);
    let windows = plan_windows(start, last, 30, 365).unwrap();

    assert_eq!(windows[0].eval_start, start);
    for pair in windows.windows(2) {
      assert_eq!(pair[0].eval_end, pair[1].eval_start);
      assert_eq!(pair[1].index, pair[0].index + 1);
    }
    let final_window = windows.last().unwrap();
    assert!(final_window.eval_start <= last && final_window.eval_end > last);

    let mut day = start;
    while day <= last {
      assert_eq!(windows.iter().filter(|w| w.contains(day)).count(), 1, "{day}");
      day = day + Days::new(1);
    }
  }

  #[test]
  fn training_window_ends_the_day_before_evaluation() {
    let w = plan_windows(date(2021, 3, 1), date(2021, 3, 1), 30, 365).unwrap();
    assert_eq!(w.len(), 1);
    assert_eq!(w[0].train_end, date(2021, 2, 28));
    assert_eq!(w[0].train_start, date(2020, 3, 1));
    assert_eq!(w[0].eval_end, date(2021, 3, 31));
  }

  #[test]
  fn zero_duration_is_rejected() {
    assert!(plan_windows(date(2021, 1, 1), date(2021, 2, 1), 0, 10).is_err());
    let prices = synthetic_prices(date(2021, 1, 1), 10, 1);
    let mut config = BacktestConfig::new(date(2021, 1, 1));
    config.duration_days = 0;
    assert!(BacktestEngine::new(&prices, config).is_err());
  }

  #[test]
  #[traced_test]
  fn first_window_without_history_is_skipped_as_insufficient() {
    let start = date(2021, 1, 1);
    let prices = synthetic_prices(start, 365, 3);
    let mut engine = BacktestEngine::new(&prices, BacktestConfig::new(start)).unwrap();
    let records = engine.run().to_vec();

    assert_eq!(records[0].skip_kind(), Some(ErrorKind::InsufficientData));
    assert!(records[1..].iter().all(|r| !r.is_skipped()));
    assert_eq!(engine.state(), BacktestState::Done);
    assert_eq!(engine.skipped_counts().get(&ErrorKind::InsufficientData), Some(&1));
    assert!(logs_contain("window skipped"));

    let report = engine.report().unwrap();
    assert_eq!(report.completed_windows, records.len() - 1);
    assert_eq!(report.summary.len(), 3);
    assert_eq!(report.skipped.get(&ErrorKind::InsufficientData), Some(&1));
  }

  #[test]
  fn completed_windows_hold_valid_weights_and_disjoint_returns() {
    let prices = synthetic_prices(date(2020, 1, 1), 730, 5);
    let mut engine = BacktestEngine::new(&prices, BacktestConfig::new(date(2021, 1, 1))).unwrap();
    engine.run();

    let mut previous_last: Option<NaiveDate> = None;
    for record in engine.records() {
      let WindowOutcome::Completed(strategies) = &record.outcome else {
        panic!("window {} skipped", record.bounds.index);
      };
      assert_eq!(strategies.len(), 3);
      for s in strategies {
        let sum: f64 = s.weights.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(s.weights.as_slice().iter().all(|w| (0.0..=1.0).contains(w)));
        assert!(s.returns.dates().iter().all(|d| record.bounds.contains(*d)));
      }
      let dates = strategies[0].returns.dates();
      if let (Some(prev), Some(first)) = (previous_last, dates.first()) {
        assert!(*first > prev);
      }
      previous_last = dates.last().copied().or(previous_last);
    }

    let report = engine.report().unwrap();
    let aligned = report.aligned_returns();
    assert_eq!(aligned.len(), report.returns[0].len());
    for (series, cumulative) in report.returns.iter().zip(&report.cumulative_returns) {
      let growth: f64 = series.values().iter().map(|r| 1.0 + r).product();
      assert_abs_diff_eq!(*cumulative.values().last().unwrap(), growth - 1.0, epsilon = 1e-9);
    }
  }

  #[test]
  fn degenerate_asset_skips_every_window() {
    let start = date(2020, 1, 1);
    let base = synthetic_prices(start, 500, 9);
    let mut values = base.prices().clone();
    values.column_mut(2).fill(50.0);
    let prices = PriceMatrix::new(base.dates().to_vec(), base.assets().to_vec(), values).unwrap();

    let mut engine = BacktestEngine::new(&prices, BacktestConfig::new(date(2021, 1, 1))).unwrap();
    let n = engine.run().len();
    assert!(n > 0);
    assert_eq!(engine.skipped_counts().get(&ErrorKind::DegenerateInput), Some(&n));
    assert!(matches!(engine.report(), Err(PortfolioError::EmptyWindow(_))));
  }

  #[test]
  fn stop_flag_keeps_finished_records() {
    let prices = synthetic_prices(date(2020, 1, 1), 600, 2);
    let mut engine = BacktestEngine::new(&prices, BacktestConfig::new(date(2021, 1, 1))).unwrap();

    let stop = AtomicBool::new(true);
    assert!(engine.run_until(&stop).is_empty());

    engine.step();
    engine.step();
    assert_eq!(engine.records().len(), 2);
    assert_eq!(engine.state(), BacktestState::Running);
    assert_eq!(engine.cursor(), engine.records()[1].bounds.eval_end);

    stop.store(false, Ordering::Relaxed);
    let total = engine.run_until(&stop).len();
    assert!(total > 2);
    assert_eq!(engine.state(), BacktestState::Done);
    assert!(engine.step().is_none());
  }

  #[test]
  fn parallel_run_matches_sequential_run() {
    let prices = synthetic_prices(date(2020, 1, 1), 600, 4);
    let config = BacktestConfig::new(date(2021, 1, 1));

    let mut sequential = BacktestEngine::new(&prices, config.clone()).unwrap();
    sequential.run();

    let mut parallel = BacktestEngine::new(&prices, config).unwrap();
    parallel.step();
    parallel.run_parallel().unwrap();

    assert_eq!(parallel.records(), sequential.records());
    assert_eq!(parallel.state(), BacktestState::Done);
  }

  #[test]
  fn start_after_history_produces_no_windows() {
    let prices = synthetic_prices(date(2020, 1, 1), 30, 1);
    let mut engine = BacktestEngine::new(&prices, BacktestConfig::new(date(2021, 1, 1))).unwrap();
    assert_eq!(engine.state(), BacktestState::Done);
    assert!(engine.run().is_empty());
  }
}
