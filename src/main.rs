use std::env;

use anyhow::Context;
use anyhow::Result;
use chrono::Days;
use chrono::NaiveDate;
use prettytable::row;
use prettytable::Cell;
use prettytable::Table;
use quant_alloc::quant::portfolio::AllocationMethod;
use quant_alloc::quant::portfolio::BacktestConfig;
use quant_alloc::quant::portfolio::BacktestEngine;
use quant_alloc::quant::portfolio::CorrelatedGbm;
use quant_alloc::quant::portfolio::PerformanceEvaluator;
use quant_alloc::quant::portfolio::WindowOutcome;
use tracing::info;

// Usage: quant-alloc [methods] [seed]
// e.g.   quant-alloc "minvar,maxsharpe,hrp,equal" 42
fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quant_alloc=info".into()),
    )
    .init();

  let args: Vec<String> = env::args().collect();
  let methods = match args.get(1) {
    Some(list) => list
      .split(',')
      .map(|m| m.trim().parse::<AllocationMethod>())
      .collect::<Result<Vec<_>, _>>()
      .context("parsing allocation methods")?,
    None => vec![
      AllocationMethod::MinimumVariance,
      AllocationMethod::MaximumSharpe,
      AllocationMethod::Hrp,
      AllocationMethod::EqualWeight,
    ],
  };
  let seed = match args.get(2) {
    Some(s) => s.parse::<u64>().context("parsing seed")?,
    None => 42,
  };

  let first = NaiveDate::from_ymd_opt(2018, 1, 1).context("invalid start date")?;
  let prices = CorrelatedGbm::new(
    vec![0.04, 0.06, 0.08, 0.10, 0.12, 0.03],
    vec![0.08, 0.12, 0.18, 0.25, 0.35, 0.05],
    vec![0.6, 0.7, 0.8, 0.8, 0.5, 0.1],
    100.0,
    first,
    6 * 261,
    seed,
  )
  .sample()?;
  info!(days = prices.len(), assets = prices.assets().len(), "simulated price history");

  let evaluator = PerformanceEvaluator::default();
  println!("Assets");
  evaluator.asset_summary(&prices)?.to_table().printstd();

  let start = first
    .checked_add_days(Days::new(365))
    .context("backtest start out of range")?;
  let mut config = BacktestConfig::new(start);
  config.engine.methods = methods;

  let mut backtest = BacktestEngine::new(&prices, config)?;
  backtest.run_parallel()?;
  let report = backtest.report()?;

  println!("\nStrategies ({} windows evaluated)", report.completed_windows);
  report.summary.to_table().printstd();

  if !report.skipped.is_empty() {
    let mut skipped = Table::new();
    skipped.set_titles(row!["Skipped", "Windows"]);
    for (kind, count) in &report.skipped {
      skipped.add_row(row![kind, count]);
    }
    skipped.printstd();
  }

  let latest = backtest.records().iter().rev().find_map(|r| match &r.outcome {
    WindowOutcome::Completed(s) => Some((r.bounds, s)),
    WindowOutcome::Skipped { .. } => None,
  });
  if let Some((bounds, strategies)) = latest {
    println!("\nWeights from {}", bounds.eval_start);
    let mut weights = Table::new();
    let mut titles = row![""];
    for s in strategies {
      titles.add_cell(Cell::new(s.method.label()));
    }
    weights.set_titles(titles);
    for (i, asset) in prices.assets().iter().enumerate() {
      let mut line = row![asset];
      for s in strategies {
        line.add_cell(Cell::new(&format!("{:.4}", s.weights.as_slice()[i])));
      }
      weights.add_row(line);
    }
    weights.printstd();
  }

  Ok(())
}
