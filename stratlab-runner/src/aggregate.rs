//! Aggregation — folds per-instrument results into the portfolio result.
//!
//! Each instrument simulates against the full initial capital; the portfolio
//! curve is the per-timestamp MEAN of the instruments' step-function equity,
//! rebased so the first point equals the initial capital. Aggregation sorts
//! its inputs, so the output is independent of completion order.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::info;

use stratlab_core::domain::{EquityPoint, Trade};
use stratlab_core::sim::TickerResult;

use crate::config::BacktestConfig;
use crate::metrics::BacktestMetrics;
use crate::result::{BacktestResult, TickerFailure, TickerPerformance};

/// Performer lists are capped at this many instruments.
const PERFORMER_CUT: usize = 10;

/// Sample-trade list on the aggregate result is capped at this many trades.
const SAMPLE_TRADES: usize = 20;

/// Build the final [`BacktestResult`] from successful instrument results.
pub fn aggregate(
    config: &BacktestConfig,
    results: &[TickerResult],
    failures: Vec<TickerFailure>,
    execution_time: f64,
) -> BacktestResult {
    if results.is_empty() {
        let mut result = BacktestResult::failure("no instruments produced results");
        result.failures = failures;
        result.execution_time = execution_time;
        return result;
    }

    // Completion order must not matter: work from a symbol-sorted copy.
    let mut results: Vec<&TickerResult> = results.iter().collect();
    results.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let equity_curve = portfolio_curve(&results, config.initial_capital);

    let mut all_trades: Vec<Trade> = results.iter().flat_map(|r| r.trades.iter().cloned()).collect();
    all_trades.sort_by(|a, b| {
        (a.exit_time, &a.symbol, a.entry_time).cmp(&(b.exit_time, &b.symbol, b.entry_time))
    });

    let metrics = BacktestMetrics::compute(
        &equity_curve,
        &all_trades,
        config.initial_capital,
        &config.start_date,
        &config.end_date,
    );

    let mut performance: Vec<TickerPerformance> = results
        .iter()
        .map(|r| TickerPerformance { symbol: r.symbol.clone(), summary: r.summary.clone() })
        .collect();
    performance.sort_by(|a, b| {
        b.summary
            .total_pnl
            .partial_cmp(&a.summary.total_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let top_performers: Vec<TickerPerformance> =
        performance.iter().take(PERFORMER_CUT).cloned().collect();
    let worst_performers: Vec<TickerPerformance> =
        performance.iter().rev().take(PERFORMER_CUT).cloned().collect();

    let sample_start = all_trades.len().saturating_sub(SAMPLE_TRADES);
    let sample_trades = all_trades[sample_start..].to_vec();

    info!(
        "aggregated {} instruments, {} trades, {} failures",
        results.len(),
        all_trades.len(),
        failures.len()
    );

    BacktestResult {
        success: true,
        message: Some("backtest completed".to_string()),
        metrics: Some(metrics),
        equity_curve,
        ticker_performance: performance,
        top_performers,
        worst_performers,
        sample_trades,
        failures,
        execution_time,
    }
}

/// Portfolio equity over the union of instrument timestamps.
///
/// At each union timestamp every instrument contributes its last-known equity
/// at or before that time (the initial capital before its first bar); the
/// curve is the mean, rebased so curve[0] equals the initial capital, with
/// percent daily returns annotated.
pub fn portfolio_curve(results: &[&TickerResult], initial_capital: f64) -> Vec<EquityPoint> {
    let timestamps: BTreeSet<DateTime<Utc>> = results
        .iter()
        .flat_map(|r| r.equity_curve.iter().map(|p| p.timestamp))
        .collect();
    if timestamps.is_empty() {
        return Vec::new();
    }

    // One step-function cursor per instrument.
    let mut cursors: Vec<(usize, f64, &[EquityPoint])> = results
        .iter()
        .map(|r| (0usize, initial_capital, r.equity_curve.as_slice()))
        .collect();

    let mut curve: Vec<EquityPoint> = Vec::with_capacity(timestamps.len());
    for ts in timestamps {
        let mut sum = 0.0;
        for (index, last_known, points) in cursors.iter_mut() {
            while *index < points.len() && points[*index].timestamp <= ts {
                *last_known = points[*index].equity;
                *index += 1;
            }
            sum += *last_known;
        }
        curve.push(EquityPoint::new(ts, sum / results.len() as f64));
    }

    // Rebase so the curve starts at the initial capital.
    if curve[0].equity > 0.0 {
        let factor = initial_capital / curve[0].equity;
        for point in &mut curve {
            point.equity *= factor;
        }
    }

    for i in 1..curve.len() {
        let prev = curve[i - 1].equity;
        if prev > 0.0 {
            curve[i].daily_return = Some((curve[i].equity - prev) / prev * 100.0);
        }
    }
    curve
}
