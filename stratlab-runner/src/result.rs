//! Aggregate backtest output.

use serde::{Deserialize, Serialize};

use stratlab_core::domain::{EquityPoint, Trade};
use stratlab_core::sim::TickerSummary;

use crate::metrics::BacktestMetrics;

/// Per-instrument performance as carried on the aggregate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPerformance {
    pub symbol: String,
    #[serde(flatten)]
    pub summary: TickerSummary,
}

/// An instrument that produced no result (no data, data anomaly, or a fatal
/// simulation error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerFailure {
    pub symbol: String,
    pub error: String,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BacktestMetrics>,
    /// Portfolio equity curve (mean across instruments, rebased).
    pub equity_curve: Vec<EquityPoint>,
    /// All instruments, sorted by total pnl descending.
    pub ticker_performance: Vec<TickerPerformance>,
    /// Best instruments by total pnl, capped at 10.
    pub top_performers: Vec<TickerPerformance>,
    /// Worst instruments by total pnl (worst first), capped at 10.
    pub worst_performers: Vec<TickerPerformance>,
    /// Most recent trades across all instruments, capped at 20.
    pub sample_trades: Vec<Trade>,
    pub failures: Vec<TickerFailure>,
    /// Wall-clock seconds for the whole run.
    pub execution_time: f64,
}

impl BacktestResult {
    /// A terminal failure envelope (no metrics, no curves).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            metrics: None,
            equity_curve: Vec::new(),
            ticker_performance: Vec::new(),
            top_performers: Vec::new(),
            worst_performers: Vec::new(),
            sample_trades: Vec::new(),
            failures: Vec::new(),
            execution_time: 0.0,
        }
    }
}
