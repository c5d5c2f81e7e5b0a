//! Per-instrument simulation output.

use serde::{Deserialize, Serialize};

use crate::domain::{EquityPoint, Trade};

/// Number of sample trades carried on a ticker summary.
const SUMMARY_SAMPLE_TRADES: usize = 10;

/// Everything one instrument simulation produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerResult {
    pub symbol: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Decide calls that errored or timed out and were treated as no signal.
    pub sandbox_failures: usize,
    pub summary: TickerSummary,
}

impl TickerResult {
    pub fn failed(symbol: &str, error: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            success: false,
            error: Some(error.into()),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            sandbox_failures: 0,
            summary: TickerSummary::default(),
        }
    }
}

/// Aggregates over one instrument's closed trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub avg_pnl_per_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// Largest peak-to-trough equity shortfall over the trade sequence,
    /// as a fraction of the peak.
    pub max_drawdown: f64,
    /// Most recent trades, capped at 10.
    pub sample_trades: Vec<Trade>,
}

impl TickerSummary {
    pub fn from_trades(trades: &[Trade], initial_capital: f64) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let total_trades = trades.len();
        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let total_pnl_percent: f64 = trades.iter().map(|t| t.pnl_percent).sum();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();
        let profit_factor = if gross_loss > 0.0 {
            (gross_profit / gross_loss).min(100.0)
        } else if gross_profit > 0.0 {
            100.0
        } else {
            0.0
        };

        // Trade-sequence drawdown: walk equity trade by trade.
        let mut equity = initial_capital;
        let mut peak = equity;
        let mut max_drawdown = 0.0_f64;
        for trade in trades {
            equity += trade.pnl;
            if equity > peak {
                peak = equity;
            }
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
        }

        let sample_start = total_trades.saturating_sub(SUMMARY_SAMPLE_TRADES);

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64,
            total_pnl,
            total_pnl_percent,
            avg_pnl_per_trade: total_pnl / total_trades as f64,
            avg_win: if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 },
            avg_loss: if losses.is_empty() {
                0.0
            } else {
                losses.iter().sum::<f64>() / losses.len() as f64
            },
            profit_factor,
            max_drawdown,
            sample_trades: trades[sample_start..].to_vec(),
        }
    }
}
