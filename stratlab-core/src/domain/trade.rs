//! Closed trade records and equity-curve points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    EndOfData,
}

/// Closed trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    /// Entry fill price, slippage applied.
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    /// Exit fill price, slippage applied.
    pub exit_price: f64,
    pub size: f64,
    /// Net of entry and exit commission.
    pub pnl: f64,
    /// PnL relative to entry notional, in percent.
    pub pnl_percent: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}

/// One point on a per-instrument or portfolio equity curve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    /// Percent return versus the previous point; None on the first point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_return: Option<f64>,
}

impl EquityPoint {
    pub fn new(timestamp: DateTime<Utc>, equity: f64) -> Self {
        Self { timestamp, equity, daily_return: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade(pnl: f64) -> Trade {
        let now = Utc::now();
        Trade {
            symbol: "SPY".into(),
            entry_time: now,
            entry_price: 100.0,
            exit_time: now,
            exit_price: 100.0 + pnl,
            size: 1.0,
            pnl,
            pnl_percent: pnl,
            exit_reason: ExitReason::Signal,
            bars_held: 1,
        }
    }

    #[test]
    fn winner_requires_positive_pnl() {
        assert!(trade(1.0).is_winner());
        assert!(!trade(0.0).is_winner());
        assert!(!trade(-1.0).is_winner());
    }
}
