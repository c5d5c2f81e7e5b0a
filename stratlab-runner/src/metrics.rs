//! Performance metrics — pure functions over the portfolio equity curve and
//! the combined trade ledger.
//!
//! Every metric guards its denominators and falls back to 0.0; nothing here
//! touches the orchestrator or the data pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stratlab_core::domain::{EquityPoint, Trade};

/// Trading days per year, used to annualize.
const TRADING_DAYS: f64 = 252.0;

/// Cap for profit factor when gross losses are zero.
const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Aggregate performance metrics for one backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    /// Compound annual growth rate, fractional (0.07 = 7%/yr).
    pub cagr: f64,
    /// Annualized stddev of daily returns, percent.
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Greatest running-max shortfall, in currency.
    pub max_drawdown: f64,
    /// The same shortfall relative to the peak it fell from, percent.
    pub max_drawdown_percent: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_bars_held: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub consecutive_wins: usize,
    pub consecutive_losses: usize,
}

impl BacktestMetrics {
    /// Compute the full metric vector.
    ///
    /// `equity_curve` is the portfolio curve; `trades` the combined ledger of
    /// all successful instruments.
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        start_date: &str,
        end_date: &str,
    ) -> Self {
        let final_equity = equity_curve.last().map_or(initial_capital, |p| p.equity);
        let total_return = final_equity - initial_capital;
        let total_return_percent = if initial_capital > 0.0 {
            total_return / initial_capital * 100.0
        } else {
            0.0
        };

        let returns = daily_returns(equity_curve);
        let (max_drawdown, max_drawdown_percent) = max_drawdown(equity_curve);

        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();
        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();

        let total_trades = trades.len();
        let (consecutive_wins, consecutive_losses) = streaks(trades);

        Self {
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            initial_capital,
            final_equity,
            total_return,
            total_return_percent,
            cagr: cagr(equity_curve, initial_capital),
            volatility: std_dev(&returns) * TRADING_DAYS.sqrt() * 100.0,
            sharpe_ratio: sharpe_ratio(&returns),
            sortino_ratio: sortino_ratio(&returns),
            max_drawdown,
            max_drawdown_percent,
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: ratio(wins.len() as f64, total_trades as f64),
            profit_factor: profit_factor(gross_profit, gross_loss),
            avg_trade_pnl: ratio(gross_profit - gross_loss, total_trades as f64),
            avg_win: ratio(gross_profit, wins.len() as f64),
            avg_loss: ratio(losses.iter().sum::<f64>(), losses.len() as f64),
            avg_bars_held: ratio(
                trades.iter().map(|t| t.bars_held as f64).sum::<f64>(),
                total_trades as f64,
            ),
            best_trade: trades.iter().map(|t| t.pnl).reduce(f64::max).unwrap_or(0.0),
            worst_trade: trades.iter().map(|t| t.pnl).reduce(f64::min).unwrap_or(0.0),
            consecutive_wins,
            consecutive_losses,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// First-difference ratio returns of an equity curve.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            if w[0].equity > 0.0 {
                (w[1].equity - w[0].equity) / w[0].equity
            } else {
                0.0
            }
        })
        .collect()
}

/// Compound annual growth rate over the curve's calendar span, fractional.
pub fn cagr(equity_curve: &[EquityPoint], initial_capital: f64) -> f64 {
    if equity_curve.len() < 2 || initial_capital <= 0.0 {
        return 0.0;
    }
    let final_equity = equity_curve.last().map_or(0.0, |p| p.equity);
    if final_equity <= 0.0 {
        return 0.0;
    }
    let years = fractional_years(
        equity_curve[0].timestamp,
        equity_curve[equity_curve.len() - 1].timestamp,
    );
    if years <= 0.0 {
        return 0.0;
    }
    (final_equity / initial_capital).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio of daily returns; 0.0 when variance is zero.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let sd = std_dev(returns);
    if sd < 1e-15 {
        return 0.0;
    }
    mean(returns) / sd * TRADING_DAYS.sqrt()
}

/// Annualized Sortino ratio: mean over the stddev of negative returns only.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sd = std_dev(&negative);
    if sd < 1e-15 {
        return 0.0;
    }
    mean(returns) / sd * TRADING_DAYS.sqrt()
}

/// Running-max scan. Returns (greatest absolute drawdown, the same drawdown
/// relative to the peak it fell from, in percent).
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    let mut max_dd_percent = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        let dd = peak - point.equity;
        if dd > max_dd {
            max_dd = dd;
            max_dd_percent = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }
    (max_dd, max_dd_percent)
}

/// Gross profit over absolute gross loss, capped when losses are zero.
pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    if gross_loss > 0.0 {
        (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
    } else if gross_profit > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    }
}

/// Longest winning and losing streaks over the ledger, in order.
fn streaks(trades: &[Trade]) -> (usize, usize) {
    let mut max_wins = 0;
    let mut max_losses = 0;
    let mut wins = 0;
    let mut losses = 0;
    for trade in trades {
        if trade.pnl > 0.0 {
            wins += 1;
            losses = 0;
            max_wins = max_wins.max(wins);
        } else {
            losses += 1;
            wins = 0;
            max_losses = max_losses.max(losses);
        }
    }
    (max_wins, max_losses)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn fractional_years(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / (365.25 * 24.0 * 3600.0)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
