//! Per-instrument bar loop — drives one strategy over one bar sequence.
//!
//! Per bar: bracket exits are tested against the bar's range before the
//! strategy runs, then the strategy is consulted exactly once (to exit on a
//! signal while long, or to enter while flat), then equity is marked to the
//! close. After the last bar any open position is force-closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::domain::bar::validate_series;
use crate::domain::{resolve_bracket_price, Bar, Decision, EquityPoint, ExitReason, Position, Signal, Trade};
use crate::sandbox::{self, CompiledStrategy, Value, Window};
use crate::sandbox::value::Columns;
use crate::sim::bracket::check_brackets;
use crate::sim::cost_model::{CostModel, Side};
use crate::sim::result::{TickerResult, TickerSummary};

/// Simulation parameters for one instrument.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub initial_capital: f64,
    /// Fraction of available cash committed per entry, in (0, 1].
    pub position_size: f64,
    pub cost: CostModel,
}

/// Run one instrument simulation.
///
/// `cancel` is checked between bars; when raised, the simulation stops and
/// returns an unsuccessful result that the caller discards.
pub fn simulate_ticker(
    symbol: &str,
    bars: &[Bar],
    strategy: &CompiledStrategy,
    params: &SimParams,
    cancel: Option<&AtomicBool>,
) -> TickerResult {
    if let Err(e) = validate_series(bars) {
        warn!("{symbol}: aborting on data anomaly: {e}");
        return TickerResult::failed(symbol, format!("data anomaly: {e}"));
    }

    let cols = Columns::from_bars(bars);
    let state = Value::map();

    let mut cash = params.initial_capital;
    let mut position: Option<Position> = None;
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
    let mut sandbox_failures = 0usize;

    for (i, bar) in bars.iter().enumerate() {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return TickerResult::failed(symbol, "cancelled");
        }

        // 1. Intra-bar bracket exits come before the strategy sees the bar.
        if let Some(pos) = position.take() {
            match check_brackets(&pos, bar) {
                Some((reference, reason)) => {
                    trades.push(close_position(
                        symbol,
                        pos,
                        bar.timestamp,
                        reference,
                        reason,
                        i,
                        &mut cash,
                        &params.cost,
                    ));
                }
                None => position = Some(pos),
            }
        }

        // 2. One decide call per bar; failures degrade to no signal.
        let window = Window::new(cols.clone(), i + 1);
        let deadline = Instant::now() + sandbox::DECIDE_TIMEOUT;
        let decision = match sandbox::invoke(strategy, &window, &state, deadline) {
            Ok(d) => d,
            Err(e) => {
                warn!("{symbol}: strategy failed on bar {i}: {e}");
                sandbox_failures += 1;
                Decision::none()
            }
        };

        if decision.signal.is_exit() {
            if let Some(pos) = position.take() {
                trades.push(close_position(
                    symbol,
                    pos,
                    bar.timestamp,
                    bar.close,
                    ExitReason::Signal,
                    i,
                    &mut cash,
                    &params.cost,
                ));
            }
        } else if decision.signal == Signal::Buy && position.is_none() {
            position = try_open_position(symbol, &decision, bar, i, &mut cash, params);
        }

        // 3. Mark to the close.
        let equity = cash + position.as_ref().map_or(0.0, |p| p.market_value(bar.close));
        equity_curve.push(EquityPoint::new(bar.timestamp, equity));
    }

    // Force-close whatever is still open at the final close.
    if let Some(pos) = position.take() {
        let last = bars.last().expect("non-empty: position exists");
        trades.push(close_position(
            symbol,
            pos,
            last.timestamp,
            last.close,
            ExitReason::EndOfData,
            bars.len() - 1,
            &mut cash,
            &params.cost,
        ));
        if let Some(point) = equity_curve.last_mut() {
            // The final point reflects realized cash, exit costs included.
            point.equity = cash;
        }
    }

    debug!("{symbol}: {} trades over {} bars", trades.len(), bars.len());

    let summary = TickerSummary::from_trades(&trades, params.initial_capital);
    TickerResult {
        symbol: symbol.to_string(),
        success: true,
        error: None,
        trades,
        equity_curve,
        sandbox_failures,
        summary,
    }
}

/// Attempt a long entry at the bar's close. Returns None when the computed
/// size is zero or the cash cannot cover fill plus commission.
fn try_open_position(
    symbol: &str,
    decision: &Decision,
    bar: &Bar,
    bar_index: usize,
    cash: &mut f64,
    params: &SimParams,
) -> Option<Position> {
    let fraction = params.position_size * decision.size.unwrap_or(1.0);
    let fill = params.cost.fill_price(bar.close, Side::Buy);
    let size = (*cash * fraction / fill).floor();
    if size < 1.0 {
        return None;
    }

    let commission = params.cost.commission_for(fill, size);
    let total_cost = fill * size + commission;
    if total_cost > *cash {
        debug!("{symbol}: entry skipped, cost {total_cost:.2} exceeds cash {cash:.2}");
        return None;
    }
    *cash -= total_cost;

    let mut pos = Position::new(bar.timestamp, fill, size, bar_index);
    pos.stop_price = decision
        .stop_loss
        .and_then(|v| resolve_bracket_price(v, fill));
    pos.target_price = decision
        .take_profit
        .and_then(|v| resolve_bracket_price(v, fill));
    Some(pos)
}

#[allow(clippy::too_many_arguments)]
fn close_position(
    symbol: &str,
    position: Position,
    exit_time: DateTime<Utc>,
    exit_reference: f64,
    exit_reason: ExitReason,
    exit_bar: usize,
    cash: &mut f64,
    cost: &CostModel,
) -> Trade {
    let fill = cost.fill_price(exit_reference, Side::Sell);
    let exit_commission = cost.commission_for(fill, position.size);
    *cash += fill * position.size - exit_commission;

    let entry_commission = cost.commission_for(position.entry_price, position.size);
    let pnl = (fill - position.entry_price) * position.size - entry_commission - exit_commission;
    let entry_notional = position.entry_price * position.size;
    let pnl_percent = if entry_notional > 0.0 {
        pnl / entry_notional * 100.0
    } else {
        0.0
    };

    Trade {
        symbol: symbol.to_string(),
        entry_time: position.entry_time,
        entry_price: position.entry_price,
        exit_time,
        exit_price: fill,
        size: position.size,
        pnl,
        pnl_percent,
        exit_reason,
        bars_held: exit_bar - position.entry_bar,
    }
}
