//! Bracket exits — does a bar trigger an open position's stop or target?
//!
//! The stop is evaluated first and wins when both levels are touched on the
//! same bar. This ordering is deterministic and conservative.

use crate::domain::{Bar, ExitReason, Position};

/// Check an open position's brackets against a bar's range.
///
/// Returns the exit reference price (the bracket level itself, before
/// slippage) and the exit reason, or None when neither level is touched.
pub fn check_brackets(position: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
    if let Some(stop) = position.stop_price {
        if bar.low <= stop {
            return Some((stop, ExitReason::StopLoss));
        }
    }
    if let Some(target) = position.target_price {
        if bar.high >= target {
            return Some((target, ExitReason::TakeProfit));
        }
    }
    None
}
