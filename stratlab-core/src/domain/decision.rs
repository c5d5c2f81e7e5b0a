//! Per-bar strategy directive and bracket-price resolution.

use serde::{Deserialize, Serialize};

/// Strategy directive for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Sell,
    Flat,
    Hold,
    None,
}

impl Signal {
    /// Parse the signal strings accepted from strategy scripts.
    ///
    /// "long" is an alias for buy; "exit" for flat. Anything unrecognized
    /// maps to None.
    pub fn parse(s: &str) -> Self {
        match s {
            "buy" | "long" => Signal::Buy,
            "sell" => Signal::Sell,
            "flat" | "exit" => Signal::Flat,
            "hold" => Signal::Hold,
            _ => Signal::None,
        }
    }

    /// True for signals that flatten an open long.
    pub fn is_exit(&self) -> bool {
        matches!(self, Signal::Sell | Signal::Flat)
    }
}

/// Value object returned by the sandbox for one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    /// Optional position-size multiplier in (0, 1].
    pub size: Option<f64>,
    /// Stop-loss as a multiplier of entry or an absolute price (see
    /// [`resolve_bracket_price`]).
    pub stop_loss: Option<f64>,
    /// Take-profit as a multiplier of entry or an absolute price.
    pub take_profit: Option<f64>,
}

impl Decision {
    pub fn none() -> Self {
        Self {
            signal: Signal::None,
            size: None,
            stop_loss: None,
            take_profit: None,
        }
    }
}

/// Values below this band may be multipliers; at or above they are always
/// absolute prices.
pub const MULTIPLIER_BAND: f64 = 3.0;

/// Resolve a strategy-supplied stop/target value into an absolute price.
///
/// A value v is treated as a multiplier of the entry price when
/// `0 < v < MULTIPLIER_BAND` and `|v - 1| < 0.5` (so 0.98 means 2% below
/// entry, 1.05 means 5% above). Anything else is an absolute price.
/// Non-finite, non-positive, or unresolvable values drop the bracket.
pub fn resolve_bracket_price(value: f64, entry_price: f64) -> Option<f64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let price = if value < MULTIPLIER_BAND && (value - 1.0).abs() < 0.5 {
        entry_price * value
    } else {
        value
    };
    (price.is_finite() && price > 0.0).then_some(price)
}
