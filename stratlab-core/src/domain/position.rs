//! Position — an open long holding in a single instrument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An open long position. At most one exists per instrument at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub entry_time: DateTime<Utc>,
    /// Entry fill price (slippage already applied).
    pub entry_price: f64,
    /// Whole shares held; always >= 1.
    pub size: f64,
    /// Absolute stop-loss price, if armed.
    pub stop_price: Option<f64>,
    /// Absolute take-profit price, if armed.
    pub target_price: Option<f64>,
    pub entry_bar: usize,
}

impl Position {
    pub fn new(entry_time: DateTime<Utc>, entry_price: f64, size: f64, entry_bar: usize) -> Self {
        Self {
            entry_time,
            entry_price,
            size,
            stop_price: None,
            target_price: None,
            entry_bar,
        }
    }

    /// Market value at the given price.
    pub fn market_value(&self, price: f64) -> f64 {
        self.size * price
    }
}
