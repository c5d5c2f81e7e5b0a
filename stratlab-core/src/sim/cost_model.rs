//! Cost model — slippage and commission as fractional rates.
//!
//! Slippage is directional: buyers pay more, sellers receive less.
//! Commission is symmetric per side, charged on the filled notional.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Execution friction applied at every fill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostModel {
    /// Commission as a fraction of filled notional, per side.
    pub commission: f64,
    /// Slippage as a fraction of the reference price.
    pub slippage: f64,
}

impl CostModel {
    pub fn new(commission: f64, slippage: f64) -> Self {
        Self { commission, slippage }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Apply directional slippage to a reference price.
    pub fn fill_price(&self, reference: f64, side: Side) -> f64 {
        match side {
            Side::Buy => reference * (1.0 + self.slippage),
            Side::Sell => reference * (1.0 - self.slippage),
        }
    }

    /// Commission for a fill: `fill_price * size * commission`.
    pub fn commission_for(&self, fill_price: f64, size: f64) -> f64 {
        fill_price * size * self.commission
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frictionless_fill_is_reference() {
        let cost = CostModel::frictionless();
        assert_eq!(cost.fill_price(100.0, Side::Buy), 100.0);
        assert_eq!(cost.fill_price(100.0, Side::Sell), 100.0);
        assert_eq!(cost.commission_for(100.0, 10.0), 0.0);
    }

    #[test]
    fn buy_pays_more_sell_receives_less() {
        let cost = CostModel::new(0.0, 0.0005);
        assert!((cost.fill_price(100.0, Side::Buy) - 100.05).abs() < 1e-10);
        assert!((cost.fill_price(100.0, Side::Sell) - 99.95).abs() < 1e-10);
    }

    #[test]
    fn commission_on_filled_notional() {
        let cost = CostModel::new(0.001, 0.0);
        assert!((cost.commission_for(100.0, 50.0) - 5.0).abs() < 1e-10);
    }
}
