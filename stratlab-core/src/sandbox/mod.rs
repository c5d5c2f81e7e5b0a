//! Strategy sandbox — compiles and runs untrusted strategy scripts.
//!
//! Strategies are written in a small expression language with no IO, import,
//! or reflection constructs; the only callables are a whitelisted numeric
//! library. A script must define `fn decide(window, state)` and return a map:
//!
//! ```text
//! fn decide(window, state) {
//!     let closes = window.close;
//!     if len(closes) < 50 {
//!         return { signal: "none" };
//!     }
//!     if sma(closes, 20) > sma(closes, 50) {
//!         return { signal: "buy", stop_loss: 0.98, take_profit: 1.10 };
//!     }
//!     return { signal: "sell" };
//! }
//! ```
//!
//! `window` is a read-only view of the instrument's bars up to and including
//! the current one (`open`, `high`, `low`, `close`, `volume` series). `state`
//! is a map that persists across calls for one instrument and is reset
//! between instruments. Each call runs under a wall-clock deadline
//! ([`DECIDE_TIMEOUT`]) backed by an operation budget.

pub mod ast;
pub mod builtins;
pub mod interp;
pub mod parser;
pub mod token;
pub mod validate;
pub mod value;

use std::time::Duration;

pub use interp::{invoke, SandboxError};
pub use validate::{validate, CompiledStrategy, ValidationError};
pub use value::{Columns, Series, Value, Window};

/// Wall-clock budget for a single decide call.
pub const DECIDE_TIMEOUT: Duration = Duration::from_secs(5);

/// A starting-point strategy script (moving-average crossover).
pub fn strategy_template() -> &'static str {
    r#"// Simple moving average crossover.
//
// decide(window, state) runs once per bar. `window` exposes open, high, low,
// close, and volume as series covering every bar up to the current one.
// `state` is a map that persists across bars for one instrument.
//
// Return a map with:
//   signal      "buy", "sell", "flat", "hold", or "none"
//   size        optional fraction of the allotted capital, in (0, 1]
//   stop_loss   optional: multiplier (0.98 = 2% below entry) or absolute price
//   take_profit optional: multiplier (1.05 = 5% above entry) or absolute price

fn decide(window, state) {
    let closes = window.close;
    if len(closes) < 50 {
        return { signal: "none" };
    }

    let fast = sma(closes, 20);
    let slow = sma(closes, 50);

    let prev_fast = state["prev_fast"];
    let prev_slow = state["prev_slow"];
    state["prev_fast"] = fast;
    state["prev_slow"] = slow;

    if prev_fast == nil {
        return { signal: "none" };
    }

    if prev_fast <= prev_slow && fast > slow {
        return { signal: "buy", stop_loss: 0.98, take_profit: 1.10 };
    }
    if prev_fast >= prev_slow && fast < slow {
        return { signal: "sell" };
    }
    return { signal: "none" };
}
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_validates() {
        assert!(validate(strategy_template()).is_ok());
    }
}
