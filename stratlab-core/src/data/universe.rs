//! Universe of symbols.
//!
//! Uses BTreeSet for deterministic iteration order, so a limited universe is
//! stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub name: String,
    pub symbols: BTreeSet<String>,
}

impl Universe {
    pub fn new(name: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            name: name.into(),
            symbols: symbols.into_iter().collect(),
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// First `limit` symbols in deterministic order; the whole universe when
    /// limit is None.
    pub fn limited(&self, limit: Option<usize>) -> Vec<String> {
        let take = limit.unwrap_or(self.symbols.len());
        self.symbols.iter().take(take).cloned().collect()
    }
}

/// Built-in fallback list of major S&P 500 constituents, for running without
/// a live universe resolver.
pub fn sp500_fallback() -> Universe {
    let symbols = [
        "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "BRK-B",
        "JPM", "JNJ", "V", "PG", "MA", "HD", "CVX", "MRK", "ABBV", "PEP",
        "COST", "AVGO", "KO", "WMT", "MCD", "CSCO", "ACN", "TMO", "LIN",
        "ABT", "DHR", "VZ", "NKE", "CMCSA", "ADBE", "NEE", "TXN", "PM",
    ];
    Universe::new("sp500", symbols.iter().map(|s| s.to_string()).collect())
}
