//! Deterministic synthetic bar provider for tests and offline runs.
//!
//! Bars are a geometric random walk seeded per (master seed, symbol), so the
//! same request always yields the same data regardless of the order symbols
//! are processed in.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::provider::{DataError, DataProvider};
use crate::data::universe::{sp500_fallback, Universe};
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    master_seed: u64,
}

impl SyntheticProvider {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    /// Derive an order-independent sub-seed for one symbol.
    fn sub_seed(&self, symbol: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.master_seed.hash(&mut hasher);
        symbol.hash(&mut hasher);
        hasher.finish()
    }

    fn generate(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(self.sub_seed(symbol));
        let mut bars = Vec::new();
        let mut price = rng.gen_range(20.0..400.0);
        let mut date = start;

        while date <= end {
            // Trading days only.
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                let drift: f64 = rng.gen_range(-0.02..0.021);
                let open = price;
                let close = (price * (1.0 + drift)).max(0.01);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = (open.min(close) * (1.0 - rng.gen_range(0.0..0.01))).max(0.01);
                let volume = rng.gen_range(100_000.0..5_000_000.0_f64).round();

                let timestamp = date
                    .and_hms_opt(21, 0, 0)
                    .expect("21:00:00 is always valid")
                    .and_utc();
                bars.push(Bar::new(timestamp, open, high, low, close, volume));
                price = close;
            }
            date += Duration::days(1);
        }
        bars
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn load_universe(&self, id: &str) -> Result<Universe, DataError> {
        match id {
            "sp500" => Ok(sp500_fallback()),
            other => Err(DataError::UnknownUniverse { id: other.to_string() }),
        }
    }

    fn load_bars(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        _interval: &str,
    ) -> Result<HashMap<String, Vec<Bar>>, DataError> {
        let mut data = HashMap::new();
        for symbol in symbols {
            let bars = self.generate(symbol, start, end);
            if !bars.is_empty() {
                data.insert(symbol.clone(), bars);
            }
        }
        Ok(data)
    }
}
