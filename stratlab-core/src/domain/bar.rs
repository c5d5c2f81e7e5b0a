use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single daily OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Validate bar invariants.
    pub fn validate(&self) -> Result<(), BarError> {
        for price in [self.open, self.high, self.low, self.close] {
            if !price.is_finite() || price <= 0.0 {
                return Err(BarError::NonFinitePrice {
                    timestamp: self.timestamp,
                });
            }
        }
        if self.high < self.low {
            return Err(BarError::InvalidRange { high: self.high, low: self.low });
        }
        if !(self.low..=self.high).contains(&self.open) {
            return Err(BarError::OpenOutOfRange);
        }
        if !(self.low..=self.high).contains(&self.close) {
            return Err(BarError::CloseOutOfRange);
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(BarError::NegativeVolume);
        }
        Ok(())
    }

    /// Check if bar is bullish (close > open).
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Get bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Validate a bar sequence: each bar valid, timestamps strictly increasing.
pub fn validate_series(bars: &[Bar]) -> Result<(), BarError> {
    for bar in bars {
        bar.validate()?;
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(BarError::NonMonotonicTimestamp {
                timestamp: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum BarError {
    #[error("non-finite or non-positive price at {timestamp}")]
    NonFinitePrice { timestamp: DateTime<Utc> },

    #[error("invalid bar range: high={high}, low={low}")]
    InvalidRange { high: f64, low: f64 },

    #[error("open price outside high/low range")]
    OpenOutOfRange,

    #[error("close price outside high/low range")]
    CloseOutOfRange,

    #[error("negative volume not allowed")]
    NegativeVolume,

    #[error("timestamps not strictly increasing at {timestamp}")]
    NonMonotonicTimestamp { timestamp: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar_at(day: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap() + Duration::days(day);
        Bar::new(ts, open, high, low, close, 1000.0)
    }

    #[test]
    fn validate_accepts_valid_bar() {
        assert!(bar_at(0, 100.0, 105.0, 95.0, 102.0).validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let bar = bar_at(0, 100.0, 99.0, 101.0, 100.0);
        assert!(matches!(bar.validate(), Err(BarError::InvalidRange { .. })));
    }

    #[test]
    fn validate_rejects_nan_price() {
        let mut bar = bar_at(0, 100.0, 105.0, 95.0, 102.0);
        bar.close = f64::NAN;
        assert!(matches!(bar.validate(), Err(BarError::NonFinitePrice { .. })));
    }

    #[test]
    fn validate_rejects_zero_price() {
        let mut bar = bar_at(0, 100.0, 105.0, 95.0, 102.0);
        bar.low = 0.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn validate_rejects_open_out_of_range() {
        let bar = bar_at(0, 110.0, 105.0, 95.0, 102.0);
        assert!(matches!(bar.validate(), Err(BarError::OpenOutOfRange)));
    }

    #[test]
    fn validate_rejects_negative_volume() {
        let mut bar = bar_at(0, 100.0, 105.0, 95.0, 102.0);
        bar.volume = -1.0;
        assert!(matches!(bar.validate(), Err(BarError::NegativeVolume)));
    }

    #[test]
    fn series_rejects_duplicate_timestamps() {
        let bars = vec![
            bar_at(0, 100.0, 105.0, 95.0, 102.0),
            bar_at(0, 102.0, 106.0, 96.0, 103.0),
        ];
        assert!(matches!(
            validate_series(&bars),
            Err(BarError::NonMonotonicTimestamp { .. })
        ));
    }

    #[test]
    fn series_accepts_increasing_timestamps() {
        let bars = vec![
            bar_at(0, 100.0, 105.0, 95.0, 102.0),
            bar_at(1, 102.0, 106.0, 96.0, 103.0),
            bar_at(2, 103.0, 107.0, 97.0, 104.0),
        ];
        assert!(validate_series(&bars).is_ok());
    }
}
