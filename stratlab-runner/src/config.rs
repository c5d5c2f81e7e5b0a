//! Backtest run configuration — defaults, bounds checking, TOML loading.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for one backtest run.
///
/// Every numeric field has the bounds documented on it; [`BacktestConfig::validate`]
/// enforces them before any worker starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Strategy script source (see the sandbox module docs for the language).
    /// May be filled in after parsing, e.g. from a separate script file.
    #[serde(default)]
    pub strategy_source: String,

    /// Universe id resolved by the data provider (default "sp500").
    #[serde(default = "default_universe")]
    pub universe: String,

    /// Explicit ticker list; overrides `universe` when present.
    #[serde(default)]
    pub custom_tickers: Option<Vec<String>>,

    /// Cap on instrument count, for quick-test runs.
    #[serde(default)]
    pub universe_limit: Option<usize>,

    /// ISO calendar date (YYYY-MM-DD), inclusive.
    pub start_date: String,

    /// ISO calendar date (YYYY-MM-DD), inclusive.
    pub end_date: String,

    /// Starting capital per instrument, > 0.
    #[serde(default = "default_capital")]
    pub initial_capital: f64,

    /// Fraction of available cash committed per entry, in (0, 1].
    #[serde(default = "default_position_size")]
    pub position_size: f64,

    /// Informational; a single long per instrument is enforced regardless.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Commission rate per side, in [0, 1).
    #[serde(default = "default_commission")]
    pub commission: f64,

    /// Slippage rate per fill, in [0, 1).
    #[serde(default = "default_slippage")]
    pub slippage: f64,

    /// Bar interval (only "1d" is meaningful to the bundled providers).
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_universe() -> String {
    "sp500".to_string()
}
fn default_capital() -> f64 {
    100_000.0
}
fn default_position_size() -> f64 {
    1.0
}
fn default_max_positions() -> usize {
    10
}
fn default_commission() -> f64 {
    0.001
}
fn default_slippage() -> f64 {
    0.0005
}
fn default_interval() -> String {
    "1d".to_string()
}

/// Parsed, validated date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BacktestConfig {
    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check bounds and parse the date range.
    pub fn validate(&self) -> Result<DateRange, ConfigError> {
        if self.strategy_source.trim().is_empty() {
            return Err(ConfigError::EmptyStrategy);
        }
        let start = parse_date("start_date", &self.start_date)?;
        let end = parse_date("end_date", &self.end_date)?;
        if start >= end {
            return Err(ConfigError::EmptyDateRange { start, end });
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ConfigError::CapitalNotPositive(self.initial_capital));
        }
        if !self.position_size.is_finite()
            || self.position_size <= 0.0
            || self.position_size > 1.0
        {
            return Err(ConfigError::PositionSizeOutOfRange(self.position_size));
        }
        for (name, value) in [("commission", self.commission), ("slippage", self.slippage)] {
            if !value.is_finite() || !(0.0..1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }
        if self.max_positions == 0 {
            return Err(ConfigError::MaxPositionsZero);
        }
        Ok(DateRange { start, end })
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("{field} must be a YYYY-MM-DD date, got '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("date range is empty: {start} .. {end}")]
    EmptyDateRange { start: NaiveDate, end: NaiveDate },

    #[error("initial_capital must be positive, got {0}")]
    CapitalNotPositive(f64),

    #[error("position_size must be in (0, 1], got {0}")]
    PositionSizeOutOfRange(f64),

    #[error("{name} must be in [0, 1), got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },

    #[error("max_positions must be at least 1")]
    MaxPositionsZero,

    #[error("strategy_source is empty")]
    EmptyStrategy,
}
