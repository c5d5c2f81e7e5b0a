//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over bar sources (network feeds, on-disk
//! caches, synthetic generators) so the orchestrator can be tested without a
//! live collaborator. Caching and TTL policy belong to implementations, not
//! the core.

use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::universe::Universe;
use crate::domain::Bar;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("unknown universe: {id}")]
    UnknownUniverse { id: String },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("data error: {0}")]
    Other(String),
}

/// Trait for historical bar sources.
///
/// `load_bars` may return partial coverage: a symbol that is absent from the
/// returned map (or maps to an empty series) is a skipped instrument, not an
/// error.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Resolve a universe id into its symbol set.
    fn load_universe(&self, id: &str) -> Result<Universe, DataError>;

    /// Fetch daily bars for each symbol over a date range.
    fn load_bars(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
    ) -> Result<HashMap<String, Vec<Bar>>, DataError>;
}
