//! # Stratlab Runner
//!
//! Orchestration layer for the backtester.
//!
//! ## Components
//!
//! - `BacktestConfig`: run configuration with validation and TOML loading
//! - `Orchestrator`: bounded-parallelism execution with streaming events
//! - `Event`: the INIT / LOADING / PROGRESS / COMPLETE / ERROR protocol,
//!   with server-sent-events encoding
//! - `BacktestResult` / `BacktestMetrics`: aggregate output
//! - `aggregate`: portfolio equity curve and metric assembly

pub mod aggregate;
pub mod config;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod result;

pub use config::{BacktestConfig, ConfigError, DateRange};
pub use events::{encode_sse, Event};
pub use metrics::BacktestMetrics;
pub use orchestrator::{Orchestrator, DEFAULT_WORKERS};
pub use result::{BacktestResult, TickerFailure, TickerPerformance};
