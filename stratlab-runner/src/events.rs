//! Streaming event protocol and its wire encoding.
//!
//! A stream is exactly: one `init`, zero or more `loading`, one `progress`
//! per completed instrument in completion order, then one `complete` or one
//! `error`. Each event serializes to a single-line JSON object; [`encode_sse`]
//! adds server-sent-events framing.

use serde::{Deserialize, Serialize};

use stratlab_core::sim::TickerResult;

use crate::result::BacktestResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Init {
        total_tickers: usize,
        job_id: String,
    },
    Loading {
        message: String,
    },
    Progress {
        ticker: String,
        /// Monotonic 1..=total across the stream.
        completed: usize,
        total: usize,
        percentage: f64,
        ticker_result: TickerResult,
    },
    Complete {
        result: Box<BacktestResult>,
    },
    Error {
        message: String,
    },
}

/// Encode one event as a server-sent-events frame:
/// `data: {json}\n\n`.
pub fn encode_sse(event: &Event) -> serde_json::Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let event = Event::Init { total_tickers: 3, job_id: "abc".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"init\""));
        assert!(json.contains("\"total_tickers\":3"));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Event::Init { total_tickers: 3, .. }));
    }

    #[test]
    fn sse_framing() {
        let event = Event::Loading { message: "loading bars".into() };
        let frame = encode_sse(&event).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        // Single line of payload.
        assert_eq!(frame.trim_end().lines().count(), 1);
    }

    #[test]
    fn progress_carries_ticker_result() {
        let event = Event::Progress {
            ticker: "AAPL".into(),
            completed: 1,
            total: 2,
            percentage: 50.0,
            ticker_result: TickerResult::failed("AAPL", "no bar data"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"success\":false"));
    }

    #[test]
    fn error_event_shape() {
        let frame = encode_sse(&Event::Error { message: "boom".into() }).unwrap();
        assert!(frame.contains("\"type\":\"error\""));
        assert!(frame.contains("\"message\":\"boom\""));
    }
}
