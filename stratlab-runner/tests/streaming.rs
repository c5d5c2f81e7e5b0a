//! Orchestrator protocol and aggregation tests over a fixture provider.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use stratlab_core::data::{DataError, DataProvider, Universe};
use stratlab_core::domain::{Bar, ExitReason};
use stratlab_runner::{BacktestConfig, Event, Orchestrator};

/// Serves a fixed bar map; symbols not in the map have no coverage.
struct FixtureProvider {
    data: HashMap<String, Vec<Bar>>,
}

impl FixtureProvider {
    fn new(data: HashMap<String, Vec<Bar>>) -> Arc<Self> {
        Arc::new(Self { data })
    }
}

impl DataProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn load_universe(&self, id: &str) -> Result<Universe, DataError> {
        match id {
            "fixture" => Ok(Universe::new("fixture", self.data.keys().cloned().collect())),
            other => Err(DataError::UnknownUniverse { id: other.to_string() }),
        }
    }

    fn load_bars(
        &self,
        symbols: &[String],
        _start: NaiveDate,
        _end: NaiveDate,
        _interval: &str,
    ) -> Result<HashMap<String, Vec<Bar>>, DataError> {
        Ok(symbols
            .iter()
            .filter_map(|s| self.data.get(s).map(|bars| (s.clone(), bars.clone())))
            .collect())
    }
}

fn closes_to_bars(closes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2020, 1, 2, 21, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(start + Duration::days(i as i64), c, c, c, c, 1000.0))
        .collect()
}

const BUY_AND_HOLD: &str = r#"
fn decide(window, state) {
    if state["bought"] == nil {
        state["bought"] = true;
        return { signal: "buy" };
    }
    return { signal: "none" };
}
"#;

fn config(tickers: &[&str]) -> BacktestConfig {
    let mut config = BacktestConfig::from_toml(
        r#"
start_date = "2020-01-01"
end_date = "2020-02-01"
initial_capital = 100.0
position_size = 1.0
commission = 0.0
slippage = 0.0
"#,
    )
    .unwrap();
    config.strategy_source = BUY_AND_HOLD.to_string();
    config.custom_tickers = Some(tickers.iter().map(|s| s.to_string()).collect());
    config
}

fn three_ticker_provider() -> Arc<FixtureProvider> {
    let mut data = HashMap::new();
    data.insert("AAA".to_string(), closes_to_bars(&[100.0, 110.0, 121.0]));
    data.insert("BBB".to_string(), closes_to_bars(&[50.0, 55.0, 60.0, 66.0]));
    data.insert("CCC".to_string(), closes_to_bars(&[20.0, 19.0, 18.0]));
    FixtureProvider::new(data)
}

#[test]
fn stream_follows_the_protocol() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let events: Vec<Event> = orchestrator
        .run_streaming(config(&["AAA", "BBB", "CCC"]))
        .iter()
        .collect();

    // Exactly one INIT, first.
    assert!(matches!(events[0], Event::Init { total_tickers: 3, .. }));
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Init { .. })).count(),
        1
    );

    // PROGRESS completed values are 1..=3 with no gaps, in order.
    let progress: Vec<(usize, usize, String)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { completed, total, ticker, .. } => {
                Some((*completed, *total, ticker.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    for (i, (completed, total, _)) in progress.iter().enumerate() {
        assert_eq!(*completed, i + 1);
        assert_eq!(*total, 3);
    }
    let mut tickers: Vec<&str> = progress.iter().map(|(_, _, t)| t.as_str()).collect();
    tickers.sort_unstable();
    assert_eq!(tickers, vec!["AAA", "BBB", "CCC"]);

    // Exactly one terminal COMPLETE, last.
    assert!(matches!(events.last(), Some(Event::Complete { .. })));
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Complete { .. })).count(),
        1
    );
    assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
}

#[test]
fn buy_and_hold_single_instrument_metrics() {
    let mut data = HashMap::new();
    data.insert("AAA".to_string(), closes_to_bars(&[100.0, 110.0, 121.0]));
    let orchestrator = Orchestrator::new(FixtureProvider::new(data));

    let result = orchestrator.run(config(&["AAA"]));
    assert!(result.success, "message: {:?}", result.message);

    let metrics = result.metrics.unwrap();
    assert!((metrics.final_equity - 121.0).abs() < 1e-9);
    assert!((metrics.total_return - 21.0).abs() < 1e-9);
    assert!((metrics.total_return_percent - 21.0).abs() < 1e-9);
    assert_eq!(metrics.total_trades, 1);

    assert_eq!(result.sample_trades.len(), 1);
    assert_eq!(result.sample_trades[0].exit_reason, ExitReason::EndOfData);
    assert!((result.sample_trades[0].pnl - 21.0).abs() < 1e-9);
}

#[test]
fn instrument_without_data_is_skipped_not_fatal() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let events: Vec<Event> = orchestrator
        .run_streaming(config(&["AAA", "ZZZ"]))
        .iter()
        .collect();

    // ZZZ never simulates: one progress event for AAA only.
    let progress_count = events
        .iter()
        .filter(|e| matches!(e, Event::Progress { .. }))
        .count();
    assert_eq!(progress_count, 1);

    let Some(Event::Complete { result }) = events.last() else {
        panic!("expected COMPLETE, got {:?}", events.last());
    };
    assert!(result.success);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].symbol, "ZZZ");
    assert_eq!(result.failures[0].error, "no bar data");
}

#[test]
fn corrupt_instrument_fails_but_backtest_continues() {
    let mut bad_bars = closes_to_bars(&[10.0, 11.0, 12.0]);
    bad_bars[1].close = f64::NAN;
    let mut data = HashMap::new();
    data.insert("GOOD".to_string(), closes_to_bars(&[100.0, 110.0, 121.0]));
    data.insert("BAD".to_string(), bad_bars);
    let orchestrator = Orchestrator::new(FixtureProvider::new(data));

    let events: Vec<Event> = orchestrator
        .run_streaming(config(&["GOOD", "BAD"]))
        .iter()
        .collect();

    // Both instruments produce PROGRESS; BAD's result is unsuccessful.
    let bad_progress = events.iter().find_map(|e| match e {
        Event::Progress { ticker, ticker_result, .. } if ticker == "BAD" => Some(ticker_result),
        _ => None,
    });
    assert!(!bad_progress.unwrap().success);

    let Some(Event::Complete { result }) = events.last() else {
        panic!("expected COMPLETE");
    };
    assert!(result.success);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].symbol, "BAD");
    // Aggregation only covers the good instrument.
    assert_eq!(result.ticker_performance.len(), 1);
    assert_eq!(result.ticker_performance[0].symbol, "GOOD");
}

#[test]
fn whole_universe_without_data_is_terminal_error() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let events: Vec<Event> = orchestrator
        .run_streaming(config(&["NOPE", "NADA"]))
        .iter()
        .collect();

    assert!(matches!(events.last(), Some(Event::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::Complete { .. })));
}

#[test]
fn invalid_strategy_errors_before_init() {
    let mut config = config(&["AAA"]);
    config.strategy_source = "fn decide(window) { return nil; }".into();
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let events: Vec<Event> = orchestrator.run_streaming(config).iter().collect();

    assert_eq!(events.len(), 1);
    let Event::Error { message } = &events[0] else {
        panic!("expected ERROR, got {:?}", events[0]);
    };
    assert!(message.contains("strategy validation failed"));
}

#[test]
fn invalid_config_errors_before_init() {
    let mut config = config(&["AAA"]);
    config.commission = 2.0;
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let events: Vec<Event> = orchestrator.run_streaming(config).iter().collect();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error { message } if message.contains("invalid config")));
}

#[test]
fn universe_resolution_and_limit() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let mut config = config(&[]);
    config.custom_tickers = None;
    config.universe = "fixture".into();
    config.universe_limit = Some(2);

    let events: Vec<Event> = orchestrator.run_streaming(config).iter().collect();
    assert!(matches!(events[0], Event::Init { total_tickers: 2, .. }));
    let Some(Event::Complete { result }) = events.last() else {
        panic!("expected COMPLETE");
    };
    // Deterministic order: AAA and BBB are the first two.
    let mut symbols: Vec<&str> =
        result.ticker_performance.iter().map(|p| p.symbol.as_str()).collect();
    symbols.sort_unstable();
    assert_eq!(symbols, vec!["AAA", "BBB"]);
}

#[test]
fn unknown_universe_is_an_error_event() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let mut config = config(&[]);
    config.custom_tickers = None;
    config.universe = "galactic500".into();

    let events: Vec<Event> = orchestrator.run_streaming(config).iter().collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error { message } if message.contains("universe")));
}

#[test]
fn blocking_run_matches_streamed_complete() {
    let orchestrator = Orchestrator::new(three_ticker_provider());

    let streamed = orchestrator
        .run_streaming(config(&["AAA", "BBB", "CCC"]))
        .iter()
        .find_map(|e| match e {
            Event::Complete { result } => Some(*result),
            _ => None,
        })
        .expect("stream must complete");

    let blocking = orchestrator.run(config(&["AAA", "BBB", "CCC"]));

    let sm = streamed.metrics.unwrap();
    let bm = blocking.metrics.unwrap();
    assert_eq!(sm.final_equity, bm.final_equity);
    assert_eq!(sm.total_trades, bm.total_trades);
    assert_eq!(sm.sharpe_ratio, bm.sharpe_ratio);
    assert_eq!(streamed.equity_curve, blocking.equity_curve);
}

#[test]
fn rerun_is_bit_identical() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let a = orchestrator.run(config(&["AAA", "BBB", "CCC"]));
    let b = orchestrator.run(config(&["AAA", "BBB", "CCC"]));

    let am = a.metrics.unwrap();
    let bm = b.metrics.unwrap();
    assert_eq!(am.final_equity, bm.final_equity);
    assert_eq!(am.total_return, bm.total_return);
    assert_eq!(am.cagr, bm.cagr);
    assert_eq!(am.sharpe_ratio, bm.sharpe_ratio);
    assert_eq!(am.max_drawdown, bm.max_drawdown);
    assert_eq!(am.total_trades, bm.total_trades);
    assert_eq!(a.equity_curve, b.equity_curve);
}

#[test]
fn dropping_the_receiver_cancels_quietly() {
    let orchestrator = Orchestrator::new(three_ticker_provider());
    let rx = orchestrator.run_streaming(config(&["AAA", "BBB", "CCC"]));
    // Read INIT, then walk away mid-stream.
    let first = rx.recv().unwrap();
    assert!(matches!(first, Event::Init { .. }));
    drop(rx);
    // Nothing to observe from here: the orchestrator notices the closed
    // channel at its next send and stops without panicking.
}

#[test]
fn single_worker_still_completes() {
    let orchestrator = Orchestrator::new(three_ticker_provider()).with_workers(1);
    let result = orchestrator.run(config(&["AAA", "BBB", "CCC"]));
    assert!(result.success);
    assert_eq!(result.ticker_performance.len(), 3);
}
