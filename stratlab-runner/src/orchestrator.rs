//! Parallel orchestration with streaming delivery.
//!
//! The orchestrator thread validates the strategy, resolves the universe,
//! loads bars, fans instrument simulations out over a private rayon pool, and
//! converts completions into `PROGRESS` events in arrival order. Both the
//! completion queue and the event channel are bounded, so a slow consumer
//! throttles the workers instead of growing memory. Dropping the event
//! receiver cancels the run: workers notice the flag at the next bar
//! boundary and no `COMPLETE` is emitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{error, info, warn};
use uuid::Uuid;

use stratlab_core::data::DataProvider;
use stratlab_core::domain::Bar;
use stratlab_core::sandbox;
use stratlab_core::sim::{simulate_ticker, CostModel, SimParams, TickerResult};

use crate::aggregate::aggregate;
use crate::config::BacktestConfig;
use crate::events::Event;
use crate::result::{BacktestResult, TickerFailure};

/// Hard upper bound on concurrent instrument simulations.
pub const DEFAULT_WORKERS: usize = 10;

/// Bounded buffer sizes for the event channel and the completion queue.
const EVENT_BUFFER: usize = 32;

pub struct Orchestrator {
    provider: Arc<dyn DataProvider>,
    workers: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider, workers: DEFAULT_WORKERS }
    }

    /// Override the worker bound (still capped by instrument count).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run a backtest, streaming events as instruments complete.
    ///
    /// Returns immediately; the stream ends with one `Complete` or `Error`.
    /// Dropping the receiver cancels the run.
    pub fn run_streaming(&self, config: BacktestConfig) -> Receiver<Event> {
        let (tx, rx) = sync_channel(EVENT_BUFFER);
        let provider = Arc::clone(&self.provider);
        let workers = self.workers;
        thread::Builder::new()
            .name("stratlab-orchestrator".into())
            .spawn(move || run_job(config, provider, workers, tx))
            .expect("failed to spawn orchestrator thread");
        rx
    }

    /// Run a backtest and return only the aggregate result.
    pub fn run(&self, config: BacktestConfig) -> BacktestResult {
        let rx = self.run_streaming(config);
        for event in rx {
            match event {
                Event::Complete { result } => return *result,
                Event::Error { message } => return BacktestResult::failure(message),
                _ => {}
            }
        }
        BacktestResult::failure("event stream closed unexpectedly")
    }
}

fn run_job(
    config: BacktestConfig,
    provider: Arc<dyn DataProvider>,
    workers: usize,
    tx: SyncSender<Event>,
) {
    let started = Instant::now();
    let job_id = Uuid::new_v4().to_string();

    let fail = |tx: &SyncSender<Event>, message: String| {
        error!("backtest {job_id} failed: {message}");
        let _ = tx.send(Event::Error { message });
    };

    // Everything below is synchronous validation: no worker starts until the
    // config, the strategy, and the universe are known-good.
    let range = match config.validate() {
        Ok(range) => range,
        Err(e) => return fail(&tx, format!("invalid config: {e}")),
    };

    let strategy = match sandbox::validate(&config.strategy_source) {
        Ok(s) => s,
        Err(e) => return fail(&tx, format!("strategy validation failed: {e}")),
    };

    let symbols: Vec<String> = match &config.custom_tickers {
        Some(custom) => {
            let take = config.universe_limit.unwrap_or(custom.len());
            custom.iter().take(take).cloned().collect()
        }
        None => match provider.load_universe(&config.universe) {
            Ok(universe) => universe.limited(config.universe_limit),
            Err(e) => return fail(&tx, format!("failed to resolve universe: {e}")),
        },
    };
    if symbols.is_empty() {
        return fail(&tx, "universe is empty".to_string());
    }

    info!("backtest {job_id}: {} tickers, {} .. {}", symbols.len(), range.start, range.end);
    if tx
        .send(Event::Init { total_tickers: symbols.len(), job_id: job_id.clone() })
        .is_err()
    {
        return;
    }

    if tx
        .send(Event::Loading { message: format!("loading bars for {} tickers", symbols.len()) })
        .is_err()
    {
        return;
    }

    let data: HashMap<String, Vec<Bar>> =
        match provider.load_bars(&symbols, range.start, range.end, &config.interval) {
            Ok(data) => data,
            Err(e) => return fail(&tx, format!("data load failed: {e}")),
        };

    // Symbols with no coverage are skipped, not fatal.
    let mut failures: Vec<TickerFailure> = symbols
        .iter()
        .filter(|s| !data.contains_key(*s) || data[*s].is_empty())
        .map(|s| TickerFailure { symbol: s.clone(), error: "no bar data".into() })
        .collect();

    let mut jobs: Vec<(String, Vec<Bar>)> =
        data.into_iter().filter(|(_, bars)| !bars.is_empty()).collect();
    if jobs.is_empty() {
        return fail(&tx, "no bar data loaded for any instrument".to_string());
    }
    jobs.sort_by(|a, b| a.0.cmp(&b.0));

    if tx
        .send(Event::Loading {
            message: format!("loaded {} of {} tickers", jobs.len(), symbols.len()),
        })
        .is_err()
    {
        return;
    }

    let total = jobs.len();
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers.min(total))
        .thread_name(|i| format!("stratlab-worker-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => return fail(&tx, format!("failed to build worker pool: {e}")),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let params = SimParams {
        initial_capital: config.initial_capital,
        position_size: config.position_size,
        cost: CostModel::new(config.commission, config.slippage),
    };

    let (done_tx, done_rx) = sync_channel::<TickerResult>(workers.min(total));
    for (symbol, bars) in jobs {
        let done_tx = done_tx.clone();
        let cancel = Arc::clone(&cancel);
        let strategy = strategy.clone();
        let params = params.clone();
        pool.spawn(move || {
            let result = simulate_ticker(&symbol, &bars, &strategy, &params, Some(&cancel));
            let _ = done_tx.send(result);
        });
    }
    drop(done_tx);

    let mut completed = 0usize;
    let mut successes: Vec<TickerResult> = Vec::with_capacity(total);
    for result in done_rx {
        completed += 1;
        if result.success {
            successes.push(result.clone());
        } else {
            warn!("{}: instrument failed: {:?}", result.symbol, result.error);
            failures.push(TickerFailure {
                symbol: result.symbol.clone(),
                error: result.error.clone().unwrap_or_else(|| "unknown error".into()),
            });
        }
        let event = Event::Progress {
            ticker: result.symbol.clone(),
            completed,
            total,
            percentage: completed as f64 / total as f64 * 100.0,
            ticker_result: result,
        };
        if tx.send(event).is_err() {
            // Consumer went away: cancel in-flight workers and bail without
            // a terminal event. The pool drop joins the workers.
            info!("backtest {job_id}: consumer dropped, cancelling");
            cancel.store(true, Ordering::Relaxed);
            return;
        }
    }

    let result = aggregate(&config, &successes, failures, started.elapsed().as_secs_f64());
    info!("backtest {job_id}: complete in {:.2}s", result.execution_time);
    let _ = tx.send(Event::Complete { result: Box::new(result) });
}
