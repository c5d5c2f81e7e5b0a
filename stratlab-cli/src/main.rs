//! Stratlab CLI — run backtests from a TOML config and a strategy script.
//!
//! Commands:
//! - `run` — execute a backtest (aggregate summary, full JSON, or SSE stream)
//! - `validate` — check a strategy script without running anything
//! - `template` — print a starting-point strategy script

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use stratlab_core::data::SyntheticProvider;
use stratlab_core::sandbox;
use stratlab_runner::{encode_sse, BacktestConfig, BacktestResult, Orchestrator};

#[derive(Parser)]
#[command(name = "stratlab")]
#[command(about = "Backtest trading strategies over daily bars")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest from a TOML config file
    Run {
        /// Path to the run configuration (TOML)
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
        /// Strategy script file; overrides strategy_source in the config
        #[arg(long, value_name = "PATH")]
        strategy: Option<PathBuf>,
        /// Emit the event stream as server-sent-events frames
        #[arg(long)]
        stream: bool,
        /// Print the full result as JSON instead of a summary
        #[arg(long)]
        json: bool,
        /// Seed for the synthetic data provider
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Validate a strategy script
    Validate {
        /// Strategy script file
        #[arg(value_name = "PATH")]
        strategy: PathBuf,
    },
    /// Print a starting-point strategy script
    Template,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, strategy, stream, json, seed } => {
            run(config, strategy, stream, json, seed)
        }
        Commands::Validate { strategy } => validate(strategy),
        Commands::Template => {
            print!("{}", sandbox::strategy_template());
            Ok(())
        }
    }
}

fn run(
    config_path: PathBuf,
    strategy_path: Option<PathBuf>,
    stream: bool,
    json: bool,
    seed: u64,
) -> Result<()> {
    let toml_str = fs::read_to_string(&config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let mut config = BacktestConfig::from_toml(&toml_str)?;

    if let Some(path) = strategy_path {
        config.strategy_source = fs::read_to_string(&path)
            .with_context(|| format!("reading strategy {}", path.display()))?;
    }

    let orchestrator = Orchestrator::new(Arc::new(SyntheticProvider::new(seed)));

    if stream {
        for event in orchestrator.run_streaming(config) {
            print!("{}", encode_sse(&event)?);
        }
        return Ok(());
    }

    let result = orchestrator.run(config);
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    if result.success {
        Ok(())
    } else {
        anyhow::bail!(result.message.unwrap_or_else(|| "backtest failed".into()))
    }
}

fn validate(strategy_path: PathBuf) -> Result<()> {
    let source = fs::read_to_string(&strategy_path)
        .with_context(|| format!("reading strategy {}", strategy_path.display()))?;
    match sandbox::validate(&source) {
        Ok(_) => {
            println!("OK: strategy is valid");
            Ok(())
        }
        Err(e) => anyhow::bail!("invalid strategy: {e}"),
    }
}

fn print_summary(result: &BacktestResult) {
    if !result.success {
        println!(
            "Backtest failed: {}",
            result.message.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    info!("run finished in {:.2}s", result.execution_time);
    let Some(m) = &result.metrics else {
        println!("No metrics produced");
        return;
    };

    println!("Backtest {} .. {}", m.start_date, m.end_date);
    println!(
        "  Final equity     {:>14.2}  ({:+.2}%)",
        m.final_equity, m.total_return_percent
    );
    println!("  CAGR             {:>13.2}%", m.cagr * 100.0);
    println!("  Volatility       {:>13.2}%", m.volatility);
    println!("  Sharpe           {:>14.2}", m.sharpe_ratio);
    println!("  Sortino          {:>14.2}", m.sortino_ratio);
    println!(
        "  Max drawdown     {:>14.2}  ({:.2}%)",
        m.max_drawdown, m.max_drawdown_percent
    );
    println!(
        "  Trades           {:>14}  (win rate {:.1}%)",
        m.total_trades,
        m.win_rate * 100.0
    );
    println!("  Profit factor    {:>14.2}", m.profit_factor);

    if !result.top_performers.is_empty() {
        println!("  Top performers:");
        for p in result.top_performers.iter().take(5) {
            println!("    {:<8} {:>12.2}", p.symbol, p.summary.total_pnl);
        }
    }
    if !result.failures.is_empty() {
        println!("  Skipped/failed instruments: {}", result.failures.len());
    }
}
