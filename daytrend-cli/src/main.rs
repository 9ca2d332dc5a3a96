//! live_portfolio — the once-per-day position generation run.
//!
//! `live_portfolio [YYYY-MM-DD] [--send-email]`
//!
//! A positional date replays a historical day; live runs (no date) default
//! to sending the daily report, historical runs default to not sending it.
//! Exit code 0 on success, 1 on any configuration, data, computation, or
//! store failure, with a single-line stderr summary alongside the
//! structured log.

use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use daytrend_core::calendar::TradingCalendar;
use daytrend_core::portfolio::{PortfolioConfig, PortfolioManager};
use daytrend_core::registry::InstrumentRegistry;
use daytrend_core::strategy::TrendStrategy;
use daytrend_runner::config::LiveConfig;
use daytrend_runner::pipeline::{DailyRunner, PipelineConfig};
use daytrend_runner::store::{LiveStore, SqliteStore};

const CONFIG_PATH: &str = "./config.json";

#[derive(Debug, Parser)]
#[command(name = "live_portfolio", about = "Daily futures position generation")]
struct Cli {
    /// Historical override date (YYYY-MM-DD); defaults to today.
    date: Option<NaiveDate>,

    /// Force the daily report on (historical runs default it off).
    #[arg(long)]
    send_email: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "daily run failed");
            eprintln!("live_portfolio: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let historical = cli.date.is_some();
    let target_date = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let send_report = cli.send_email || !historical;

    let config = LiveConfig::load(CONFIG_PATH)
        .with_context(|| format!("loading {CONFIG_PATH}"))?;

    let store = SqliteStore::open(format!("{}.db", config.database.name))
        .context("opening results store")?;

    let instruments = store.load_instruments().context("loading instrument catalog")?;
    if instruments.is_empty() {
        bail!("instrument catalog is empty; seed futures_data_contract_specs first");
    }
    let registry = InstrumentRegistry::shared(instruments)?;

    // Margin metadata must hold up for the whole universe before any
    // strategy is constructed; a bad contract aborts the run here.
    let symbols: Vec<String> = registry.symbols().map(str::to_string).collect();
    registry.validate_universe(&symbols)?;

    // Build the portfolio from enabled strategies with normalized
    // allocations.
    let allocations = config.normalized_allocations()?;
    let mut portfolio_config = PortfolioConfig::new(config.initial_capital);
    portfolio_config.use_optimization = true;
    portfolio_config.use_risk_management = true;
    let mut portfolio = PortfolioManager::new(portfolio_config, registry.clone());

    for (id, def) in config.enabled_strategies() {
        let (variant, trend_config) = def.trend_config()?;
        let allocation = allocations[id];
        info!(strategy = %id, ?variant, allocation, "adding strategy");
        let strategy = TrendStrategy::new(
            id.clone(),
            variant,
            trend_config,
            config.initial_capital * allocation,
            registry.clone(),
        );
        portfolio.add_strategy(Box::new(strategy), allocation)?;
    }

    let mut pipeline_config = PipelineConfig::new(&config.portfolio_id, config.initial_capital);
    pipeline_config.send_report = send_report;
    pipeline_config.allocations = serde_json::to_value(&allocations)?;
    pipeline_config.strategy_configs = config.strategy_configs_json();

    let mut runner = DailyRunner::new(
        &store,
        registry,
        portfolio,
        TradingCalendar::new(),
        pipeline_config,
    );
    let summary = runner.run(target_date, historical)?;

    info!(
        date = %summary.date,
        strategy = %summary.combined_strategy_id,
        positions = summary.active_positions,
        executions = summary.executions,
        portfolio_value = summary.portfolio_value,
        positions_csv = %summary.positions_csv.display(),
        "run complete"
    );
    Ok(())
}
