//! The daily pipeline: one run per trading day.
//!
//! The caller validates universe margin metadata before constructing any
//! strategy; the run itself then proceeds in a fixed component order:
//! 1. Run-metadata write
//! 2. 300-day bar window load and price-snapshot update
//! 3. Execution-manager market-data feed
//! 4. Strategy ingestion and portfolio processing (aggregate, optimize,
//!    risk-scale)
//! 5. Per-strategy signal storage
//! 6. Day T-1 finalization per strategy (and for the aggregate book)
//! 7. Day-T position initialization at the T-1 close
//! 8. Per-strategy execution generation and storage
//! 9. Margin snapshot
//! 10. T-1 live-result and equity-curve update with the finalized PnL
//! 11. Day-T position, live-result and equity-curve writes
//! 12. CSV export and report delivery
//!
//! Every per-date write is delete-then-insert, so a re-run for a date is
//! byte-identical to a fresh run. A run either completes or returns an
//! error for the binary to turn into a non-zero exit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use daytrend_core::calendar::TradingCalendar;
use daytrend_core::domain::{to_f64, Bar, Position};
use daytrend_core::error::CoreError;
use daytrend_core::execution::ExecutionManager;
use daytrend_core::margin::MarginManager;
use daytrend_core::pnl::PnlManager;
use daytrend_core::portfolio::PortfolioManager;
use daytrend_core::prices::PriceManager;
use daytrend_core::registry::InstrumentRegistry;

use crate::config::ConfigError;
use crate::data_loader::MarketDataLoader;
use crate::report::{
    CsvExporter, CurrentPositionRecord, DailyReport, FinalizedPositionRecord, LogReportSink,
    ReportError, ReportSink,
};
use crate::results::{DayResultInputs, ResultsManager};
use crate::store::{LiveStore, RunMetadataRow, StoreError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
}

/// Pipeline-level settings derived from the run configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub portfolio_id: String,
    pub initial_capital: f64,
    /// Root of the per-portfolio CSV output tree.
    pub results_root: PathBuf,
    pub send_report: bool,
    /// Opaque JSON persisted with the run metadata.
    pub allocations: serde_json::Value,
    pub strategy_configs: serde_json::Value,
}

impl PipelineConfig {
    pub fn new(portfolio_id: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            initial_capital,
            results_root: Path::new("apps/strategies/results").to_path_buf(),
            send_report: false,
            allocations: serde_json::Value::Null,
            strategy_configs: serde_json::Value::Null,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub combined_strategy_id: String,
    pub active_positions: usize,
    pub executions: usize,
    pub daily_transaction_costs: f64,
    pub portfolio_value: f64,
    pub finalized_yesterday_pnl: Option<f64>,
    pub positions_csv: PathBuf,
    pub finalized_csv: Option<PathBuf>,
}

pub struct DailyRunner<'a, S: LiveStore> {
    store: &'a S,
    registry: Arc<InstrumentRegistry>,
    portfolio: PortfolioManager,
    calendar: TradingCalendar,
    execution: ExecutionManager,
    config: PipelineConfig,
    report_sink: Box<dyn ReportSink>,
}

impl<'a, S: LiveStore> DailyRunner<'a, S> {
    pub fn new(
        store: &'a S,
        registry: Arc<InstrumentRegistry>,
        portfolio: PortfolioManager,
        calendar: TradingCalendar,
        config: PipelineConfig,
    ) -> Self {
        let execution = ExecutionManager::new(registry.clone());
        Self {
            store,
            registry,
            portfolio,
            calendar,
            execution,
            config,
            report_sink: Box::new(LogReportSink),
        }
    }

    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.report_sink = sink;
        self
    }

    /// Execute the full daily cycle for `target_date`.
    ///
    /// `historical` marks an override-date replay: the bar window then ends
    /// at the previous trading day so the target's own close cannot leak
    /// into the T-1 snapshot.
    pub fn run(&mut self, target_date: NaiveDate, historical: bool) -> Result<RunSummary, RunError> {
        // Universe margin metadata was validated by the caller before any
        // strategy was constructed.
        let symbols: Vec<String> = self.registry.symbols().map(str::to_string).collect();

        let combined_id = self.portfolio.combined_id();
        let portfolio_id = self.config.portfolio_id.clone();
        let results = ResultsManager::new(self.store, &combined_id, &portfolio_id);
        info!(%combined_id, %target_date, historical, "starting daily run");

        let live_start = self.store.ensure_live_start_date(&combined_id, target_date)?;
        self.store.store_run_metadata(&RunMetadataRow {
            date: target_date,
            strategy_id: combined_id.clone(),
            portfolio_id: portfolio_id.clone(),
            allocations: self.config.allocations.clone(),
            portfolio_config: serde_json::json!({
                "total_capital": self.portfolio.config().total_capital,
                "reserve_fraction": self.portfolio.config().reserve_fraction,
                "use_optimization": self.portfolio.config().use_optimization,
                "use_risk_management": self.portfolio.config().use_risk_management,
            }),
            strategy_configs: self.config.strategy_configs.clone(),
        })?;

        // Market data window and price snapshots.
        let loader = MarketDataLoader::new(self.store, &self.calendar);
        let bars = loader.load_window(&symbols, target_date, historical)?;
        if bars.is_empty() {
            return Err(CoreError::data_not_found(format!(
                "no historical bars for {target_date} and the 300 days prior"
            ))
            .into());
        }
        let window_end = loader.window_end(target_date, historical);
        let mut prices = PriceManager::new();
        prices.update_from_bars(&bars, window_end)?;

        // Rolling volume/volatility for the cost model.
        for (symbol, (volume, close)) in latest_bars(&bars) {
            self.execution.update_market_data(&symbol, volume, close);
        }

        // Prior aggregate book, consumed by the optimizer and the first-day
        // rule.
        let previous_date = self.calendar.previous_trading_day(target_date);
        let prev_aggregate = results.load_positions(&combined_id, previous_date)?;
        let prior_map: BTreeMap<String, i64> = prev_aggregate
            .iter()
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect();

        self.portfolio.process_market_data(&bars, &prior_map)?;

        // Per-strategy signal storage.
        for (strategy_name, signals) in self.portfolio.strategy_signals() {
            results.save_signals(&strategy_name, target_date, &signals)?;
        }

        let t1_closes = prices.all_previous_day_prices().clone();
        let t2_closes = prices.all_two_days_ago_prices().clone();

        // Day T-1 finalization.
        let pnl = PnlManager::new(self.registry.clone());
        let strategy_positions = self.portfolio.strategy_positions().clone();
        let mut finalized_total = 0.0;
        let mut finalized_any = false;
        let mut finalized_records: Vec<FinalizedPositionRecord> = Vec::new();

        if t2_closes.is_empty() {
            warn!("T-2 closes unavailable (weekend/holiday boundary); skipping finalization");
        } else {
            for strategy_name in strategy_positions.keys() {
                let prev = results.load_positions(strategy_name, previous_date)?;
                if prev.is_empty() {
                    info!(strategy = %strategy_name, "no previous positions to finalize");
                    continue;
                }
                let capital = self
                    .portfolio
                    .strategy_capital(strategy_name)
                    .unwrap_or(self.config.initial_capital);
                let Some(outcome) =
                    pnl.finalize_previous_day(&prev, &t1_closes, &t2_closes, capital, 0.0)?
                else {
                    continue;
                };
                finalized_any = true;
                finalized_total += outcome.position_realized_pnl.values().sum::<f64>();
                results.save_positions(strategy_name, previous_date, &outcome.finalized_positions)?;
                for position in &outcome.finalized_positions {
                    let entry = t2_closes.get(&position.symbol).copied().unwrap_or(0.0);
                    let exit = t1_closes.get(&position.symbol).copied().unwrap_or(entry);
                    finalized_records.push(FinalizedPositionRecord {
                        date: previous_date,
                        strategy: strategy_name.clone(),
                        symbol: position.symbol.clone(),
                        quantity: position.quantity,
                        entry_price: entry,
                        exit_price: exit,
                        realized_pnl: position.realized_pnl,
                    });
                }
            }

            // The aggregate book finalizes too, so yesterday's rows are
            // consistent across both keyings.
            if !prev_aggregate.is_empty() {
                if let Some(outcome) = pnl.finalize_previous_day(
                    &prev_aggregate,
                    &t1_closes,
                    &t2_closes,
                    self.config.initial_capital,
                    0.0,
                )? {
                    results.save_positions(&combined_id, previous_date, &outcome.finalized_positions)?;
                }
            }
        }

        // Day-T aggregate positions, entered at the T-1 close with zero
        // placeholders.
        let day_positions =
            pnl.initialize_day_positions(self.portfolio.portfolio_positions(), &t1_closes, target_date)?;
        ResultsManager::<S>::check_position_limits(
            &day_positions,
            self.portfolio.config().position_limit,
        )?;

        // Per-strategy executions against yesterday's per-strategy books.
        let execution_time = ResultsManager::<S>::execution_time(target_date);
        let mut total_costs = 0.0;
        let mut execution_count = 0usize;
        for (strategy_name, current) in &strategy_positions {
            let prev_map: BTreeMap<String, i64> = results
                .load_positions(strategy_name, previous_date)?
                .into_iter()
                .map(|p| (p.symbol, p.quantity))
                .collect();
            let reports = self.execution.generate_daily_executions(
                strategy_name,
                &portfolio_id,
                current,
                &prev_map,
                &t1_closes,
                target_date,
                execution_time,
            )?;
            total_costs += reports
                .iter()
                .map(|r| r.total_transaction_costs)
                .sum::<f64>();
            execution_count += reports.len();
            results.save_executions(strategy_name, target_date, &reports)?;
        }
        info!(execution_count, total_costs, "generated daily executions");

        // Margin snapshot at T-1 closes.
        let margin = MarginManager::new(self.registry.clone());
        let margin_metrics = margin.calculate(self.portfolio.portfolio_positions(), &t1_closes)?;

        // First trading day: nothing to finalize, the T-1 row stays alone.
        let is_first_day = prev_aggregate.iter().all(|p| p.quantity == 0);

        let mut finalized_value = None;
        if !t2_closes.is_empty() && finalized_any && finalized_total != 0.0 && !is_first_day {
            finalized_value = results.update_finalized_previous_day(
                previous_date,
                finalized_total,
                self.config.initial_capital,
                &self.calendar,
                live_start,
            )?;
        } else if is_first_day {
            info!("first trading day; skipping T-1 result update");
        }

        // Day-T aggregates build on the freshly finalized T-1 cumulatives.
        let (prev_value, prev_total_pnl, prev_total_costs) = self
            .store
            .previous_aggregates(&combined_id, &portfolio_id, target_date)?
            .map(|(v, p, c)| (to_f64(v), to_f64(p), to_f64(c)))
            .unwrap_or((self.config.initial_capital, 0.0, 0.0));
        let portfolio_value_today = prev_value - total_costs;
        margin.warn_on_equity_thresholds(&margin_metrics, portfolio_value_today);

        // Persist day-T positions: per-strategy rows, then the aggregate.
        for (strategy_name, current) in &strategy_positions {
            let rows = pnl.initialize_day_positions(current, &t1_closes, target_date)?;
            results.save_positions(strategy_name, target_date, &rows)?;
        }
        results.save_positions(&combined_id, target_date, &day_positions)?;

        let trading_days = self.calendar.trading_days_between(live_start, target_date);
        let day_row = results.save_day_result(&DayResultInputs {
            date: target_date,
            daily_transaction_costs: total_costs,
            previous_portfolio_value: prev_value,
            previous_total_pnl: prev_total_pnl,
            previous_total_transaction_costs: prev_total_costs,
            initial_capital: self.config.initial_capital,
            trading_days,
            gross_notional: margin_metrics.gross_notional,
            net_notional: margin_metrics.net_notional,
            margin_posted: margin_metrics.total_posted_margin,
            margin_cushion: margin_metrics.margin_cushion(portfolio_value_today),
            equity_to_margin_ratio: margin_metrics.equity_to_margin_ratio(),
            active_positions: margin_metrics.active_positions,
        })?;

        if let Some(risk) = self.portfolio.risk_result() {
            info!(
                volatility = risk.portfolio_var,
                gross_leverage = risk.gross_leverage,
                net_leverage = risk.net_leverage,
                max_correlation = risk.correlation_risk,
                jump_risk = risk.jump_risk,
                risk_scale = risk.recommended_scale,
                "portfolio risk snapshot"
            );
        }

        // CSV exports.
        let exporter = CsvExporter::new(self.config.results_root.join(&portfolio_id))?;
        let signals = self.portfolio.strategy_signals();
        let mut current_records = Vec::new();
        for (strategy_name, positions) in &strategy_positions {
            for (symbol, quantity) in positions {
                let price = t1_closes.get(symbol).copied().unwrap_or(0.0);
                let multiplier = self.registry.multiplier(symbol)?;
                current_records.push(CurrentPositionRecord {
                    date: target_date,
                    strategy: strategy_name.clone(),
                    symbol: symbol.clone(),
                    quantity: *quantity,
                    market_price: price,
                    notional: *quantity as f64 * price * multiplier,
                    forecast: signals
                        .get(strategy_name)
                        .and_then(|s| s.get(symbol))
                        .copied()
                        .unwrap_or(0.0),
                });
            }
        }
        let positions_csv = exporter.export_current_positions(target_date, &current_records)?;
        let finalized_csv = if finalized_records.is_empty() {
            None
        } else {
            Some(exporter.export_finalized_positions(previous_date, &finalized_records)?)
        };

        let summary = RunSummary {
            date: target_date,
            combined_strategy_id: combined_id.clone(),
            active_positions: margin_metrics.active_positions,
            executions: execution_count,
            daily_transaction_costs: total_costs,
            portfolio_value: to_f64(day_row.current_portfolio_value),
            finalized_yesterday_pnl: finalized_value.map(|_| finalized_total),
            positions_csv,
            finalized_csv,
        };

        if self.config.send_report {
            self.report_sink.deliver(&DailyReport {
                date: summary.date,
                strategy_id: combined_id,
                portfolio_id,
                portfolio_value: summary.portfolio_value,
                daily_pnl: to_f64(day_row.daily_pnl),
                daily_transaction_costs: total_costs,
                finalized_yesterday_pnl: summary.finalized_yesterday_pnl,
                active_positions: summary.active_positions,
                attachments: std::iter::once(summary.positions_csv.clone())
                    .chain(summary.finalized_csv.clone())
                    .collect(),
            })?;
        }

        info!(
            date = %target_date,
            positions = summary.active_positions,
            executions = summary.executions,
            portfolio_value = summary.portfolio_value,
            "daily run complete"
        );
        Ok(summary)
    }

    pub fn portfolio(&self) -> &PortfolioManager {
        &self.portfolio
    }
}

/// Latest (volume, close) per symbol from the window.
fn latest_bars(bars: &[Bar]) -> BTreeMap<String, (f64, f64)> {
    let mut latest: BTreeMap<String, &Bar> = BTreeMap::new();
    for bar in bars {
        match latest.get(&bar.symbol) {
            Some(existing) if existing.date >= bar.date => {}
            _ => {
                latest.insert(bar.symbol.clone(), bar);
            }
        }
    }
    latest
        .into_iter()
        .map(|(symbol, bar)| (symbol, (bar.volume as f64, bar.close)))
        .collect()
}

/// Positions loaded back from rows, as the engine map form.
pub fn positions_as_map(positions: &[Position]) -> BTreeMap<String, i64> {
    positions
        .iter()
        .map(|p| (p.symbol.clone(), p.quantity))
        .collect()
}
