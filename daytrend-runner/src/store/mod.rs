//! The relational store seam.
//!
//! `LiveStore` is the interface the daily pipeline consumes; the production
//! driver lives in `sqlite.rs`. Logical schemas `trading` and `futures_data`
//! map onto table-name prefixes. Every per-date write path is
//! delete-then-insert, so a re-run for a date leaves the store in the same
//! end-state as a fresh run regardless of partial prior state.
//!
//! Rows carry `strategy_id` (always the combined id), `strategy_name` (the
//! individual id for per-strategy rows, the combined id for aggregate rows)
//! and `portfolio_id`. Zero-quantity positions are never written.

pub mod sqlite;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use daytrend_core::domain::{Bar, Instrument};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Other(String),
}

/// A persisted position snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub strategy_id: String,
    pub strategy_name: String,
    pub portfolio_id: String,
    pub symbol: String,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

/// A persisted execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRow {
    pub order_id: String,
    pub strategy_id: String,
    pub strategy_name: String,
    pub portfolio_id: String,
    pub symbol: String,
    pub side: String,
    pub filled_quantity: Decimal,
    pub fill_price: Decimal,
    pub commission: Decimal,
    pub total_transaction_costs: Decimal,
    pub execution_time: NaiveDateTime,
    pub date: NaiveDate,
}

/// A persisted forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub strategy_id: String,
    pub strategy_name: String,
    pub portfolio_id: String,
    pub symbol: String,
    pub date: NaiveDate,
    pub forecast: f64,
}

/// The per-day aggregate result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResultRow {
    pub strategy_id: String,
    pub portfolio_id: String,
    pub date: NaiveDate,
    pub daily_pnl: Decimal,
    pub daily_realized_pnl: Decimal,
    pub daily_unrealized_pnl: Decimal,
    pub daily_transaction_costs: Decimal,
    /// Percent.
    pub daily_return: f64,
    pub total_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_transaction_costs: Decimal,
    /// Percent.
    pub total_cumulative_return: f64,
    /// Percent.
    pub total_annualized_return: f64,
    pub current_portfolio_value: Decimal,
    pub portfolio_leverage: f64,
    pub equity_to_margin_ratio: f64,
    pub margin_cushion: f64,
    pub gross_notional: Decimal,
    pub net_notional: Decimal,
    pub margin_posted: Decimal,
    pub cash_available: Decimal,
    pub active_positions: i64,
}

/// One equity-curve point; at most one per calendar day, rewritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub strategy_id: String,
    pub portfolio_id: String,
    pub date: NaiveDate,
    pub equity: Decimal,
}

/// Run metadata recorded at the start of each daily run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadataRow {
    pub date: NaiveDate,
    pub strategy_id: String,
    pub portfolio_id: String,
    pub allocations: serde_json::Value,
    pub portfolio_config: serde_json::Value,
    pub strategy_configs: serde_json::Value,
}

/// The interface the daily pipeline consumes from the relational store.
pub trait LiveStore {
    // ── futures_data schema ─────────────────────────────────────────
    fn load_instruments(&self) -> Result<Vec<Instrument>, StoreError>;
    fn insert_instruments(&self, instruments: &[Instrument]) -> Result<(), StoreError>;
    fn insert_bars(&self, bars: &[Bar]) -> Result<(), StoreError>;
    fn load_bars(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, StoreError>;

    // ── trading.positions ───────────────────────────────────────────
    fn delete_positions(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn store_positions(&self, rows: &[PositionRow]) -> Result<(), StoreError>;
    fn load_positions(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<PositionRow>, StoreError>;

    // ── trading.executions ──────────────────────────────────────────
    fn delete_executions_by_order_ids(
        &self,
        order_ids: &[String],
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn store_executions(&self, rows: &[ExecutionRow]) -> Result<(), StoreError>;
    fn load_executions(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ExecutionRow>, StoreError>;

    // ── trading.signals ─────────────────────────────────────────────
    fn delete_signals(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn store_signals(&self, rows: &[SignalRow]) -> Result<(), StoreError>;
    fn load_signals(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<SignalRow>, StoreError>;

    // ── trading.live_results ────────────────────────────────────────
    fn delete_live_result(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn store_live_result(&self, row: &LiveResultRow) -> Result<(), StoreError>;
    fn load_live_result(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<LiveResultRow>, StoreError>;
    /// Latest row strictly before `date`: (portfolio value, total PnL,
    /// total transaction costs).
    fn previous_aggregates(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(Decimal, Decimal, Decimal)>, StoreError>;

    // ── trading.equity_curve ────────────────────────────────────────
    fn delete_equity_point(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn store_equity_point(&self, point: &EquityPoint) -> Result<(), StoreError>;
    fn load_equity_point(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<EquityPoint>, StoreError>;

    // ── trading.live_run_metadata ───────────────────────────────────
    fn store_run_metadata(&self, row: &RunMetadataRow) -> Result<(), StoreError>;

    // ── trading.strategy_trading_days_metadata ──────────────────────
    /// Record the live-start date for a combined id on first sight and
    /// return the effective value.
    fn ensure_live_start_date(
        &self,
        strategy_id: &str,
        date: NaiveDate,
    ) -> Result<NaiveDate, StoreError>;
    fn live_start_date(&self, strategy_id: &str) -> Result<Option<NaiveDate>, StoreError>;
}
