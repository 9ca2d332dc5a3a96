//! ResultsManager — idempotent persistence of the daily snapshot.
//!
//! Every write is delete-then-insert keyed by date, so re-running a day
//! replaces its rows exactly. The T-1 update pass recomputes yesterday's
//! cumulatives from the day-before row once the finalized PnL is known,
//! preserving previously stored margin metrics unless they are missing or
//! zero (they were computed correctly when that day originally ran).

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::{info, warn};

use daytrend_core::calendar::{annualized_return_pct, TradingCalendar};
use daytrend_core::domain::{to_f64, to_stored, ExecutionReport, Position};
use daytrend_core::error::CoreError;

use crate::metrics;
use crate::store::{
    EquityPoint, ExecutionRow, LiveResultRow, LiveStore, PositionRow, SignalRow, StoreError,
};

pub struct ResultsManager<'a, S: LiveStore> {
    store: &'a S,
    strategy_id: String,
    portfolio_id: String,
}

/// Inputs for the day-T result row.
#[derive(Debug, Clone)]
pub struct DayResultInputs {
    pub date: NaiveDate,
    pub daily_transaction_costs: f64,
    pub previous_portfolio_value: f64,
    pub previous_total_pnl: f64,
    pub previous_total_transaction_costs: f64,
    pub initial_capital: f64,
    pub trading_days: u32,
    pub gross_notional: f64,
    pub net_notional: f64,
    pub margin_posted: f64,
    pub margin_cushion: f64,
    pub equity_to_margin_ratio: f64,
    pub active_positions: usize,
}

impl<'a, S: LiveStore> ResultsManager<'a, S> {
    pub fn new(store: &'a S, strategy_id: impl Into<String>, portfolio_id: impl Into<String>) -> Self {
        Self {
            store,
            strategy_id: strategy_id.into(),
            portfolio_id: portfolio_id.into(),
        }
    }

    /// Persist one strategy's (or the aggregate book's) positions for a date.
    /// Zero quantities are skipped; the futures write invariant is enforced.
    pub fn save_positions(
        &self,
        strategy_name: &str,
        date: NaiveDate,
        positions: &[Position],
    ) -> Result<usize, StoreError> {
        let mut rows = Vec::with_capacity(positions.len());
        for position in positions {
            if position.is_flat() {
                continue;
            }
            position
                .check_write_invariant()
                .map_err(|e| StoreError::Other(e.to_string()))?;
            rows.push(PositionRow {
                strategy_id: self.strategy_id.clone(),
                strategy_name: strategy_name.to_string(),
                portfolio_id: self.portfolio_id.clone(),
                symbol: position.symbol.clone(),
                date,
                quantity: Decimal::from(position.quantity),
                average_price: to_stored(position.average_price),
                realized_pnl: to_stored(position.realized_pnl),
                unrealized_pnl: to_stored(position.unrealized_pnl),
            });
        }

        self.store
            .delete_positions(&self.strategy_id, strategy_name, &self.portfolio_id, date)?;
        self.store.store_positions(&rows)?;
        Ok(rows.len())
    }

    /// Load one strategy's positions back into engine form.
    pub fn load_positions(
        &self,
        strategy_name: &str,
        date: NaiveDate,
    ) -> Result<Vec<Position>, StoreError> {
        let rows = self
            .store
            .load_positions(&self.strategy_id, strategy_name, &self.portfolio_id, date)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut position = Position::new(
                    row.symbol,
                    to_f64(row.quantity) as i64,
                    to_f64(row.average_price),
                    row.date,
                );
                position.realized_pnl = to_f64(row.realized_pnl);
                position.unrealized_pnl = to_f64(row.unrealized_pnl);
                position
            })
            .collect())
    }

    /// Persist a strategy's executions: delete stale rows by order id, then
    /// insert the fresh reports.
    pub fn save_executions(
        &self,
        strategy_name: &str,
        date: NaiveDate,
        reports: &[ExecutionReport],
    ) -> Result<usize, StoreError> {
        if reports.is_empty() {
            return Ok(0);
        }
        let order_ids: Vec<String> = reports.iter().map(|r| r.order_id.clone()).collect();
        self.store.delete_executions_by_order_ids(&order_ids, date)?;

        let rows: Vec<ExecutionRow> = reports
            .iter()
            .map(|report| ExecutionRow {
                order_id: report.order_id.clone(),
                strategy_id: self.strategy_id.clone(),
                strategy_name: strategy_name.to_string(),
                portfolio_id: self.portfolio_id.clone(),
                symbol: report.symbol.clone(),
                side: report.side.as_str().to_string(),
                filled_quantity: Decimal::from(report.filled_quantity),
                fill_price: to_stored(report.fill_price),
                commission: to_stored(report.commission),
                total_transaction_costs: to_stored(report.total_transaction_costs),
                execution_time: report.execution_time,
                date,
            })
            .collect();
        self.store.store_executions(&rows)?;
        Ok(rows.len())
    }

    /// Persist a strategy's forecasts for a date.
    pub fn save_signals(
        &self,
        strategy_name: &str,
        date: NaiveDate,
        signals: &std::collections::BTreeMap<String, f64>,
    ) -> Result<usize, StoreError> {
        self.store
            .delete_signals(&self.strategy_id, strategy_name, &self.portfolio_id, date)?;
        let rows: Vec<SignalRow> = signals
            .iter()
            .map(|(symbol, forecast)| SignalRow {
                strategy_id: self.strategy_id.clone(),
                strategy_name: strategy_name.to_string(),
                portfolio_id: self.portfolio_id.clone(),
                symbol: symbol.clone(),
                date,
                forecast: *forecast,
            })
            .collect();
        self.store.store_signals(&rows)?;
        Ok(rows.len())
    }

    /// Write the day-T aggregate row and equity point.
    pub fn save_day_result(&self, inputs: &DayResultInputs) -> Result<LiveResultRow, StoreError> {
        let daily_pnl = -inputs.daily_transaction_costs;
        let total_pnl = inputs.previous_total_pnl + daily_pnl;
        let portfolio_value = inputs.previous_portfolio_value + daily_pnl;
        let total_costs =
            inputs.previous_total_transaction_costs + inputs.daily_transaction_costs;
        // Futures book all PnL as realized; gross of costs.
        let total_realized = total_pnl + total_costs;

        let row = LiveResultRow {
            strategy_id: self.strategy_id.clone(),
            portfolio_id: self.portfolio_id.clone(),
            date: inputs.date,
            daily_pnl: to_stored(daily_pnl),
            daily_realized_pnl: to_stored(0.0),
            daily_unrealized_pnl: to_stored(0.0),
            daily_transaction_costs: to_stored(inputs.daily_transaction_costs),
            daily_return: metrics::daily_return_pct(daily_pnl, inputs.previous_portfolio_value),
            total_pnl: to_stored(total_pnl),
            total_realized_pnl: to_stored(total_realized),
            total_transaction_costs: to_stored(total_costs),
            total_cumulative_return: metrics::total_return_pct(
                portfolio_value,
                inputs.initial_capital,
            ),
            total_annualized_return: annualized_return_pct(
                metrics::total_return_decimal(portfolio_value, inputs.initial_capital),
                inputs.trading_days,
            ),
            current_portfolio_value: to_stored(portfolio_value),
            portfolio_leverage: metrics::portfolio_leverage(inputs.gross_notional, portfolio_value),
            equity_to_margin_ratio: inputs.equity_to_margin_ratio,
            margin_cushion: inputs.margin_cushion,
            gross_notional: to_stored(inputs.gross_notional),
            net_notional: to_stored(inputs.net_notional),
            margin_posted: to_stored(inputs.margin_posted),
            cash_available: to_stored(metrics::cash_available(
                portfolio_value,
                inputs.margin_posted,
            )),
            active_positions: inputs.active_positions as i64,
        };

        self.store
            .delete_live_result(&self.strategy_id, &self.portfolio_id, inputs.date)?;
        self.store.store_live_result(&row)?;

        self.store
            .delete_equity_point(&self.strategy_id, &self.portfolio_id, inputs.date)?;
        self.store.store_equity_point(&EquityPoint {
            strategy_id: self.strategy_id.clone(),
            portfolio_id: self.portfolio_id.clone(),
            date: inputs.date,
            equity: row.current_portfolio_value,
        })?;

        Ok(row)
    }

    /// Update the T-1 row with the finalized PnL and rewrite its equity
    /// point. Returns the finalized portfolio value, or `None` when no T-1
    /// row exists to update.
    pub fn update_finalized_previous_day(
        &self,
        previous_date: NaiveDate,
        booked_pnl: f64,
        initial_capital: f64,
        calendar: &TradingCalendar,
        live_start: NaiveDate,
    ) -> Result<Option<f64>, StoreError> {
        let Some(stored) = self
            .store
            .load_live_result(&self.strategy_id, &self.portfolio_id, previous_date)?
        else {
            warn!(date = %previous_date, "no T-1 live result row to update");
            return Ok(None);
        };

        // Commissions the first run persisted for T-1 (0 if it did not).
        let yesterday_costs = to_f64(stored.daily_transaction_costs);
        let (day_before_value, day_before_total_pnl, day_before_total_costs) = self
            .store
            .previous_aggregates(&self.strategy_id, &self.portfolio_id, previous_date)?
            .map(|(v, p, c)| (to_f64(v), to_f64(p), to_f64(c)))
            .unwrap_or((initial_capital, 0.0, 0.0));

        let daily_pnl = booked_pnl - yesterday_costs;
        let total_pnl = day_before_total_pnl + daily_pnl;
        let portfolio_value = day_before_value + daily_pnl;
        let total_costs = day_before_total_costs + yesterday_costs;
        let total_realized = total_pnl + total_costs;

        // Margin metrics were computed when T-1 originally ran; keep them
        // unless they are missing or zero.
        let preserve = |stored_value: f64, fallback: f64| {
            if stored_value != 0.0 {
                stored_value
            } else {
                fallback
            }
        };
        let margin_posted = to_f64(stored.margin_posted);

        let trading_days = calendar.trading_days_between(live_start, previous_date);
        let updated = LiveResultRow {
            daily_pnl: to_stored(daily_pnl),
            daily_realized_pnl: to_stored(booked_pnl),
            daily_unrealized_pnl: to_stored(0.0),
            daily_return: metrics::daily_return_pct(daily_pnl, day_before_value),
            total_pnl: to_stored(total_pnl),
            total_realized_pnl: to_stored(total_realized),
            total_transaction_costs: to_stored(total_costs),
            total_cumulative_return: metrics::total_return_pct(portfolio_value, initial_capital),
            total_annualized_return: annualized_return_pct(
                metrics::total_return_decimal(portfolio_value, initial_capital),
                trading_days,
            ),
            current_portfolio_value: to_stored(portfolio_value),
            portfolio_leverage: preserve(
                stored.portfolio_leverage,
                metrics::portfolio_leverage(to_f64(stored.gross_notional), portfolio_value),
            ),
            equity_to_margin_ratio: preserve(
                stored.equity_to_margin_ratio,
                if margin_posted > 0.0 {
                    to_f64(stored.gross_notional) / margin_posted
                } else {
                    0.0
                },
            ),
            cash_available: to_stored(metrics::cash_available(portfolio_value, margin_posted)),
            ..stored
        };

        self.store
            .delete_live_result(&self.strategy_id, &self.portfolio_id, previous_date)?;
        self.store.store_live_result(&updated)?;

        self.store
            .delete_equity_point(&self.strategy_id, &self.portfolio_id, previous_date)?;
        self.store.store_equity_point(&EquityPoint {
            strategy_id: self.strategy_id.clone(),
            portfolio_id: self.portfolio_id.clone(),
            date: previous_date,
            equity: updated.current_portfolio_value,
        })?;

        info!(
            date = %previous_date,
            booked_pnl,
            net = daily_pnl,
            portfolio_value,
            "updated T-1 live result with finalized PnL"
        );
        Ok(Some(portfolio_value))
    }

    /// Position-limit check applied before the aggregate snapshot is saved.
    pub fn check_position_limits(
        positions: &[Position],
        limit: i64,
    ) -> Result<(), CoreError> {
        for position in positions {
            position.check_limit(limit)?;
        }
        Ok(())
    }

    /// Timestamp used for synthetic executions on a date.
    pub fn execution_time(date: NaiveDate) -> NaiveDateTime {
        // Beginning-of-day model: stamped at the UTC day boundary.
        date.and_hms_opt(0, 0, 0).expect("midnight exists")
    }
}
