//! PnLManager — the two-day settlement-lag model.
//!
//! On day D the last observed settlement is the T-1 close, so D can only
//! finalize PnL for D-1: each D-1 position books
//! quantity * (close[T-1] - close[T-2]) * multiplier. Day-T positions are
//! initialized with the zero placeholder that the next run finalizes.
//!
//! This manager is the sole writer of realized PnL. Strategy-internal
//! PnL-like state never reaches the positions table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::domain::Position;
use crate::error::CoreError;
use crate::registry::InstrumentRegistry;

/// Outcome of finalizing one strategy's previous day.
#[derive(Debug, Clone, Default)]
pub struct FinalizationResult {
    /// D-1 positions with realized PnL written in, unrealized forced to 0.
    pub finalized_positions: Vec<Position>,
    /// Booked PnL per symbol.
    pub position_realized_pnl: BTreeMap<String, f64>,
    /// Sum of booked PnL net of commissions.
    pub finalized_daily_pnl: f64,
    pub finalized_portfolio_value: f64,
}

pub struct PnlManager {
    registry: Arc<InstrumentRegistry>,
}

impl PnlManager {
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self { registry }
    }

    /// Finalize D-1 PnL from the T-2 -> T-1 price move.
    ///
    /// Returns `None` when the T-2 map is empty (weekend/holiday boundary):
    /// finalization is skipped entirely and D-1 PnL stays at zero. A symbol
    /// missing only its own T-2 close is skipped with a warning; a missing
    /// T-1 close is a hard error — realized PnL is never booked from a
    /// substituted price.
    pub fn finalize_previous_day(
        &self,
        previous_positions: &[Position],
        t1_closes: &HashMap<String, f64>,
        t2_closes: &HashMap<String, f64>,
        previous_portfolio_value: f64,
        commissions: f64,
    ) -> Result<Option<FinalizationResult>, CoreError> {
        if previous_positions.is_empty() {
            info!("no positions to finalize for day T-1");
            return Ok(Some(FinalizationResult {
                finalized_portfolio_value: previous_portfolio_value,
                ..FinalizationResult::default()
            }));
        }
        if t2_closes.is_empty() {
            warn!("no T-2 closes available; skipping day T-1 finalization");
            return Ok(None);
        }

        let mut result = FinalizationResult::default();
        let mut total_booked = 0.0;

        for position in previous_positions {
            let symbol = &position.symbol;
            let Some(t2_close) = t2_closes.get(symbol) else {
                warn!(symbol = %symbol, "no T-2 close; skipping finalization for symbol");
                continue;
            };
            let t1_close = t1_closes.get(symbol).copied().ok_or_else(|| {
                CoreError::data_not_found(format!("no T-1 close for {symbol} to finalize"))
            })?;

            let multiplier = self.registry.multiplier(symbol)?;
            let booked = position.quantity as f64 * (t1_close - t2_close) * multiplier;

            info!(
                symbol = %symbol,
                quantity = position.quantity,
                t2_close,
                t1_close,
                booked,
                "day T-1 finalization"
            );

            let mut finalized = position.clone();
            finalized.realized_pnl = booked;
            finalized.unrealized_pnl = 0.0;
            result.finalized_positions.push(finalized);
            result.position_realized_pnl.insert(symbol.clone(), booked);
            total_booked += booked;
        }

        result.finalized_daily_pnl = total_booked - commissions;
        result.finalized_portfolio_value = previous_portfolio_value + result.finalized_daily_pnl;

        info!(
            total_booked,
            net = result.finalized_daily_pnl,
            portfolio_value = result.finalized_portfolio_value,
            "day T-1 finalization complete"
        );
        Ok(Some(result))
    }

    /// Stamp day-T positions: entry at yesterday's close, zero PnL
    /// placeholders, updated date. Tomorrow's run writes the real number.
    pub fn initialize_day_positions(
        &self,
        positions: &BTreeMap<String, i64>,
        t1_closes: &HashMap<String, f64>,
        date: NaiveDate,
    ) -> Result<Vec<Position>, CoreError> {
        let mut initialized = Vec::with_capacity(positions.len());
        for (symbol, quantity) in positions {
            if *quantity == 0 {
                continue;
            }
            let entry_price = *t1_closes.get(symbol).ok_or_else(|| {
                CoreError::data_not_found(format!("no T-1 close for {symbol} to price position"))
            })?;
            let mut position = Position::new(symbol.clone(), *quantity, entry_price, date);
            position.realized_pnl = 0.0;
            position.unrealized_pnl = 0.0;
            initialized.push(position);
        }
        Ok(initialized)
    }
}
