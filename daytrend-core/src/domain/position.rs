//! Position — an integer-contract futures holding on a single date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A futures position snapshot.
///
/// Keyed externally by (strategy_id, portfolio_id, symbol, date). Futures in
/// this model carry realized PnL only: `unrealized_pnl` exists for schema
/// parity and must be zero whenever a position crosses the persistence
/// boundary. Realized PnL is written exclusively by the PnL manager — day-T
/// snapshots always carry the zero placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed whole contracts; zero is legal in memory but never stored.
    pub quantity: i64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub last_update: NaiveDate,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: i64, average_price: f64, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_price,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            last_update: date,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Signed notional at the given price and contract multiplier.
    pub fn notional(&self, price: f64, multiplier: f64) -> f64 {
        self.quantity as f64 * price * multiplier
    }

    /// Enforce the per-symbol contract limit.
    pub fn check_limit(&self, limit: i64) -> Result<(), CoreError> {
        if self.quantity.abs() > limit {
            return Err(CoreError::invalid_data(format!(
                "position {} of {} contracts exceeds limit {}",
                self.symbol, self.quantity, limit
            )));
        }
        Ok(())
    }

    /// The write invariant: futures positions persist with zero unrealized
    /// PnL, and day-T snapshots also persist with zero realized PnL.
    pub fn check_write_invariant(&self) -> Result<(), CoreError> {
        if self.unrealized_pnl != 0.0 {
            return Err(CoreError::invalid_data(format!(
                "position {} has non-zero unrealized PnL {}",
                self.symbol, self.unrealized_pnl
            )));
        }
        Ok(())
    }
}
