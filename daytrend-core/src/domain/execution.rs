//! ExecutionReport — a synthetic beginning-of-day fill.
//!
//! Executions are derived, never observed: the daily position delta against
//! the prior day, priced at the T-1 close. Order ids are a pure BLAKE3
//! function of the identifying tuple, so a re-run regenerates identical ids
//! and the pre-insert delete-by-order_id removes exactly the stale rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn flipped(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthetic fill implied by a day-over-day position change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    /// Always positive; direction lives in `side`.
    pub filled_quantity: i64,
    /// The T-1 close for the symbol.
    pub fill_price: f64,
    pub commission: f64,
    /// Commission plus the rolling impact estimate.
    pub total_transaction_costs: f64,
    pub execution_time: NaiveDateTime,
}

/// Stable order id: BLAKE3 over the identifying tuple, hex-encoded and
/// truncated to 32 chars. Stable per (strategy, portfolio, symbol, date,
/// side, rounded qty) across replays.
pub fn derive_order_id(
    strategy_id: &str,
    portfolio_id: &str,
    symbol: &str,
    date: NaiveDate,
    side: Side,
    quantity: i64,
) -> String {
    let key = format!(
        "{strategy_id}|{portfolio_id}|{symbol}|{date}|{}|{quantity}",
        side.as_str()
    );
    let hash = blake3::hash(key.as_bytes());
    hash.to_hex()[..32].to_string()
}
