//! Futures instrument metadata and roll-suffix normalization.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Contract metadata for a tradable futures root.
///
/// Margins are per contract in account currency. `maintenance_margin` must
/// not exceed `initial_margin`; both must be positive for a symbol to be
/// eligible for the daily run (validated up front, missing metadata aborts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub multiplier: f64,
    pub tick_size: f64,
    pub initial_margin: f64,
    pub maintenance_margin: f64,
    pub commission_per_contract: f64,
    pub trading_hours: String,
    pub expiry: Option<chrono::NaiveDate>,
}

impl Instrument {
    /// Validate contract metadata per the registry's admission rules.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.multiplier > 0.0) {
            return Err(CoreError::invalid_data(format!(
                "non-positive multiplier {} for {}",
                self.multiplier, self.symbol
            )));
        }
        if !(self.tick_size > 0.0) {
            return Err(CoreError::invalid_data(format!(
                "non-positive tick size {} for {}",
                self.tick_size, self.symbol
            )));
        }
        if !(self.initial_margin > 0.0) {
            return Err(CoreError::invalid_data(format!(
                "non-positive initial margin {} for {}",
                self.initial_margin, self.symbol
            )));
        }
        if !(self.maintenance_margin > 0.0) || self.maintenance_margin > self.initial_margin {
            return Err(CoreError::invalid_data(format!(
                "maintenance margin {} out of range for {} (initial {})",
                self.maintenance_margin, self.symbol, self.initial_margin
            )));
        }
        if self.commission_per_contract < 0.0 {
            return Err(CoreError::invalid_data(format!(
                "negative commission for {}",
                self.symbol
            )));
        }
        Ok(())
    }
}

/// Strip a roll suffix (`.v.N` or `.c.N`) from a symbol.
///
/// Registry lookups key on the root; storage keys retain the full symbol.
pub fn root_symbol(symbol: &str) -> &str {
    for marker in [".v.", ".c."] {
        if let Some(idx) = symbol.find(marker) {
            let tail = &symbol[idx + marker.len()..];
            if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
                return &symbol[..idx];
            }
        }
    }
    symbol
}
