//! Strategy seam: the trait the portfolio manager consumes, plus the
//! trend-following forecast engine.

pub mod trend;

use std::collections::BTreeMap;

use crate::domain::Bar;
use crate::error::CoreError;

pub use trend::{TrendConfig, TrendStrategy, TrendVariant};

/// A stateful daily strategy.
///
/// `on_data` is the only ingestion path; forecasts and rounded positions are
/// read back after processing. Strategies never see portfolio state — the
/// portfolio manager owns reconciliation. Unknown symbols yield zero rather
/// than an error, so portfolio inclusion stays opt-in by configuration.
pub trait Strategy {
    /// Stable strategy identifier (the config key, e.g. "tf_slow").
    fn id(&self) -> &str;

    /// Variant label used for result-store rows.
    fn variant_name(&self) -> &'static str;

    /// Capital currently allocated to this strategy.
    fn capital_allocation(&self) -> f64;

    /// Re-allocate capital (called when allocations are normalized).
    fn set_capital_allocation(&mut self, capital: f64);

    /// Ingest a window of bars, updating forecasts and target positions.
    fn on_data(&mut self, bars: &[Bar]) -> Result<(), CoreError>;

    /// Most recent combined forecast for a symbol, bounded to [-20, 20].
    /// Zero for unknown symbols or insufficient history.
    fn forecast(&self, symbol: &str) -> f64;

    /// Most recent rounded target position, in whole contracts.
    fn position(&self, symbol: &str) -> i64;

    /// All current forecasts, keyed by symbol.
    fn signals(&self) -> BTreeMap<String, f64>;

    /// All current rounded positions, keyed by symbol.
    fn positions(&self) -> BTreeMap<String, i64>;

    /// Recent closes for a symbol, oldest first. Used by the portfolio
    /// manager to build return series for optimization and risk.
    fn closes(&self, symbol: &str) -> Vec<f64>;
}
