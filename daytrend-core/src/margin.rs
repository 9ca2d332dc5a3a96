//! MarginManager — notional, posted margin, and exposure ratios.
//!
//! Prices every position at the T-1 close (beginning-of-day model, backtest
//! and live alike). Notional and margin sums need no equity; the ratio
//! helpers take the portfolio value observed later in the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::registry::InstrumentRegistry;

/// Warning thresholds on the exposure ratios.
const EQUITY_TO_MARGIN_WARN_LOW: f64 = 1.0;
const EQUITY_TO_MARGIN_WARN_HIGH: f64 = 4.0;
const MARGIN_CUSHION_WARN: f64 = 0.20;

/// Aggregated margin state for one day's book.
#[derive(Debug, Clone, Default)]
pub struct MarginMetrics {
    pub gross_notional: f64,
    pub net_notional: f64,
    pub total_posted_margin: f64,
    pub maintenance_requirement: f64,
    pub active_positions: usize,
    pub symbol_notionals: BTreeMap<String, f64>,
}

impl MarginMetrics {
    /// gross_notional / equity.
    pub fn gross_leverage(&self, equity: f64) -> f64 {
        if equity > 0.0 {
            self.gross_notional / equity
        } else {
            0.0
        }
    }

    /// gross_notional / posted margin; zero when nothing is posted.
    pub fn equity_to_margin_ratio(&self) -> f64 {
        if self.total_posted_margin > 0.0 {
            self.gross_notional / self.total_posted_margin
        } else {
            0.0
        }
    }

    /// (equity - maintenance) / equity; -1 when no maintenance requirement.
    pub fn margin_cushion(&self, equity: f64) -> f64 {
        if self.maintenance_requirement > 0.0 && equity > 0.0 {
            (equity - self.maintenance_requirement) / equity
        } else {
            -1.0
        }
    }

    pub fn cash_available(&self, equity: f64) -> f64 {
        equity - self.total_posted_margin
    }
}

pub struct MarginManager {
    registry: Arc<InstrumentRegistry>,
}

impl MarginManager {
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self { registry }
    }

    /// Aggregate margin requirements for the given positions at T-1 closes.
    ///
    /// Missing margin metadata aborts the run; a missing price for a held
    /// symbol is equally fatal since every ratio downstream depends on it.
    pub fn calculate(
        &self,
        positions: &BTreeMap<String, i64>,
        t1_closes: &HashMap<String, f64>,
    ) -> Result<MarginMetrics, CoreError> {
        let mut metrics = MarginMetrics::default();

        for (symbol, quantity) in positions {
            if *quantity == 0 {
                continue;
            }
            metrics.active_positions += 1;

            let instrument = self.registry.get(symbol)?;
            let price = *t1_closes.get(symbol).ok_or_else(|| {
                CoreError::data_not_found(format!("no T-1 close for {symbol} in margin pass"))
            })?;

            let contracts = quantity.abs() as f64;
            let signed_notional = *quantity as f64 * price * instrument.multiplier;
            metrics.gross_notional += signed_notional.abs();
            metrics.net_notional += signed_notional;
            metrics.total_posted_margin += contracts * instrument.initial_margin;
            metrics.maintenance_requirement += contracts * instrument.maintenance_margin;
            metrics
                .symbol_notionals
                .insert(symbol.clone(), signed_notional);

            debug!(
                symbol = %symbol,
                quantity,
                price,
                notional = signed_notional,
                "margin position"
            );
        }

        self.validate(&metrics)?;
        Ok(metrics)
    }

    /// Hard check plus threshold warnings.
    fn validate(&self, metrics: &MarginMetrics) -> Result<(), CoreError> {
        if metrics.active_positions > 0 && metrics.total_posted_margin <= 0.0 {
            return Err(CoreError::invalid_data(
                "posted margin is non-positive while positions are active",
            ));
        }
        let ratio = metrics.equity_to_margin_ratio();
        if metrics.active_positions > 0 && ratio <= EQUITY_TO_MARGIN_WARN_LOW {
            warn!(ratio, "equity-to-margin ratio at or below 1.0; verify margins");
        }
        if ratio > EQUITY_TO_MARGIN_WARN_HIGH {
            warn!(ratio, "equity-to-margin ratio above 4x");
        }
        Ok(())
    }

    /// Post-hoc warnings that need the day's equity.
    pub fn warn_on_equity_thresholds(&self, metrics: &MarginMetrics, equity: f64) {
        if metrics.total_posted_margin > equity {
            warn!(
                posted = metrics.total_posted_margin,
                equity, "posted margin exceeds portfolio value"
            );
        }
        let cushion = metrics.margin_cushion(equity);
        if cushion >= 0.0 && cushion < MARGIN_CUSHION_WARN {
            warn!(cushion, "margin cushion below 20%");
        }
    }
}
