//! ExecutionManager — synthetic beginning-of-day executions.
//!
//! Executions for day D are the difference between D's and D-1's positions,
//! priced at the T-1 close. A sign flip produces two reports: the close leg
//! first, then the open leg. Commission is per contract from the registry;
//! total transaction costs add a participation-based impact estimate fed by
//! rolling EWMA volume and volatility.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::domain::{derive_order_id, ExecutionReport, Side};
use crate::error::CoreError;
use crate::registry::InstrumentRegistry;

/// Rolling per-symbol market state for cost estimation.
#[derive(Debug, Clone, Default)]
struct MarketState {
    avg_volume: f64,
    avg_abs_return: f64,
    last_close: f64,
}

/// Impact and EWMA parameters.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// EWMA span (bars) for volume and volatility averages.
    pub ewma_span: usize,
    /// Impact coefficient; zero disables the impact term entirely.
    pub impact_coefficient: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            ewma_span: 20,
            impact_coefficient: 0.0,
        }
    }
}

pub struct ExecutionManager {
    registry: Arc<InstrumentRegistry>,
    config: ExecutionConfig,
    market: HashMap<String, MarketState>,
}

impl ExecutionManager {
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self::with_config(registry, ExecutionConfig::default())
    }

    pub fn with_config(registry: Arc<InstrumentRegistry>, config: ExecutionConfig) -> Self {
        Self {
            registry,
            config,
            market: HashMap::new(),
        }
    }

    /// Feed daily volume and close for the rolling cost averages.
    pub fn update_market_data(&mut self, symbol: &str, volume: f64, close: f64) {
        let alpha = 2.0 / (self.config.ewma_span as f64 + 1.0);
        let state = self.market.entry(symbol.to_string()).or_default();
        state.avg_volume = if state.avg_volume == 0.0 {
            volume
        } else {
            alpha * volume + (1.0 - alpha) * state.avg_volume
        };
        if state.last_close > 0.0 && close > 0.0 {
            let abs_return = (close / state.last_close - 1.0).abs();
            state.avg_abs_return = if state.avg_abs_return == 0.0 {
                abs_return
            } else {
                alpha * abs_return + (1.0 - alpha) * state.avg_abs_return
            };
        }
        state.last_close = close;
    }

    /// Generate the day's execution reports for one strategy.
    ///
    /// Reports come out in symbol order; a symbol missing its T-1 close is
    /// an error — executions are always priced, never defaulted.
    pub fn generate_daily_executions(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        new_positions: &BTreeMap<String, i64>,
        prior_positions: &BTreeMap<String, i64>,
        t1_closes: &HashMap<String, f64>,
        date: NaiveDate,
        execution_time: NaiveDateTime,
    ) -> Result<Vec<ExecutionReport>, CoreError> {
        let mut symbols: BTreeSet<&String> = new_positions.keys().collect();
        symbols.extend(prior_positions.keys());

        let mut reports = Vec::new();
        for symbol in symbols {
            let q_new = new_positions.get(symbol).copied().unwrap_or(0);
            let q_old = prior_positions.get(symbol).copied().unwrap_or(0);
            let delta = q_new - q_old;
            if delta == 0 {
                continue;
            }

            let fill_price = *t1_closes.get(symbol).ok_or_else(|| {
                CoreError::data_not_found(format!("no T-1 close for {symbol} to price execution"))
            })?;

            if q_new.signum() * q_old.signum() < 0 {
                // Crossing zero: close the old side, then open the new side.
                let close_side = if q_old > 0 { Side::Sell } else { Side::Buy };
                reports.push(self.build_report(
                    strategy_id,
                    portfolio_id,
                    symbol,
                    close_side,
                    q_old.abs(),
                    fill_price,
                    date,
                    execution_time,
                )?);
                let open_side = if q_new > 0 { Side::Buy } else { Side::Sell };
                reports.push(self.build_report(
                    strategy_id,
                    portfolio_id,
                    symbol,
                    open_side,
                    q_new.abs(),
                    fill_price,
                    date,
                    execution_time,
                )?);
            } else {
                let side = if delta > 0 { Side::Buy } else { Side::Sell };
                reports.push(self.build_report(
                    strategy_id,
                    portfolio_id,
                    symbol,
                    side,
                    delta.abs(),
                    fill_price,
                    date,
                    execution_time,
                )?);
            }
        }

        debug!(
            strategy = strategy_id,
            executions = reports.len(),
            "generated daily executions"
        );
        Ok(reports)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        symbol: &str,
        side: Side,
        quantity: i64,
        fill_price: f64,
        date: NaiveDate,
        execution_time: NaiveDateTime,
    ) -> Result<ExecutionReport, CoreError> {
        let instrument = self.registry.get(symbol)?;
        let commission = quantity as f64 * instrument.commission_per_contract;
        let impact = self.impact_estimate(symbol, quantity, fill_price, instrument.multiplier);
        Ok(ExecutionReport {
            order_id: derive_order_id(strategy_id, portfolio_id, symbol, date, side, quantity),
            symbol: symbol.to_string(),
            side,
            filled_quantity: quantity,
            fill_price,
            commission,
            total_transaction_costs: commission + impact,
            execution_time,
        })
    }

    /// Participation-based impact: notional * coefficient * vol * sqrt(q / ADV).
    fn impact_estimate(&self, symbol: &str, quantity: i64, price: f64, multiplier: f64) -> f64 {
        if self.config.impact_coefficient == 0.0 {
            return 0.0;
        }
        let Some(state) = self.market.get(symbol) else {
            return 0.0;
        };
        if state.avg_volume <= 0.0 {
            return 0.0;
        }
        let participation = (quantity as f64 / state.avg_volume).sqrt();
        quantity as f64
            * price
            * multiplier
            * self.config.impact_coefficient
            * state.avg_abs_return
            * participation
    }
}
