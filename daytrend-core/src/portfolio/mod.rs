//! PortfolioManager — aggregation, dynamic optimization, risk management.
//!
//! Three phases per run:
//! - Phase A: aggregate per-strategy rounded positions into raw portfolio
//!   targets, holding back reserved capital.
//! - Phase B (optional): cost-aware dynamic optimization against yesterday's
//!   portfolio.
//! - Phase C (optional): risk evaluation; a single scalar <= 1 restores
//!   feasibility when a limit is breached, applied after optimization.
//!
//! Strategies are processed in lexicographic id order, which also fixes the
//! combined strategy id.

pub mod optimizer;
pub mod risk;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{round_contracts, Bar};
use crate::error::CoreError;
use crate::registry::InstrumentRegistry;
use crate::strategy::Strategy;

pub use optimizer::DynamicOptConfig;
pub use risk::{RiskConfig, RiskResult};

/// Portfolio-level configuration.
#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    pub total_capital: f64,
    /// Fraction of capital held back from allocation (default 10%).
    pub reserve_fraction: f64,
    /// Per-symbol contract limit applied to final portfolio positions.
    pub position_limit: i64,
    pub use_optimization: bool,
    pub use_risk_management: bool,
    pub opt: DynamicOptConfig,
    pub risk: RiskConfig,
}

impl PortfolioConfig {
    pub fn new(total_capital: f64) -> Self {
        Self {
            total_capital,
            reserve_fraction: 0.10,
            position_limit: 500,
            use_optimization: true,
            use_risk_management: true,
            opt: DynamicOptConfig::default(),
            risk: RiskConfig::default(),
        }
    }

    /// Capital available to strategies after the reserve hold-back.
    pub fn allocable_capital(&self) -> f64 {
        self.total_capital * (1.0 - self.reserve_fraction)
    }
}

struct StrategySlot {
    id: String,
    allocation: f64,
    strategy: Box<dyn Strategy>,
}

/// Derive the canonical portfolio-level id from the enabled strategy set.
/// Invariant under permutation of the input.
pub fn combined_strategy_id<S: AsRef<str>>(strategy_ids: &[S]) -> String {
    let mut ids: Vec<&str> = strategy_ids.iter().map(|s| s.as_ref()).collect();
    ids.sort_unstable();
    format!("LIVE_{}", ids.join("_"))
}

pub struct PortfolioManager {
    config: PortfolioConfig,
    registry: Arc<InstrumentRegistry>,
    slots: Vec<StrategySlot>,
    portfolio_positions: BTreeMap<String, i64>,
    strategy_positions: BTreeMap<String, BTreeMap<String, i64>>,
    last_risk: Option<RiskResult>,
}

impl PortfolioManager {
    pub fn new(config: PortfolioConfig, registry: Arc<InstrumentRegistry>) -> Self {
        Self {
            config,
            registry,
            slots: Vec::new(),
            portfolio_positions: BTreeMap::new(),
            strategy_positions: BTreeMap::new(),
            last_risk: None,
        }
    }

    /// Register a strategy with its normalized allocation. Kept sorted by id;
    /// duplicate ids are rejected.
    pub fn add_strategy(
        &mut self,
        strategy: Box<dyn Strategy>,
        allocation: f64,
    ) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&allocation) {
            return Err(CoreError::invalid_data(format!(
                "allocation {allocation} for {} outside [0, 1]",
                strategy.id()
            )));
        }
        let id = strategy.id().to_string();
        if self.slots.iter().any(|s| s.id == id) {
            return Err(CoreError::invalid_data(format!(
                "duplicate strategy id '{id}'"
            )));
        }
        self.slots.push(StrategySlot {
            id,
            allocation,
            strategy,
        });
        self.slots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(())
    }

    pub fn combined_id(&self) -> String {
        let ids: Vec<&str> = self.slots.iter().map(|s| s.id.as_str()).collect();
        combined_strategy_id(&ids)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.id.clone()).collect()
    }

    pub fn allocation(&self, strategy_id: &str) -> Option<f64> {
        self.slots
            .iter()
            .find(|s| s.id == strategy_id)
            .map(|s| s.allocation)
    }

    /// Per-strategy capital: allocable capital times allocation.
    pub fn strategy_capital(&self, strategy_id: &str) -> Option<f64> {
        self.allocation(strategy_id)
            .map(|a| self.config.allocable_capital() * a)
    }

    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    /// Current forecasts per strategy, for signal storage.
    pub fn strategy_signals(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.slots
            .iter()
            .map(|s| (s.id.clone(), s.strategy.signals()))
            .collect()
    }

    /// Run the full pipeline: ingest bars, aggregate, optimize, risk-scale.
    ///
    /// `prior_positions` are yesterday's portfolio positions, consumed by the
    /// turnover-aware optimizer.
    pub fn process_market_data(
        &mut self,
        bars: &[Bar],
        prior_positions: &BTreeMap<String, i64>,
    ) -> Result<(), CoreError> {
        if self.slots.is_empty() {
            return Err(CoreError::invalid_data("no strategies in portfolio"));
        }
        self.normalize_allocations();

        for slot in &mut self.slots {
            slot.strategy.on_data(bars)?;
        }

        // Latest close per symbol, needed by the optimizer and risk pass.
        let closes_by_symbol = collect_close_series(bars);
        let last_close: BTreeMap<String, f64> = closes_by_symbol
            .iter()
            .filter_map(|(s, v)| v.last().map(|c| (s.clone(), *c)))
            .collect();

        // Phase A: allocation-weighted aggregation, sign preserved.
        let mut raw_targets: BTreeMap<String, f64> = BTreeMap::new();
        for slot in &self.slots {
            for (symbol, qty) in slot.strategy.positions() {
                *raw_targets.entry(symbol).or_insert(0.0) += slot.allocation * qty as f64;
            }
        }
        debug!(symbols = raw_targets.len(), "aggregated raw targets");

        // Phase B: dynamic optimization against yesterday's book.
        let optimized = if self.config.use_optimization {
            optimizer::optimize(
                &raw_targets,
                prior_positions,
                &last_close,
                &self.registry,
                self.config.allocable_capital(),
                &self.config.opt,
            )?
        } else {
            raw_targets.clone()
        };

        // Phase C: risk management; scaling is applied after optimization.
        let scale = if self.config.use_risk_management {
            let result = risk::evaluate(
                &optimized,
                &closes_by_symbol,
                &self.per_strategy_targets(),
                &self.registry,
                self.config.total_capital,
                &self.config.risk,
            )?;
            for breach in &result.breaches {
                warn!(breach = %breach, "risk limit breached; scaling positions");
            }
            let scale = result.recommended_scale;
            self.last_risk = Some(result);
            scale
        } else {
            self.last_risk = None;
            1.0
        };

        // Final rounding, limit clamp, and per-strategy share attribution.
        // The per-symbol ratio maps the aggregate target onto the final
        // book; it is undefined when offsetting strategies net the
        // aggregate to (near) zero.
        self.portfolio_positions.clear();
        let mut ratios: BTreeMap<String, Option<f64>> = BTreeMap::new();
        for (symbol, target) in &optimized {
            let scaled = target * scale;
            let mut qty = round_contracts(scaled);
            if qty.abs() > self.config.position_limit {
                warn!(
                    symbol = %symbol,
                    qty,
                    limit = self.config.position_limit,
                    "clamping position to per-symbol limit"
                );
                qty = qty.signum() * self.config.position_limit;
            }
            if qty != 0 {
                self.portfolio_positions.insert(symbol.clone(), qty);
            }
            let raw = raw_targets.get(symbol).copied().unwrap_or(0.0);
            let ratio = if raw.abs() > f64::EPSILON {
                Some(qty as f64 / raw)
            } else {
                None
            };
            ratios.insert(symbol.clone(), ratio);
        }

        self.strategy_positions.clear();
        for slot in &self.slots {
            let mut shares = BTreeMap::new();
            for (symbol, qty) in slot.strategy.positions() {
                let contribution = slot.allocation * qty as f64;
                let share = match ratios.get(&symbol).copied().flatten() {
                    Some(ratio) => round_contracts(contribution * ratio),
                    // Cancelled aggregate: each strategy keeps its own
                    // risk-scaled position rather than a zeroed share.
                    None => round_contracts(contribution * scale),
                };
                if share != 0 {
                    shares.insert(symbol, share);
                }
            }
            self.strategy_positions.insert(slot.id.clone(), shares);
        }

        info!(
            positions = self.portfolio_positions.len(),
            scale, "portfolio processing complete"
        );
        Ok(())
    }

    /// Final integer-rounded portfolio positions (non-zero only).
    pub fn portfolio_positions(&self) -> &BTreeMap<String, i64> {
        &self.portfolio_positions
    }

    /// Each strategy's share of the final book, after optimization and
    /// risk scaling (non-zero only).
    pub fn strategy_positions(&self) -> &BTreeMap<String, BTreeMap<String, i64>> {
        &self.strategy_positions
    }

    /// Risk evaluation from the latest processing pass, if enabled.
    pub fn risk_result(&self) -> Option<&RiskResult> {
        self.last_risk.as_ref()
    }

    fn normalize_allocations(&mut self) {
        let total: f64 = self.slots.iter().map(|s| s.allocation).sum();
        if total > 0.0 && (total - 1.0).abs() > 1e-9 {
            for slot in &mut self.slots {
                slot.allocation /= total;
            }
        }
        let allocable = self.config.allocable_capital();
        for slot in &mut self.slots {
            let capital = allocable * slot.allocation;
            slot.strategy.set_capital_allocation(capital);
        }
    }

    /// Allocation-weighted per-strategy positions, used by the risk pass to
    /// build strategy return series.
    fn per_strategy_targets(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.slots
            .iter()
            .map(|slot| {
                let targets = slot
                    .strategy
                    .positions()
                    .into_iter()
                    .map(|(symbol, qty)| (symbol, slot.allocation * qty as f64))
                    .collect();
                (slot.id.clone(), targets)
            })
            .collect()
    }
}

/// Group closes per symbol in date order.
fn collect_close_series(bars: &[Bar]) -> BTreeMap<String, Vec<f64>> {
    let mut indexed: BTreeMap<String, Vec<(chrono::NaiveDate, f64)>> = BTreeMap::new();
    for bar in bars {
        if !bar.is_void() {
            indexed
                .entry(bar.symbol.clone())
                .or_default()
                .push((bar.date, bar.close));
        }
    }
    indexed
        .into_iter()
        .map(|(symbol, mut rows)| {
            rows.sort_by_key(|(d, _)| *d);
            (symbol, rows.into_iter().map(|(_, c)| c).collect())
        })
        .collect()
}
