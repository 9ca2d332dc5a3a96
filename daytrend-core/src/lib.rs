//! daytrend Core — the daily position-generation and PnL-lag engine.
//!
//! This crate contains the heart of the live daily cycle:
//! - Domain types (bars, instruments, positions, execution reports)
//! - Price manager with aligned T / T-1 / T-2 close snapshots
//! - Trend-following forecast engine (EMA-pair crossovers, vol scaling, buffering)
//! - Portfolio manager (aggregation, dynamic optimization, risk management)
//! - Execution manager (beginning-of-day synthetic fills at T-1 close)
//! - Margin manager (notional, posted/maintenance margin, leverage ratios)
//! - PnL manager (two-day settlement-lag finalization)
//! - Trading calendar (trading-day counts, annualization)
//!
//! Everything here is synchronous and single-threaded: each component
//! completes before the next begins within one daily invocation.

pub mod calendar;
pub mod domain;
pub mod error;
pub mod execution;
pub mod margin;
pub mod pnl;
pub mod portfolio;
pub mod prices;
pub mod registry;
pub mod strategy;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: core types are Send + Sync.
    ///
    /// The pipeline itself is single-threaded, but the registry is shared
    /// process-wide via `Arc` and the store driver may hand references to a
    /// reporting thread. If any type fails this check, the build breaks
    /// immediately rather than at an awkward retrofit later.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Instrument>();
        require_sync::<domain::Instrument>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::ExecutionReport>();
        require_sync::<domain::ExecutionReport>();
        require_send::<registry::InstrumentRegistry>();
        require_sync::<registry::InstrumentRegistry>();
        require_send::<prices::PriceManager>();
        require_sync::<prices::PriceManager>();
        require_send::<strategy::TrendConfig>();
        require_sync::<strategy::TrendConfig>();
        require_send::<portfolio::PortfolioConfig>();
        require_sync::<portfolio::PortfolioConfig>();
        require_send::<margin::MarginMetrics>();
        require_sync::<margin::MarginMetrics>();
        require_send::<pnl::FinalizationResult>();
        require_sync::<pnl::FinalizationResult>();
        require_send::<error::CoreError>();
        require_sync::<error::CoreError>();
    }

    /// Architecture contract: strategies never see portfolio state.
    ///
    /// `Strategy::on_data` takes bars only; position reconciliation happens
    /// one level up in the portfolio manager. If someone adds a portfolio
    /// parameter the trait changes and all implementations break.
    #[test]
    fn strategy_trait_has_no_portfolio_parameter() {
        fn _check_trait_object_builds(
            strat: &mut dyn strategy::Strategy,
            bars: &[domain::Bar],
        ) -> Result<(), error::CoreError> {
            strat.on_data(bars)
        }
    }
}
