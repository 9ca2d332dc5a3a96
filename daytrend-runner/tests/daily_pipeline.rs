//! End-to-end daily-cycle scenarios against an in-memory store.
//!
//! A fixed-position stub strategy stands in for the forecast engine so each
//! scenario controls the target book exactly; the pipeline, store, PnL lag,
//! executions, margin, and results paths are all real.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use daytrend_core::calendar::TradingCalendar;
use daytrend_core::domain::{Bar, Instrument};
use daytrend_core::error::CoreError;
use daytrend_core::portfolio::{PortfolioConfig, PortfolioManager};
use daytrend_core::registry::InstrumentRegistry;
use daytrend_core::strategy::Strategy;
use daytrend_runner::pipeline::{DailyRunner, PipelineConfig};
use daytrend_runner::store::{LiveStore, SqliteStore};

const INITIAL_CAPITAL: f64 = 500_000.0;

/// Stub strategy with preset target positions.
struct FixedStrategy {
    id: String,
    capital: f64,
    positions: BTreeMap<String, i64>,
}

impl FixedStrategy {
    fn new(id: &str, positions: &[(&str, i64)]) -> Self {
        Self {
            id: id.into(),
            capital: 0.0,
            positions: positions.iter().map(|(s, q)| (s.to_string(), *q)).collect(),
        }
    }
}

impl Strategy for FixedStrategy {
    fn id(&self) -> &str {
        &self.id
    }
    fn variant_name(&self) -> &'static str {
        "FixedStrategy"
    }
    fn capital_allocation(&self) -> f64 {
        self.capital
    }
    fn set_capital_allocation(&mut self, capital: f64) {
        self.capital = capital;
    }
    fn on_data(&mut self, _bars: &[Bar]) -> Result<(), CoreError> {
        Ok(())
    }
    fn forecast(&self, _symbol: &str) -> f64 {
        0.0
    }
    fn position(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).copied().unwrap_or(0)
    }
    fn signals(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
    fn positions(&self) -> BTreeMap<String, i64> {
        self.positions.clone()
    }
    fn closes(&self, _symbol: &str) -> Vec<f64> {
        Vec::new()
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn registry() -> Arc<InstrumentRegistry> {
    InstrumentRegistry::shared(vec![Instrument {
        symbol: "ES".into(),
        multiplier: 50.0,
        tick_size: 0.25,
        initial_margin: 12_000.0,
        maintenance_margin: 11_000.0,
        commission_per_contract: 2.50,
        trading_hours: "17:00-16:00 CT".into(),
        expiry: None,
    }])
    .unwrap()
}

fn bar(date: NaiveDate, close: f64) -> Bar {
    Bar {
        symbol: "ES".into(),
        date,
        open: close,
        high: close + 2.0,
        low: close - 2.0,
        close,
        volume: 1_000,
    }
}

/// Closes for Tue 3/5 .. Thu 3/7 2024: 3980, 3990, 4000.
fn seed_rising_bars(store: &SqliteStore) {
    store
        .insert_bars(&[
            bar(d(2024, 3, 5), 3980.0),
            bar(d(2024, 3, 6), 3990.0),
            bar(d(2024, 3, 7), 4000.0),
        ])
        .unwrap();
}

/// Run one historical day with the given preset books.
fn run_day(
    store: &SqliteStore,
    strategies: &[(&str, f64, &[(&str, i64)])],
    capital: f64,
    use_risk: bool,
    target: NaiveDate,
    results_root: &std::path::Path,
) -> daytrend_runner::pipeline::RunSummary {
    let mut portfolio_config = PortfolioConfig::new(capital);
    portfolio_config.use_optimization = false;
    portfolio_config.use_risk_management = use_risk;
    let mut portfolio = PortfolioManager::new(portfolio_config, registry());
    for (id, allocation, positions) in strategies {
        portfolio
            .add_strategy(Box::new(FixedStrategy::new(id, positions)), *allocation)
            .unwrap();
    }

    let mut pipeline_config = PipelineConfig::new("BASE_PORTFOLIO", capital);
    pipeline_config.results_root = results_root.to_path_buf();

    let mut runner = DailyRunner::new(
        store,
        registry(),
        portfolio,
        TradingCalendar::new(),
        pipeline_config,
    );
    runner.run(target, true).unwrap()
}

// ── S1: single long, flat prior ─────────────────────────────────────

#[test]
fn s1_single_long_from_flat() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    seed_rising_bars(&store);

    // Friday 3/8 run: T-1 close 4000 (3/7), T-2 close 3990 (3/6).
    let summary = run_day(
        &store,
        &[("tf", 1.0, &[("ES", 3)])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 8),
        out.path(),
    );

    // One BUY 3 @ 4000, commission 7.50.
    let executions = store
        .load_executions("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].side, "BUY");
    assert_eq!(executions[0].filled_quantity, dec!(3));
    assert_eq!(executions[0].fill_price, dec!(4000));
    assert_eq!(executions[0].commission, dec!(7.5));

    // Day-T row: zero realized PnL, costs only.
    let row = store
        .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap()
        .unwrap();
    assert_eq!(row.daily_realized_pnl, dec!(0));
    assert_eq!(row.daily_pnl, dec!(-7.5));
    assert_eq!(row.current_portfolio_value, dec!(499992.5));

    // No T-1 finalization happened (flat prior).
    assert!(summary.finalized_yesterday_pnl.is_none());

    // Positions stored with entry at the T-1 close and zero placeholders.
    let positions = store
        .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(3));
    assert_eq!(positions[0].average_price, dec!(4000));
    assert_eq!(positions[0].realized_pnl, dec!(0));
    assert_eq!(positions[0].unrealized_pnl, dec!(0));

    // Equity curve starts the book off initial capital.
    let equity = store
        .load_equity_point("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap()
        .unwrap();
    assert_eq!(equity.equity, dec!(499992.5));
}

// ── S2: increment same side ─────────────────────────────────────────

#[test]
fn s2_increment_same_side_finalizes_yesterday() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    seed_rising_bars(&store);

    // Thursday 3/7: open +3 at the 3/6 close of 3990.
    run_day(&store, &[("tf", 1.0, &[("ES", 3)])], INITIAL_CAPITAL, false, d(2024, 3, 7), out.path());
    // Friday 3/8: extend to +5; T-1 = 4000, T-2 = 3990.
    let summary = run_day(
        &store,
        &[("tf", 1.0, &[("ES", 5)])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 8),
        out.path(),
    );

    // Yesterday finalized: 3 * (4000 - 3990) * 50 = 1500.
    assert_eq!(summary.finalized_yesterday_pnl, Some(1500.0));
    let yesterday_positions = store
        .load_positions("LIVE_tf", "tf", "BASE_PORTFOLIO", d(2024, 3, 7))
        .unwrap();
    assert_eq!(yesterday_positions[0].realized_pnl, dec!(1500));

    // Yesterday's row nets its own commissions: 1500 - 7.50.
    let yesterday_row = store
        .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 7))
        .unwrap()
        .unwrap();
    assert_eq!(yesterday_row.daily_realized_pnl, dec!(1500));
    assert_eq!(yesterday_row.daily_pnl, dec!(1492.5));
    assert_eq!(yesterday_row.current_portfolio_value, dec!(501492.5));

    // Today: BUY 2 @ 4000, costs 5.00; row carries costs only.
    let executions = store
        .load_executions("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].side, "BUY");
    assert_eq!(executions[0].filled_quantity, dec!(2));

    let today_row = store
        .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap()
        .unwrap();
    assert_eq!(today_row.daily_pnl, dec!(-5));
    assert_eq!(today_row.current_portfolio_value, dec!(501487.5));

    // Yesterday's equity point was rewritten with the finalized value.
    let equity = store
        .load_equity_point("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 7))
        .unwrap()
        .unwrap();
    assert_eq!(equity.equity, dec!(501492.5));
}

// ── S3: sign flip ───────────────────────────────────────────────────

#[test]
fn s3_sign_flip_emits_close_then_open() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    seed_rising_bars(&store);

    run_day(&store, &[("tf", 1.0, &[("ES", 2)])], INITIAL_CAPITAL, false, d(2024, 3, 7), out.path());
    let summary = run_day(
        &store,
        &[("tf", 1.0, &[("ES", -1)])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 8),
        out.path(),
    );

    // Finalization: 2 * (4000 - 3990) * 50 = 1000.
    assert_eq!(summary.finalized_yesterday_pnl, Some(1000.0));

    // Two executions: close 2, open 1, both sells; commissions 7.50 total.
    let executions = store
        .load_executions("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.side == "SELL"));
    let mut quantities: Vec<_> = executions.iter().map(|e| e.filled_quantity).collect();
    quantities.sort();
    assert_eq!(quantities, vec![dec!(1), dec!(2)]);
    let commissions: rust_decimal::Decimal = executions.iter().map(|e| e.commission).sum();
    assert_eq!(commissions, dec!(7.5));

    let positions = store
        .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(positions[0].quantity, dec!(-1));
}

// ── S4: close to flat on a losing move ──────────────────────────────

#[test]
fn s4_close_to_flat_books_the_loss() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    // Falling closes: 3/5 4005, 3/6 4010, 3/7 4000.
    store
        .insert_bars(&[
            bar(d(2024, 3, 5), 4005.0),
            bar(d(2024, 3, 6), 4010.0),
            bar(d(2024, 3, 7), 4000.0),
        ])
        .unwrap();

    run_day(&store, &[("tf", 1.0, &[("ES", 2)])], INITIAL_CAPITAL, false, d(2024, 3, 7), out.path());
    let summary = run_day(
        &store,
        &[("tf", 1.0, &[])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 8),
        out.path(),
    );

    // Finalization: 2 * (4000 - 4010) * 50 = -1000.
    assert_eq!(summary.finalized_yesterday_pnl, Some(-1000.0));
    let yesterday = store
        .load_positions("LIVE_tf", "tf", "BASE_PORTFOLIO", d(2024, 3, 7))
        .unwrap();
    assert_eq!(yesterday[0].realized_pnl, dec!(-1000));

    // One SELL 2 @ 4000 closes the book; no day-T ES position row.
    let executions = store
        .load_executions("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].side, "SELL");
    assert_eq!(executions[0].filled_quantity, dec!(2));
    assert_eq!(executions[0].fill_price, dec!(4000));

    let today_positions = store
        .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert!(today_positions.is_empty());
    assert_eq!(summary.active_positions, 0);
}

// ── S5: proportional scaling under the net-leverage cap ─────────────

#[test]
fn s5_risk_cap_scales_every_symbol_proportionally() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    // Quiet closes around 4000 for ten weekdays ending 3/7.
    let mut bars = Vec::new();
    for (i, day) in [(0, 26), (1, 27), (2, 28), (3, 29), (4, 1), (5, 4), (6, 5), (7, 6), (8, 7)] {
        let month = if day >= 26 { 2 } else { 3 };
        bars.push(bar(
            d(2024, month, day),
            4000.0 + if i % 2 == 0 { 1.0 } else { -1.0 },
        ));
    }
    store.insert_bars(&bars).unwrap();

    // Raw aggregate: 0.5 * 30 + 0.5 * 20 = 25 contracts -> ~2.5x net on
    // 2.0M equity, capped at 2.0 -> scale ~0.8 -> 20 contracts.
    run_day(
        &store,
        &[("a", 0.5, &[("ES", 30)]), ("b", 0.5, &[("ES", 20)])],
        2_000_000.0,
        true,
        d(2024, 3, 8),
        out.path(),
    );

    let aggregate = store
        .load_positions("LIVE_a_b", "LIVE_a_b", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(aggregate[0].quantity, dec!(20));

    // Per-strategy shares scale by the same ratio.
    let a = store
        .load_positions("LIVE_a_b", "a", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    let b = store
        .load_positions("LIVE_a_b", "b", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(a[0].quantity, dec!(12));
    assert_eq!(b[0].quantity, dec!(8));
}

// ── S6: rerun idempotence ───────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct TableSnapshot {
    positions_t1_strategy: Vec<daytrend_runner::store::PositionRow>,
    positions_t1_aggregate: Vec<daytrend_runner::store::PositionRow>,
    positions_t_aggregate: Vec<daytrend_runner::store::PositionRow>,
    executions: Vec<daytrend_runner::store::ExecutionRow>,
    row_t1: Option<daytrend_runner::store::LiveResultRow>,
    row_t: Option<daytrend_runner::store::LiveResultRow>,
    equity_t1: Option<daytrend_runner::store::EquityPoint>,
    equity_t: Option<daytrend_runner::store::EquityPoint>,
}

fn snapshot(store: &SqliteStore) -> TableSnapshot {
    TableSnapshot {
        positions_t1_strategy: store
            .load_positions("LIVE_tf", "tf", "BASE_PORTFOLIO", d(2024, 3, 7))
            .unwrap(),
        positions_t1_aggregate: store
            .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 7))
            .unwrap(),
        positions_t_aggregate: store
            .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
            .unwrap(),
        executions: store
            .load_executions("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
            .unwrap(),
        row_t1: store
            .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 7))
            .unwrap(),
        row_t: store
            .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
            .unwrap(),
        equity_t1: store
            .load_equity_point("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 7))
            .unwrap(),
        equity_t: store
            .load_equity_point("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
            .unwrap(),
    }
}

#[test]
fn s6_rerunning_a_day_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    seed_rising_bars(&store);

    run_day(&store, &[("tf", 1.0, &[("ES", 3)])], INITIAL_CAPITAL, false, d(2024, 3, 7), out.path());
    run_day(&store, &[("tf", 1.0, &[("ES", 5)])], INITIAL_CAPITAL, false, d(2024, 3, 8), out.path());
    let first = snapshot(&store);

    // Re-run 3/8 with identical inputs: every table identical afterwards.
    run_day(&store, &[("tf", 1.0, &[("ES", 5)])], INITIAL_CAPITAL, false, d(2024, 3, 8), out.path());
    let second = snapshot(&store);

    assert_eq!(first, second);
}

// ── Weekend boundary: no T-2 closes ─────────────────────────────────

#[test]
fn weekend_boundary_skips_finalization_cleanly() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    // A single bar: T-1 exists, T-2 does not.
    store.insert_bars(&[bar(d(2024, 3, 7), 4000.0)]).unwrap();

    run_day(&store, &[("tf", 1.0, &[("ES", 2)])], INITIAL_CAPITAL, false, d(2024, 3, 8), out.path());
    // Monday 3/11 run: window ends Friday 3/8, still only the 3/7 bar.
    let summary = run_day(
        &store,
        &[("tf", 1.0, &[("ES", 2)])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 11),
        out.path(),
    );

    // Finalization skipped entirely; Friday's positions keep zero PnL.
    assert!(summary.finalized_yesterday_pnl.is_none());
    let friday = store
        .load_positions("LIVE_tf", "tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap();
    assert_eq!(friday[0].realized_pnl, dec!(0));

    // Friday's result row is untouched; Monday's row carries zero costs
    // (no position change) and no corruption of cumulatives.
    let friday_row = store
        .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 8))
        .unwrap()
        .unwrap();
    assert_eq!(friday_row.daily_pnl, dec!(-5));
    let monday_row = store
        .load_live_result("LIVE_tf", "BASE_PORTFOLIO", d(2024, 3, 11))
        .unwrap()
        .unwrap();
    assert_eq!(monday_row.daily_pnl, dec!(0));
    assert_eq!(monday_row.current_portfolio_value, dec!(499995));
}

// ── Real forecast engine through the pipeline ───────────────────────

#[test]
fn trend_strategy_writes_signals_and_positions() {
    use daytrend_core::strategy::{TrendConfig, TrendStrategy, TrendVariant};

    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();

    // Sixty noisy up-trending closes ending Thursday 3/7.
    let start = d(2024, 1, 8);
    let bars: Vec<Bar> = (0..60)
        .map(|i| {
            let close = 4000.0 + i as f64 * 4.0 + if i % 2 == 0 { 1.5 } else { -1.5 };
            bar(start + chrono::Duration::days(i as i64), close)
        })
        .collect();
    store.insert_bars(&bars).unwrap();
    let target = bars.last().unwrap().date.succ_opt().unwrap();

    let mut portfolio_config = PortfolioConfig::new(INITIAL_CAPITAL);
    portfolio_config.use_optimization = false;
    portfolio_config.use_risk_management = false;
    let mut portfolio = PortfolioManager::new(portfolio_config, registry());
    let trend_config = TrendConfig {
        weight: 1.0,
        idm: 1.0,
        ema_windows: vec![(2, 8)],
        vol_lookback_short: 8,
        vol_lookback_long: 16,
        use_position_buffering: false,
        ..TrendConfig::defaults_for(TrendVariant::Standard)
    };
    portfolio
        .add_strategy(
            Box::new(TrendStrategy::new(
                "tf",
                TrendVariant::Standard,
                trend_config,
                INITIAL_CAPITAL,
                registry(),
            )),
            1.0,
        )
        .unwrap();

    let mut pipeline_config = PipelineConfig::new("BASE_PORTFOLIO", INITIAL_CAPITAL);
    pipeline_config.results_root = out.path().to_path_buf();
    let mut runner = DailyRunner::new(
        &store,
        registry(),
        portfolio,
        TradingCalendar::new(),
        pipeline_config,
    );
    let summary = runner.run(target, true).unwrap();

    // The uptrend forecasts long and the pipeline persists it end to end.
    let signals = store
        .load_signals("LIVE_tf", "tf", "BASE_PORTFOLIO", target)
        .unwrap();
    assert_eq!(signals.len(), 1);
    assert!(signals[0].forecast > 0.0);

    let positions = store
        .load_positions("LIVE_tf", "LIVE_tf", "BASE_PORTFOLIO", target)
        .unwrap();
    assert_eq!(positions.len(), 1);
    assert!(positions[0].quantity > dec!(0));
    assert_eq!(positions[0].realized_pnl, dec!(0));
    assert!(summary.executions >= 1);
}

// ── Combined id and signals keying ──────────────────────────────────

#[test]
fn combined_id_is_permutation_invariant_across_runs() {
    let store = SqliteStore::open_in_memory().unwrap();
    let out = tempfile::TempDir::new().unwrap();
    seed_rising_bars(&store);

    let summary = run_day(
        &store,
        &[("b", 0.5, &[("ES", 2)]), ("a", 0.5, &[("ES", 2)])],
        INITIAL_CAPITAL,
        false,
        d(2024, 3, 8),
        out.path(),
    );
    assert_eq!(summary.combined_strategy_id, "LIVE_a_b");
}
