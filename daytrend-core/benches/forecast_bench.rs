//! Forecast engine benchmark: one 300-bar daily window per symbol.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use daytrend_core::domain::{Bar, Instrument};
use daytrend_core::registry::InstrumentRegistry;
use daytrend_core::strategy::{Strategy, TrendConfig, TrendStrategy, TrendVariant};

fn make_bars(symbol: &str, n: usize) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let close = 4000.0 + (i as f64 * 0.7).sin() * 35.0 + i as f64 * 0.5;
            Bar {
                symbol: symbol.into(),
                date: start + chrono::Duration::days(i as i64),
                open: close,
                high: close + 5.0,
                low: close - 5.0,
                close,
                volume: 1_000_000,
            }
        })
        .collect()
}

fn bench_forecast(c: &mut Criterion) {
    let registry = InstrumentRegistry::shared(vec![Instrument {
        symbol: "ES".into(),
        multiplier: 50.0,
        tick_size: 0.25,
        initial_margin: 12_000.0,
        maintenance_margin: 11_000.0,
        commission_per_contract: 2.50,
        trading_hours: "17:00-16:00 CT".into(),
        expiry: None,
    }])
    .unwrap();
    let bars = make_bars("ES", 300);

    c.bench_function("trend_on_data_300_bars", |b| {
        b.iter(|| {
            let mut strat = TrendStrategy::new(
                "tf",
                TrendVariant::Standard,
                TrendConfig::defaults_for(TrendVariant::Standard),
                500_000.0,
                registry.clone(),
            );
            strat.on_data(black_box(&bars)).unwrap();
            black_box(strat.position("ES"))
        })
    });
}

criterion_group!(benches, bench_forecast);
criterion_main!(benches);
