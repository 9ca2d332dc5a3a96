//! PriceManager — aligned close snapshots for the settlement-lag model.
//!
//! Three maps per symbol: current (latest observed), previous-day (T-1) and
//! two-days-ago (T-2). T-1 prices every execution and margin computation;
//! T-2 exists solely so yesterday's PnL can be finalized. Consumers get a
//! hard `DataNotFound` for absent symbols — never a silent zero.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::Bar;
use crate::error::CoreError;

/// Admissible close range; anything outside fails the run.
const PRICE_MIN: f64 = 1e-4;
const PRICE_MAX: f64 = 1e6;

#[derive(Debug, Default)]
pub struct PriceManager {
    current: HashMap<String, f64>,
    previous_day: HashMap<String, f64>,
    two_days_ago: HashMap<String, f64>,
}

impl PriceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the T-1 / T-2 snapshots from a bar window.
    ///
    /// Bars are grouped per symbol and ordered by date; the last bar at or
    /// before `target_date` fills the previous-day map and the second-to-last
    /// fills the two-days-ago map. A symbol with fewer than two usable bars
    /// is tolerated with a warning — the PnL manager applies its own skip
    /// rule when T-2 is missing. For weekends and holidays the last bar at
    /// or before the target is automatically the last trading day.
    pub fn update_from_bars(&mut self, bars: &[Bar], target_date: NaiveDate) -> Result<(), CoreError> {
        let mut by_symbol: BTreeMap<&str, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            if bar.date <= target_date {
                by_symbol.entry(bar.symbol.as_str()).or_default().push(bar);
            }
        }

        self.current.clear();
        self.previous_day.clear();
        self.two_days_ago.clear();

        for (symbol, mut symbol_bars) in by_symbol {
            symbol_bars.sort_by_key(|b| b.date);

            let Some(last) = symbol_bars.last() else {
                warn!(symbol, "no bars available for symbol");
                continue;
            };
            validate_price(symbol, last.close)?;
            self.previous_day.insert(symbol.to_string(), last.close);
            self.current.insert(symbol.to_string(), last.close);
            debug!(symbol, close = last.close, date = %last.date, "T-1 close");

            if symbol_bars.len() >= 2 {
                let second_last = symbol_bars[symbol_bars.len() - 2];
                validate_price(symbol, second_last.close)?;
                self.two_days_ago.insert(symbol.to_string(), second_last.close);
                debug!(symbol, close = second_last.close, date = %second_last.date, "T-2 close");
            } else {
                warn!(symbol, bars = symbol_bars.len(), "no T-2 bar available");
            }
        }

        debug!(
            t1 = self.previous_day.len(),
            t2 = self.two_days_ago.len(),
            "price snapshots updated from bars"
        );
        Ok(())
    }

    /// Sequential-replay ingestion: shift the cached snapshots one day back,
    /// then accept the new closes as current.
    pub fn advance_with_closes(&mut self, closes: &HashMap<String, f64>) -> Result<(), CoreError> {
        for (symbol, close) in closes {
            validate_price(symbol, *close)?;
        }
        self.shift_prices();
        for (symbol, close) in closes {
            self.current.insert(symbol.clone(), *close);
            self.previous_day.insert(symbol.clone(), *close);
        }
        Ok(())
    }

    /// Advance the snapshots without new data (weekend rollover in replay):
    /// current becomes previous-day, previous-day becomes two-days-ago.
    pub fn shift_prices(&mut self) {
        self.two_days_ago = std::mem::take(&mut self.previous_day);
        self.previous_day = self.current.clone();
    }

    pub fn previous_day_price(&self, symbol: &str) -> Result<f64, CoreError> {
        self.previous_day
            .get(symbol)
            .copied()
            .ok_or_else(|| CoreError::data_not_found(format!("no previous-day close for {symbol}")))
    }

    pub fn two_days_ago_price(&self, symbol: &str) -> Result<f64, CoreError> {
        self.two_days_ago
            .get(symbol)
            .copied()
            .ok_or_else(|| CoreError::data_not_found(format!("no two-days-ago close for {symbol}")))
    }

    /// Latest observed price; falls back to the previous-day close.
    pub fn latest_price(&self, symbol: &str) -> Result<f64, CoreError> {
        if let Some(px) = self.current.get(symbol) {
            return Ok(*px);
        }
        self.previous_day_price(symbol)
    }

    pub fn all_previous_day_prices(&self) -> &HashMap<String, f64> {
        &self.previous_day
    }

    pub fn all_two_days_ago_prices(&self) -> &HashMap<String, f64> {
        &self.two_days_ago
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.previous_day.clear();
        self.two_days_ago.clear();
    }
}

fn validate_price(symbol: &str, price: f64) -> Result<(), CoreError> {
    if !price.is_finite() || price <= PRICE_MIN || price >= PRICE_MAX {
        return Err(CoreError::invalid_data(format!(
            "close {price} for {symbol} outside admissible range ({PRICE_MIN}, {PRICE_MAX})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, ymd: (i32, u32, u32), close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            date: NaiveDate::from_ymd_opt(ymd.0, ymd.1, ymd.2).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
    }

    #[test]
    fn latest_two_bars_fill_t1_and_t2() {
        let mut pm = PriceManager::new();
        let bars = vec![
            bar("ES", (2024, 3, 7), 3980.0),
            bar("ES", (2024, 3, 8), 3990.0),
            // Out of order on purpose: update_from_bars must sort.
            bar("ES", (2024, 3, 6), 3975.0),
        ];
        pm.update_from_bars(&bars, target()).unwrap();
        assert_eq!(pm.previous_day_price("ES").unwrap(), 3990.0);
        assert_eq!(pm.two_days_ago_price("ES").unwrap(), 3980.0);
    }

    #[test]
    fn bars_after_target_date_are_ignored() {
        let mut pm = PriceManager::new();
        let bars = vec![
            bar("ES", (2024, 3, 8), 3990.0),
            bar("ES", (2024, 3, 11), 4000.0),
            bar("ES", (2024, 3, 12), 4040.0), // future bar, must not leak in
        ];
        pm.update_from_bars(&bars, target()).unwrap();
        assert_eq!(pm.previous_day_price("ES").unwrap(), 4000.0);
        assert_eq!(pm.two_days_ago_price("ES").unwrap(), 3990.0);
    }

    #[test]
    fn single_bar_leaves_t2_empty() {
        let mut pm = PriceManager::new();
        pm.update_from_bars(&[bar("ES", (2024, 3, 8), 3990.0)], target())
            .unwrap();
        assert_eq!(pm.previous_day_price("ES").unwrap(), 3990.0);
        assert!(pm.two_days_ago_price("ES").is_err());
    }

    #[test]
    fn missing_symbol_is_data_not_found() {
        let pm = PriceManager::new();
        assert!(matches!(
            pm.previous_day_price("ES"),
            Err(CoreError::DataNotFound(_))
        ));
    }

    #[test]
    fn out_of_range_price_fails_the_run() {
        let mut pm = PriceManager::new();
        let bars = vec![bar("ES", (2024, 3, 8), 0.0)];
        assert!(pm.update_from_bars(&bars, target()).is_err());

        let bars = vec![bar("ES", (2024, 3, 8), 2_000_000.0)];
        assert!(pm.update_from_bars(&bars, target()).is_err());
    }

    #[test]
    fn shift_prices_rolls_snapshots_back() {
        let mut pm = PriceManager::new();
        let bars = vec![
            bar("ES", (2024, 3, 7), 3980.0),
            bar("ES", (2024, 3, 8), 3990.0),
        ];
        pm.update_from_bars(&bars, target()).unwrap();

        pm.shift_prices();
        assert_eq!(pm.previous_day_price("ES").unwrap(), 3990.0);
        assert_eq!(pm.two_days_ago_price("ES").unwrap(), 3990.0);
    }

    #[test]
    fn advance_with_closes_shifts_then_accepts() {
        let mut pm = PriceManager::new();
        let bars = vec![
            bar("ES", (2024, 3, 7), 3980.0),
            bar("ES", (2024, 3, 8), 3990.0),
        ];
        pm.update_from_bars(&bars, target()).unwrap();

        let mut closes = HashMap::new();
        closes.insert("ES".to_string(), 4005.0);
        pm.advance_with_closes(&closes).unwrap();

        assert_eq!(pm.latest_price("ES").unwrap(), 4005.0);
        assert_eq!(pm.previous_day_price("ES").unwrap(), 4005.0);
        assert_eq!(pm.two_days_ago_price("ES").unwrap(), 3990.0);
    }

    #[test]
    fn advance_rejects_bad_close_before_mutating() {
        let mut pm = PriceManager::new();
        let bars = vec![
            bar("ES", (2024, 3, 7), 3980.0),
            bar("ES", (2024, 3, 8), 3990.0),
        ];
        pm.update_from_bars(&bars, target()).unwrap();

        let mut closes = HashMap::new();
        closes.insert("ES".to_string(), f64::NAN);
        assert!(pm.advance_with_closes(&closes).is_err());
        // Snapshots untouched by the failed advance.
        assert_eq!(pm.previous_day_price("ES").unwrap(), 3990.0);
        assert_eq!(pm.two_days_ago_price("ES").unwrap(), 3980.0);
    }
}
