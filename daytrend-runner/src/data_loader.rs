//! MarketDataLoader — the 300-day daily-bar window.
//!
//! Historical runs end the window at the previous trading day so the target
//! date's own close can never leak into the T-1 slot; live runs end at the
//! target date itself (its bar does not exist yet at run time). Ordering and
//! (symbol, date) uniqueness are enforced on load.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use tracing::{info, warn};

use daytrend_core::calendar::TradingCalendar;
use daytrend_core::domain::Bar;

use crate::store::{LiveStore, StoreError};

/// Calendar days of history loaded ahead of the window end.
pub const HISTORY_WINDOW_DAYS: i64 = 300;

pub struct MarketDataLoader<'a, S: LiveStore> {
    store: &'a S,
    calendar: &'a TradingCalendar,
}

impl<'a, S: LiveStore> MarketDataLoader<'a, S> {
    pub fn new(store: &'a S, calendar: &'a TradingCalendar) -> Self {
        Self { store, calendar }
    }

    /// The date the loaded window ends at for a given run.
    pub fn window_end(&self, target_date: NaiveDate, historical: bool) -> NaiveDate {
        if historical {
            self.calendar.previous_trading_day(target_date)
        } else {
            target_date
        }
    }

    /// Load the window for a daily run.
    pub fn load_window(
        &self,
        symbols: &[String],
        target_date: NaiveDate,
        historical: bool,
    ) -> Result<Vec<Bar>, StoreError> {
        let end = self.window_end(target_date, historical);
        let start = end - Duration::days(HISTORY_WINDOW_DAYS);
        let bars = self.store.load_bars(symbols, start, end)?;

        // The driver orders rows; enforce uniqueness and sanity here.
        let mut seen = BTreeSet::new();
        let mut clean = Vec::with_capacity(bars.len());
        for bar in bars {
            if !seen.insert((bar.symbol.clone(), bar.date)) {
                warn!(symbol = %bar.symbol, date = %bar.date, "duplicate bar dropped");
                continue;
            }
            if !bar.is_sane() {
                warn!(symbol = %bar.symbol, date = %bar.date, "insane bar dropped");
                continue;
            }
            clean.push(bar);
        }

        info!(
            bars = clean.len(),
            start = %start,
            end = %end,
            "loaded market data window"
        );
        Ok(clean)
    }
}
