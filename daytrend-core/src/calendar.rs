//! Trading-day accounting: weekday counts, annualization, day arithmetic.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};

/// Trading days per year used for annualization and vol scaling.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Weekend-aware (and optionally holiday-aware) calendar.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Most recent trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date.pred_opt().expect("date arithmetic underflow");
        while !self.is_trading_day(day) {
            day = day.pred_opt().expect("date arithmetic underflow");
        }
        day
    }

    /// Count of trading days in (start, target], minimum 1.
    ///
    /// This is the `n` in the annualization exponent; clamping at 1 keeps
    /// the first live day well-defined.
    pub fn trading_days_between(&self, start: NaiveDate, target: NaiveDate) -> u32 {
        if target <= start {
            return 1;
        }
        let mut count = 0u32;
        let mut day = start.succ_opt().expect("date arithmetic overflow");
        while day <= target {
            if self.is_trading_day(day) {
                count += 1;
            }
            day = day.succ_opt().expect("date arithmetic overflow");
        }
        count.max(1)
    }
}

/// Geometric annualization: ((1 + r)^(252/n) - 1) * 100, with n >= 1.
///
/// `total_return_decimal` is a decimal (0.05 = 5%), the result a percentage.
pub fn annualized_return_pct(total_return_decimal: f64, trading_days: u32) -> f64 {
    let n = trading_days.max(1) as f64;
    ((1.0 + total_return_decimal).powf(TRADING_DAYS_PER_YEAR / n) - 1.0) * 100.0
}
