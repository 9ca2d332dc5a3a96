//! Live metrics: returns, leverage, and margin-derived ratios.
//!
//! All pure functions over the day's aggregates; the annualization itself
//! lives in the core calendar module next to the trading-day count it needs.

/// Daily return in percent; zero when the base value is non-positive.
pub fn daily_return_pct(daily_pnl: f64, previous_portfolio_value: f64) -> f64 {
    if previous_portfolio_value > 0.0 {
        daily_pnl / previous_portfolio_value * 100.0
    } else {
        0.0
    }
}

/// Cumulative return in percent against initial capital.
pub fn total_return_pct(current_portfolio_value: f64, initial_capital: f64) -> f64 {
    if initial_capital > 0.0 {
        (current_portfolio_value - initial_capital) / initial_capital * 100.0
    } else {
        0.0
    }
}

/// Cumulative return as a decimal, the annualization input.
pub fn total_return_decimal(current_portfolio_value: f64, initial_capital: f64) -> f64 {
    if initial_capital > 0.0 {
        (current_portfolio_value - initial_capital) / initial_capital
    } else {
        0.0
    }
}

/// gross notional over portfolio value.
pub fn portfolio_leverage(gross_notional: f64, portfolio_value: f64) -> f64 {
    if portfolio_value > 0.0 {
        gross_notional / portfolio_value
    } else {
        0.0
    }
}

pub fn cash_available(portfolio_value: f64, margin_posted: f64) -> f64 {
    portfolio_value - margin_posted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_return_is_percent_of_previous_value() {
        assert!((daily_return_pct(1500.0, 500_000.0) - 0.3).abs() < 1e-12);
        assert_eq!(daily_return_pct(1500.0, 0.0), 0.0);
    }

    #[test]
    fn total_return_measures_against_initial_capital() {
        assert!((total_return_pct(501_500.0, 500_000.0) - 0.3).abs() < 1e-12);
        assert!((total_return_decimal(501_500.0, 500_000.0) - 0.003).abs() < 1e-12);
        assert_eq!(total_return_pct(501_500.0, 0.0), 0.0);
    }

    #[test]
    fn leverage_guards_division() {
        assert!((portfolio_leverage(600_000.0, 500_000.0) - 1.2).abs() < 1e-12);
        assert_eq!(portfolio_leverage(600_000.0, 0.0), 0.0);
    }

    #[test]
    fn cash_available_subtracts_margin() {
        assert_eq!(cash_available(499_992.5, 36_000.0), 463_992.5);
    }
}
