//! Risk management — VaR, jump risk, correlation, and leverage limits.
//!
//! Evaluates the candidate book against hard limits and produces a single
//! scalar <= 1 that restores feasibility when scaling can (VaR, jump risk,
//! leverage). A correlation breach is reported but cannot be cured by
//! scaling, so it never contributes to the scalar. Breaches are never fatal;
//! only missing instrument metadata aborts.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::error::CoreError;
use crate::registry::InstrumentRegistry;

/// Risk limits and estimation parameters.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub confidence_level: f64,
    pub lookback_period: usize,
    /// Daily VaR limit as a fraction of equity.
    pub var_limit: f64,
    /// 99th-percentile single-day drop limit as a fraction of equity.
    pub jump_risk_limit: f64,
    pub max_correlation: f64,
    pub max_gross_leverage: f64,
    pub max_net_leverage: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.99,
            lookback_period: 252,
            var_limit: 0.15,
            jump_risk_limit: 0.10,
            max_correlation: 0.7,
            max_gross_leverage: 4.0,
            max_net_leverage: 2.0,
        }
    }
}

/// Outcome of a risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskResult {
    /// Daily portfolio volatility (fraction of equity).
    pub portfolio_var: f64,
    pub gross_leverage: f64,
    pub net_leverage: f64,
    /// Largest pairwise correlation between strategy return series.
    pub correlation_risk: f64,
    /// 99th-percentile single-day portfolio drop (fraction of equity).
    pub jump_risk: f64,
    /// Multiply all positions by this to restore feasibility (<= 1).
    pub recommended_scale: f64,
    pub breaches: Vec<String>,
}

/// Evaluate the candidate positions.
///
/// `positions` is the optimized fractional book; `closes_by_symbol` holds
/// per-symbol close series oldest-first; `strategy_targets` holds each
/// strategy's allocation-weighted positions, used for the covariance and
/// correlation of strategy returns.
pub fn evaluate(
    positions: &BTreeMap<String, f64>,
    closes_by_symbol: &BTreeMap<String, Vec<f64>>,
    strategy_targets: &BTreeMap<String, BTreeMap<String, f64>>,
    registry: &Arc<InstrumentRegistry>,
    equity: f64,
    config: &RiskConfig,
) -> Result<RiskResult, CoreError> {
    if equity <= 0.0 {
        return Err(CoreError::invalid_data("non-positive equity in risk evaluation"));
    }

    // Leverage from the latest closes.
    let mut gross = 0.0;
    let mut net = 0.0;
    for (symbol, qty) in positions {
        if *qty == 0.0 {
            continue;
        }
        let close = latest_close(closes_by_symbol, symbol)?;
        let multiplier = registry.get(symbol)?.multiplier;
        let notional = qty * close * multiplier;
        gross += notional.abs();
        net += notional;
    }
    let gross_leverage = gross / equity;
    let net_leverage = net.abs() / equity;

    // Per-symbol daily PnL-return series for the lookback window.
    let symbol_returns = symbol_return_series(closes_by_symbol, config.lookback_period);

    // Strategy return series (fraction of equity per day).
    let strategy_series: Vec<(&String, Vec<f64>)> = strategy_targets
        .iter()
        .map(|(id, book)| {
            series_for_book(book, &symbol_returns, registry, equity).map(|s| (id, s))
        })
        .collect::<Result<_, _>>()?;

    // Portfolio daily return series from the candidate book.
    let portfolio_series = series_for_book(positions, &symbol_returns, registry, equity)?;

    // Sample covariance of strategy returns; portfolio variance is the sum
    // of all entries since strategy series are already allocation-weighted.
    let portfolio_sigma = if strategy_series.is_empty() {
        0.0
    } else {
        let sigma = covariance_grand_sum(&strategy_series)?;
        if sigma < 0.0 {
            return Err(CoreError::computation("negative portfolio variance"));
        }
        sigma.sqrt()
    };

    let z = Normal::new(0.0, 1.0)
        .map_err(|e| CoreError::computation(format!("normal distribution: {e}")))?
        .inverse_cdf(config.confidence_level);
    let var_fraction = z * portfolio_sigma;

    let jump_risk = percentile_drop(&portfolio_series, config.confidence_level);
    let correlation_risk = max_pairwise_correlation(&strategy_series);

    // Feasibility scalar: tightest of the scalable limits.
    let mut scale = 1.0f64;
    let mut breaches = Vec::new();
    if var_fraction > config.var_limit {
        breaches.push(format!(
            "VaR {:.4} exceeds limit {:.4}",
            var_fraction, config.var_limit
        ));
        scale = scale.min(config.var_limit / var_fraction);
    }
    if jump_risk > config.jump_risk_limit {
        breaches.push(format!(
            "jump risk {:.4} exceeds limit {:.4}",
            jump_risk, config.jump_risk_limit
        ));
        scale = scale.min(config.jump_risk_limit / jump_risk);
    }
    if gross_leverage > config.max_gross_leverage {
        breaches.push(format!(
            "gross leverage {:.2} exceeds limit {:.2}",
            gross_leverage, config.max_gross_leverage
        ));
        scale = scale.min(config.max_gross_leverage / gross_leverage);
    }
    if net_leverage > config.max_net_leverage {
        breaches.push(format!(
            "net leverage {:.2} exceeds limit {:.2}",
            net_leverage, config.max_net_leverage
        ));
        scale = scale.min(config.max_net_leverage / net_leverage);
    }
    if correlation_risk > config.max_correlation {
        // Scaling cannot reduce correlation; report only.
        breaches.push(format!(
            "pairwise correlation {:.2} exceeds limit {:.2}",
            correlation_risk, config.max_correlation
        ));
    }

    if !scale.is_finite() {
        return Err(CoreError::computation("non-finite risk scale"));
    }

    debug!(
        portfolio_sigma,
        gross_leverage, net_leverage, jump_risk, correlation_risk, scale, "risk evaluation"
    );

    Ok(RiskResult {
        portfolio_var: portfolio_sigma,
        gross_leverage,
        net_leverage,
        correlation_risk,
        jump_risk,
        recommended_scale: scale,
        breaches,
    })
}

fn latest_close(
    closes_by_symbol: &BTreeMap<String, Vec<f64>>,
    symbol: &str,
) -> Result<f64, CoreError> {
    closes_by_symbol
        .get(symbol)
        .and_then(|v| v.last())
        .copied()
        .ok_or_else(|| CoreError::data_not_found(format!("no close series for {symbol}")))
}

/// Per-symbol price-difference series over the lookback, oldest first.
fn symbol_return_series(
    closes_by_symbol: &BTreeMap<String, Vec<f64>>,
    lookback: usize,
) -> BTreeMap<String, Vec<f64>> {
    closes_by_symbol
        .iter()
        .map(|(symbol, closes)| {
            let diffs: Vec<f64> = closes
                .iter()
                .zip(closes.iter().skip(1))
                .map(|(prev, next)| next - prev)
                .collect();
            let start = diffs.len().saturating_sub(lookback);
            (symbol.clone(), diffs[start..].to_vec())
        })
        .collect()
}

/// Daily return series (fraction of equity) for a book of positions held
/// constant over the window. Series are truncated to the shortest symbol.
fn series_for_book(
    book: &BTreeMap<String, f64>,
    symbol_returns: &BTreeMap<String, Vec<f64>>,
    registry: &Arc<InstrumentRegistry>,
    equity: f64,
) -> Result<Vec<f64>, CoreError> {
    let active: Vec<(&String, &f64)> = book.iter().filter(|(_, q)| **q != 0.0).collect();
    if active.is_empty() {
        return Ok(Vec::new());
    }
    let len = active
        .iter()
        .map(|(s, _)| symbol_returns.get(*s).map(|v| v.len()).unwrap_or(0))
        .min()
        .unwrap_or(0);
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut series = vec![0.0; len];
    for (symbol, qty) in active {
        let multiplier = registry.get(symbol)?.multiplier;
        let diffs = &symbol_returns[symbol];
        let offset = diffs.len() - len;
        for (i, d) in diffs[offset..].iter().enumerate() {
            series[i] += *qty * multiplier * d / equity;
        }
    }
    Ok(series)
}

/// Sum of every entry of the sample covariance matrix of the given series —
/// the variance of the summed series. Series shorter than two observations
/// contribute nothing.
fn covariance_grand_sum(series: &[(&String, Vec<f64>)]) -> Result<f64, CoreError> {
    let usable: Vec<&Vec<f64>> = series.iter().map(|(_, s)| s).filter(|s| s.len() >= 2).collect();
    if usable.is_empty() {
        return Ok(0.0);
    }
    let len = usable.iter().map(|s| s.len()).min().unwrap_or(0);
    if len < 2 {
        return Ok(0.0);
    }

    let k = usable.len();
    // Rows are observations, columns are strategies.
    let mut data = DMatrix::zeros(len, k);
    for (col, s) in usable.iter().enumerate() {
        let offset = s.len() - len;
        for row in 0..len {
            data[(row, col)] = s[offset + row];
        }
    }
    let means: Vec<f64> = (0..k).map(|c| data.column(c).mean()).collect();
    let mut grand_sum = 0.0;
    for a in 0..k {
        for b in 0..k {
            let mut cov = 0.0;
            for row in 0..len {
                cov += (data[(row, a)] - means[a]) * (data[(row, b)] - means[b]);
            }
            cov /= (len - 1) as f64;
            if !cov.is_finite() {
                return Err(CoreError::computation("non-finite covariance entry"));
            }
            grand_sum += cov;
        }
    }
    Ok(grand_sum)
}

/// The (1 - confidence) quantile of the series, reported as a positive drop.
fn percentile_drop(series: &[f64], confidence: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((1.0 - confidence) * sorted.len() as f64) as usize;
    (-sorted[index.min(sorted.len() - 1)]).max(0.0)
}

/// Largest pairwise Pearson correlation; zero with fewer than two series.
fn max_pairwise_correlation(series: &[(&String, Vec<f64>)]) -> f64 {
    let usable: Vec<&Vec<f64>> = series.iter().map(|(_, s)| s).filter(|s| s.len() >= 2).collect();
    if usable.len() < 2 {
        return 0.0;
    }
    let len = usable.iter().map(|s| s.len()).min().unwrap_or(0);
    if len < 2 {
        return 0.0;
    }
    let mut max_corr: f64 = 0.0;
    for a in 0..usable.len() {
        for b in (a + 1)..usable.len() {
            let sa = &usable[a][usable[a].len() - len..];
            let sb = &usable[b][usable[b].len() - len..];
            if let Some(corr) = pearson(sa, sb) {
                max_corr = max_corr.max(corr);
            }
        }
    }
    max_corr
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}
