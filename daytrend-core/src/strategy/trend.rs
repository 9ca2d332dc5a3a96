//! Trend-following forecast engine.
//!
//! One engine, three parameter sets (standard / fast / slow). Per symbol and
//! bar:
//! 1. Append the close to the rolling history.
//! 2. Blend short/long return volatility: sigma = sqrt((s^2 + l^2) / 2),
//!    annualized by sqrt(252).
//! 3. For each EMA pair (f, s): crossover = EMA_f - EMA_s, raw forecast =
//!    crossover / (price * sigma / 16).
//! 4. Normalize each pair so its long-run mean |x| sits near 10, clamp to
//!    [-20, 20].
//! 5. Combine as the pair mean times the forecast diversification
//!    multiplier for the number of active pairs; clamp again.
//! 6. Size: forecast * capital * risk_target * idm * weight
//!    / (10 * price * sigma * multiplier).
//! 7. Optionally buffer against the prior rounded position, then round
//!    half-to-even to whole contracts.
//!
//! Symbols with less history than the longest slow EMA window produce a zero
//! forecast and zero position.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::TRADING_DAYS_PER_YEAR;
use crate::domain::{round_contracts, Bar};
use crate::error::CoreError;
use crate::registry::InstrumentRegistry;
use crate::strategy::Strategy;

/// Forecasts are conviction-scaled and hard-bounded.
pub const FORECAST_CAP: f64 = 20.0;

/// Long-run target for the mean absolute pair forecast.
const FORECAST_TARGET_ABS: f64 = 10.0;

/// Buffer half-width fraction of the vol-scaled capital unit.
const BUFFER_FRACTION: f64 = 0.1;

/// Strategy variant: one forecast algorithm, different numeric defaults.
/// The variant name exists only for result-store labeling and default
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendVariant {
    Standard,
    Fast,
    Slow,
}

impl TrendVariant {
    pub fn type_name(self) -> &'static str {
        match self {
            TrendVariant::Standard => "TrendFollowingStrategy",
            TrendVariant::Fast => "TrendFollowingFastStrategy",
            TrendVariant::Slow => "TrendFollowingSlowStrategy",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "TrendFollowingStrategy" => Some(TrendVariant::Standard),
            "TrendFollowingFastStrategy" => Some(TrendVariant::Fast),
            "TrendFollowingSlowStrategy" => Some(TrendVariant::Slow),
            _ => None,
        }
    }
}

/// Per-strategy forecast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub weight: f64,
    pub risk_target: f64,
    /// Intra-diversification multiplier across instruments.
    pub idm: f64,
    pub ema_windows: Vec<(usize, usize)>,
    /// Forecast diversification multiplier keyed by active-pair count.
    pub fdm: BTreeMap<usize, f64>,
    pub vol_lookback_short: usize,
    pub vol_lookback_long: usize,
    pub use_position_buffering: bool,
}

impl TrendConfig {
    pub fn defaults_for(variant: TrendVariant) -> Self {
        let base = Self {
            weight: 0.03,
            risk_target: 0.2,
            idm: 2.5,
            ema_windows: vec![(2, 8), (4, 16), (8, 32), (16, 64), (32, 128), (64, 256)],
            fdm: default_fdm(),
            vol_lookback_short: 32,
            vol_lookback_long: 252,
            use_position_buffering: true,
        };
        match variant {
            TrendVariant::Standard => base,
            TrendVariant::Fast => Self {
                risk_target: 0.25,
                ema_windows: vec![(2, 8), (4, 16), (8, 32)],
                vol_lookback_short: 16,
                use_position_buffering: false,
                ..base
            },
            TrendVariant::Slow => Self {
                risk_target: 0.15,
                ema_windows: vec![(4, 16), (8, 32), (16, 64), (32, 128), (64, 256), (128, 512)],
                vol_lookback_short: 64,
                ..base
            },
        }
    }

    /// Diversification multiplier for a given number of active pairs.
    /// Counts above the table take the largest configured entry.
    pub fn fdm_for(&self, active_pairs: usize) -> f64 {
        if active_pairs == 0 {
            return 1.0;
        }
        self.fdm
            .range(..=active_pairs)
            .next_back()
            .map(|(_, v)| *v)
            .unwrap_or(1.0)
    }

    /// The longest slow window: the warmup gate for the whole forecast.
    pub fn longest_slow_window(&self) -> usize {
        self.ema_windows.iter().map(|(_, s)| *s).max().unwrap_or(0)
    }

    fn history_capacity(&self) -> usize {
        self.vol_lookback_long.max(self.longest_slow_window()) + 1
    }
}

fn default_fdm() -> BTreeMap<usize, f64> {
    [(1, 1.0), (2, 1.03), (3, 1.08), (4, 1.13), (5, 1.19), (6, 1.26)]
        .into_iter()
        .collect()
}

/// Streaming EMA: SMA seed over the first `period` values, recursive after.
#[derive(Debug, Clone)]
struct EmaState {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl EmaState {
    fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    fn update(&mut self, close: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                let next = self.alpha * close + (1.0 - self.alpha) * prev;
                self.value = Some(next);
                self.value
            }
            None => {
                self.seed_sum += close;
                self.seed_count += 1;
                if self.seed_count >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
                self.value
            }
        }
    }
}

/// Crossover state for one (fast, slow) pair, with the expanding mean of the
/// absolute raw forecast used for normalization.
#[derive(Debug, Clone)]
struct EmaPair {
    fast: EmaState,
    slow: EmaState,
    abs_sum: f64,
    abs_count: u64,
}

impl EmaPair {
    fn new(fast: usize, slow: usize) -> Self {
        assert!(slow > fast, "slow window must exceed fast window");
        Self {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            abs_sum: 0.0,
            abs_count: 0,
        }
    }

    /// Update both EMAs and return the normalized, clamped pair forecast.
    /// None until the slow EMA has seeded.
    fn update(&mut self, close: f64, vol_scale: f64) -> Option<f64> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return None;
        };
        if vol_scale <= 0.0 || !vol_scale.is_finite() {
            return None;
        }
        let raw = (fast - slow) / vol_scale;
        self.abs_sum += raw.abs();
        self.abs_count += 1;
        let abs_mean = self.abs_sum / self.abs_count as f64;
        if abs_mean <= f64::EPSILON {
            return Some(0.0);
        }
        let scaled = raw * FORECAST_TARGET_ABS / abs_mean;
        Some(scaled.clamp(-FORECAST_CAP, FORECAST_CAP))
    }
}

/// Per-symbol forecast state.
#[derive(Debug, Clone)]
struct InstrumentState {
    closes: VecDeque<f64>,
    pairs: Vec<EmaPair>,
    current_forecast: f64,
    current_position: i64,
}

impl InstrumentState {
    fn new(config: &TrendConfig) -> Self {
        Self {
            closes: VecDeque::with_capacity(config.history_capacity()),
            pairs: config
                .ema_windows
                .iter()
                .map(|(f, s)| EmaPair::new(*f, *s))
                .collect(),
            current_forecast: 0.0,
            current_position: 0,
        }
    }
}

/// The trend-following strategy engine.
pub struct TrendStrategy {
    id: String,
    variant: TrendVariant,
    config: TrendConfig,
    capital_allocation: f64,
    registry: Arc<InstrumentRegistry>,
    instruments: HashMap<String, InstrumentState>,
}

impl TrendStrategy {
    pub fn new(
        id: impl Into<String>,
        variant: TrendVariant,
        config: TrendConfig,
        capital_allocation: f64,
        registry: Arc<InstrumentRegistry>,
    ) -> Self {
        Self {
            id: id.into(),
            variant,
            config,
            capital_allocation,
            registry,
            instruments: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    fn process_bar(&mut self, symbol: &str, close: f64) {
        let Ok(instrument) = self.registry.get(symbol) else {
            // Unknown symbol: opt-in by config, stay flat rather than fail.
            return;
        };
        let multiplier = instrument.multiplier;

        let config = &self.config;
        let state = self
            .instruments
            .entry(symbol.to_string())
            .or_insert_with(|| InstrumentState::new(config));

        state.closes.push_back(close);
        while state.closes.len() > config.history_capacity() {
            state.closes.pop_front();
        }

        let sigma = blended_vol(
            &state.closes,
            config.vol_lookback_short,
            config.vol_lookback_long,
        );

        // EMAs must advance every bar even during warmup.
        let vol_scale = sigma.map(|s| close * s / 16.0).unwrap_or(0.0);
        let mut pair_forecasts = Vec::with_capacity(state.pairs.len());
        for pair in &mut state.pairs {
            if let Some(forecast) = pair.update(close, vol_scale) {
                pair_forecasts.push(forecast);
            }
        }

        let warmed_up = state.closes.len() >= config.longest_slow_window();
        let Some(sigma) = sigma else {
            state.current_forecast = 0.0;
            state.current_position = 0;
            return;
        };
        if !warmed_up || pair_forecasts.is_empty() || sigma <= 0.0 {
            state.current_forecast = 0.0;
            state.current_position = 0;
            return;
        }

        let mean: f64 = pair_forecasts.iter().sum::<f64>() / pair_forecasts.len() as f64;
        let combined =
            (mean * config.fdm_for(pair_forecasts.len())).clamp(-FORECAST_CAP, FORECAST_CAP);
        state.current_forecast = combined;

        let denom = 10.0 * close * sigma * multiplier;
        if denom <= 0.0 || !denom.is_finite() {
            state.current_position = 0;
            return;
        }
        let raw_target = combined * self.capital_allocation * config.risk_target * config.idm
            * config.weight
            / denom;

        let target = if config.use_position_buffering {
            let buffer =
                BUFFER_FRACTION * self.capital_allocation * config.risk_target
                    / (close * sigma * multiplier);
            buffered_target(raw_target, state.current_position, buffer)
        } else {
            raw_target
        };

        state.current_position = round_contracts(target);
        debug!(
            strategy = %self.id,
            symbol,
            forecast = combined,
            position = state.current_position,
            "forecast updated"
        );
    }
}

/// Apply the no-trade buffer: keep the prior position when it sits within
/// +/- `buffer` of the raw target, otherwise snap to the nearest edge.
fn buffered_target(raw_target: f64, prior: i64, buffer: f64) -> f64 {
    let prior = prior as f64;
    if !buffer.is_finite() || buffer <= 0.0 {
        return raw_target;
    }
    if (raw_target - prior).abs() <= buffer {
        prior
    } else if prior < raw_target {
        raw_target - buffer
    } else {
        raw_target + buffer
    }
}

/// Blended and annualized return volatility:
/// sqrt((var_short + var_long) / 2) * sqrt(252).
/// None until at least two returns are observable.
fn blended_vol(closes: &VecDeque<f64>, lookback_short: usize, lookback_long: usize) -> Option<f64> {
    let returns: Vec<f64> = closes
        .iter()
        .zip(closes.iter().skip(1))
        .map(|(prev, next)| next / prev - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let short = tail_variance(&returns, lookback_short)?;
    let long = tail_variance(&returns, lookback_long)?;
    let blended = (0.5 * (short + long)).sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    blended.is_finite().then_some(blended)
}

/// Sample variance of the last `k` observations (ddof = 1).
fn tail_variance(returns: &[f64], k: usize) -> Option<f64> {
    let n = returns.len().min(k);
    if n < 2 {
        return None;
    }
    let tail = &returns[returns.len() - n..];
    let mean = tail.iter().sum::<f64>() / n as f64;
    let var = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    var.is_finite().then_some(var)
}

impl Strategy for TrendStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn variant_name(&self) -> &'static str {
        self.variant.type_name()
    }

    fn capital_allocation(&self) -> f64 {
        self.capital_allocation
    }

    fn set_capital_allocation(&mut self, capital: f64) {
        self.capital_allocation = capital;
    }

    fn on_data(&mut self, bars: &[Bar]) -> Result<(), CoreError> {
        // Stable per-symbol date order regardless of input interleaving.
        let mut ordered: Vec<&Bar> = bars.iter().filter(|b| !b.is_void()).collect();
        ordered.sort_by(|a, b| (a.symbol.as_str(), a.date).cmp(&(b.symbol.as_str(), b.date)));
        for bar in ordered {
            self.process_bar(&bar.symbol, bar.close);
        }
        Ok(())
    }

    fn forecast(&self, symbol: &str) -> f64 {
        self.instruments
            .get(symbol)
            .map(|s| s.current_forecast)
            .unwrap_or(0.0)
    }

    fn position(&self, symbol: &str) -> i64 {
        self.instruments
            .get(symbol)
            .map(|s| s.current_position)
            .unwrap_or(0)
    }

    fn signals(&self) -> BTreeMap<String, f64> {
        self.instruments
            .iter()
            .map(|(symbol, state)| (symbol.clone(), state.current_forecast))
            .collect()
    }

    fn positions(&self) -> BTreeMap<String, i64> {
        self.instruments
            .iter()
            .map(|(symbol, state)| (symbol.clone(), state.current_position))
            .collect()
    }

    fn closes(&self, symbol: &str) -> Vec<f64> {
        self.instruments
            .get(symbol)
            .map(|s| s.closes.iter().copied().collect())
            .unwrap_or_default()
    }
}
