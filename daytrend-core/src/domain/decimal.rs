//! Fixed-point boundary between f64 computation and persisted values.
//!
//! All arithmetic at the persistence boundary uses `rust_decimal::Decimal`
//! quantized to 8 decimal places; internal computation stays in f64. Ties
//! round half-to-even, which is also the rule for fractional contracts.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Scale applied to every persisted scalar (price, quantity, margin, PnL).
pub const STORED_SCALE: u32 = 8;

/// Quantize an f64 for storage: 8 decimal places, banker's rounding.
///
/// Non-finite inputs map to zero; callers validate finiteness before the
/// boundary, so this is a backstop rather than a policy.
pub fn to_stored(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(STORED_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Quantize a Decimal already in hand to the stored scale.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(STORED_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Read a stored Decimal back into f64 computation space.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Round a fractional contract count to a whole number of contracts,
/// half-to-even (banker's rounding).
pub fn round_contracts(quantity: f64) -> i64 {
    if !quantity.is_finite() {
        return 0;
    }
    let floor = quantity.floor();
    let frac = quantity - floor;
    let base = floor as i64;
    if (frac - 0.5).abs() < f64::EPSILON {
        // Exactly half: round to the even neighbor.
        if base % 2 == 0 {
            base
        } else {
            base + 1
        }
    } else if frac > 0.5 {
        base + 1
    } else {
        base
    }
}
