use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

pub const PRICE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct PositionAllocation {
    pub quantity: u64,
    pub trade_value: f64,
    pub commission: f64,
}

#[derive(Debug, PartialEq)]
pub enum PositionSizingOutcome {
    Sized(PositionAllocation),
    InvalidPrice,
    InsufficientCash { required: f64 },
}

pub struct PositionSizingParams {
    pub price: f64,
    pub available_cash: f64,
    pub commission_rate: f64,
}

/// All-cash sizing: the largest whole quantity whose notional plus commission
/// fits in the available cash.
pub fn determine_position_size(params: PositionSizingParams) -> PositionSizingOutcome {
    let PositionSizingParams {
        price,
        available_cash,
        commission_rate,
    } = params;

    if price <= 0.0 || !price.is_finite() {
        return PositionSizingOutcome::InvalidPrice;
    }

    let rate = commission_rate.max(0.0);
    let cost_of = |quantity: u64| {
        let trade_value = quantity as f64 * price;
        (trade_value, trade_value * rate)
    };
    let required = price * (1.0 + rate);
    if !available_cash.is_finite() || available_cash < required {
        return PositionSizingOutcome::InsufficientCash { required };
    }

    let mut quantity = (available_cash / required).floor() as u64;
    // Float division can overshoot by one unit at exact boundaries.
    while quantity > 0 {
        let (trade_value, commission) = cost_of(quantity);
        if trade_value + commission <= available_cash {
            break;
        }
        quantity -= 1;
    }

    if quantity == 0 {
        return PositionSizingOutcome::InsufficientCash { required };
    }

    let (trade_value, commission) = cost_of(quantity);
    PositionSizingOutcome::Sized(PositionAllocation {
        quantity,
        trade_value,
        commission,
    })
}

pub fn initial_stop_loss(entry_price: f64, atr: f64, atr_multiplier: f64) -> Option<f64> {
    if atr > 0.0 && atr.is_finite() && entry_price.is_finite() && atr_multiplier > 0.0 {
        Some(entry_price - atr_multiplier * atr)
    } else {
        None
    }
}

#[derive(Debug, PartialEq)]
pub enum TrailingStopUpdate {
    Chandelier(f64),
}

impl TrailingStopUpdate {
    pub fn value(&self) -> f64 {
        match self {
            TrailingStopUpdate::Chandelier(value) => *value,
        }
    }
}

pub struct TrailingStopParams {
    pub highest_high: f64,
    pub atr: f64,
    pub atr_multiplier: f64,
    pub current_stop: f64,
}

/// Chandelier exit candidate, returned only when it raises the current stop.
pub fn compute_trailing_stop(params: TrailingStopParams) -> Option<TrailingStopUpdate> {
    let TrailingStopParams {
        highest_high,
        atr,
        atr_multiplier,
        current_stop,
    } = params;

    if !(atr > 0.0 && atr.is_finite()) || atr_multiplier <= 0.0 {
        return None;
    }

    let candidate = highest_high - atr_multiplier * atr;
    if candidate.is_finite() && candidate > current_stop {
        Some(TrailingStopUpdate::Chandelier(candidate))
    } else {
        None
    }
}

/// Mirrors the decimal text of an `f64`, so 102.83 becomes exactly 102.83.
fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

/// Reward-to-risk ratio of a planned trade, rounded toward zero to two decimals.
pub fn calculate_rr_ratio(entry: f64, stop: f64, target: f64) -> Option<Decimal> {
    let (entry, stop, target) = (to_decimal(entry)?, to_decimal(stop)?, to_decimal(target)?);
    let risk = (entry - stop).abs();
    let reward = (target - entry).abs();
    if risk.is_zero() || reward.is_zero() {
        return None;
    }
    reward
        .checked_div(risk)
        .map(|ratio| ratio.round_dp_with_strategy(2, RoundingStrategy::ToZero))
}

/// Whole shares such that a stop-out loses `risk_percent` of `capital`.
pub fn calculate_position_size(
    capital: f64,
    risk_percent: f64,
    entry: f64,
    stop: f64,
) -> Option<u64> {
    let capital = to_decimal(capital)?;
    let risk_percent = to_decimal(risk_percent)?;
    if capital.is_sign_negative() || risk_percent.is_sign_negative() {
        return None;
    }
    let risk_per_share = (to_decimal(entry)? - to_decimal(stop)?).abs();
    if risk_per_share.is_zero() {
        return None;
    }
    let risk_amount = capital.checked_mul(risk_percent / Decimal::ONE_HUNDRED)?;
    risk_amount.checked_div(risk_per_share)?.trunc().to_u64()
}
