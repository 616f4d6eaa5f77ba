use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Extract a whole-number period of at least one bar
pub fn get_period_param(params: &HashMap<String, f64>, key: &str, default: usize) -> Result<usize> {
    let Some(&raw) = params.get(key) else {
        return Ok(default);
    };
    if !raw.is_finite() {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be finite (value: {})", raw),
        ));
    }
    if raw.fract() != 0.0 {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be an integer (value: {})", raw),
        ));
    }
    if raw < 1.0 {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be >= 1 (value: {})", raw),
        ));
    }
    Ok(raw as usize)
}

/// Extract a strictly positive, finite multiplier
pub fn get_multiplier_param(params: &HashMap<String, f64>, key: &str, default: f64) -> Result<f64> {
    let Some(&raw) = params.get(key) else {
        return Ok(default);
    };
    ensure_positive_finite(key, raw)?;
    Ok(raw)
}

pub fn ensure_positive_finite(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be finite (value: {})", value),
        ));
    }
    if value <= 0.0 {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be > 0 (value: {})", value),
        ));
    }
    Ok(())
}

/// Fails on the first key that is not in `known`, in sorted order.
pub fn reject_unknown_keys(params: &HashMap<String, f64>, known: &[&str]) -> Result<()> {
    let mut unknown: Vec<&String> = params
        .keys()
        .filter(|key| !known.contains(&key.as_str()))
        .collect();
    unknown.sort();
    match unknown.first() {
        Some(key) => Err(EngineError::invalid_parameter(
            key,
            format!("unknown parameter (expected one of: {})", known.join(", ")),
        )),
        None => Ok(()),
    }
}
