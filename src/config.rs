use crate::error::{EngineError, Result};
use crate::param_utils::{
    ensure_positive_finite, get_multiplier_param, get_period_param, reject_unknown_keys,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const LOOKBACK: &str = "lookback";
pub const VOLUME_MA_PERIOD: &str = "volume_ma_period";
pub const VOLUME_MULT: &str = "volume_mult";
pub const ATR_PERIOD: &str = "atr_period";
pub const INITIAL_STOP_ATR_MULT: &str = "initial_stop_atr_mult";
pub const TRAIL_STOP_ATR_MULT: &str = "trail_stop_atr_mult";

const PARAMETER_KEYS: [&str; 6] = [
    LOOKBACK,
    VOLUME_MA_PERIOD,
    VOLUME_MULT,
    ATR_PERIOD,
    INITIAL_STOP_ATR_MULT,
    TRAIL_STOP_ATR_MULT,
];

pub const SETTING_INITIAL_CASH: &str = "BACKTEST_INITIAL_CASH";
pub const SETTING_COMMISSION_RATE: &str = "BACKTEST_COMMISSION_RATE";
pub const SETTING_BARS_PER_YEAR: &str = "BACKTEST_BARS_PER_YEAR";

/// Breakout strategy parameters. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutParams {
    pub lookback: usize,
    pub volume_ma_period: usize,
    pub volume_mult: f64,
    pub atr_period: usize,
    pub initial_stop_atr_mult: f64,
    pub trail_stop_atr_mult: f64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            lookback: 50,
            volume_ma_period: 20,
            volume_mult: 1.5,
            atr_period: 14,
            initial_stop_atr_mult: 2.0,
            trail_stop_atr_mult: 3.0,
        }
    }
}

impl BreakoutParams {
    /// Create parameters from a map, falling back to defaults for missing keys
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Result<Self> {
        reject_unknown_keys(parameters, &PARAMETER_KEYS)?;
        let defaults = Self::default();

        let params = Self {
            lookback: get_period_param(parameters, LOOKBACK, defaults.lookback)?,
            volume_ma_period: get_period_param(
                parameters,
                VOLUME_MA_PERIOD,
                defaults.volume_ma_period,
            )?,
            volume_mult: get_multiplier_param(parameters, VOLUME_MULT, defaults.volume_mult)?,
            atr_period: get_period_param(parameters, ATR_PERIOD, defaults.atr_period)?,
            initial_stop_atr_mult: get_multiplier_param(
                parameters,
                INITIAL_STOP_ATR_MULT,
                defaults.initial_stop_atr_mult,
            )?,
            trail_stop_atr_mult: get_multiplier_param(
                parameters,
                TRAIL_STOP_ATR_MULT,
                defaults.trail_stop_atr_mult,
            )?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, period) in [
            (LOOKBACK, self.lookback),
            (VOLUME_MA_PERIOD, self.volume_ma_period),
            (ATR_PERIOD, self.atr_period),
        ] {
            if period == 0 {
                return Err(EngineError::invalid_parameter(key, "must be >= 1 (value: 0)"));
            }
        }
        ensure_positive_finite(VOLUME_MULT, self.volume_mult)?;
        ensure_positive_finite(INITIAL_STOP_ATR_MULT, self.initial_stop_atr_mult)?;
        ensure_positive_finite(TRAIL_STOP_ATR_MULT, self.trail_stop_atr_mult)?;
        Ok(())
    }
}

/// Account and reporting settings shared by every run of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub initial_cash: f64,
    pub commission_rate: f64,
    /// Annualization factor for the Sharpe ratio.
    pub bars_per_year: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            commission_rate: 0.001,
            bars_per_year: 252.0,
        }
    }
}

impl BacktestSettings {
    /// Reads `BACKTEST_*` keys, keeping defaults for missing or blank entries.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let resolved = Self {
            initial_cash: optional_setting_f64(settings, SETTING_INITIAL_CASH)?
                .unwrap_or(defaults.initial_cash),
            commission_rate: optional_setting_f64(settings, SETTING_COMMISSION_RATE)?
                .unwrap_or(defaults.commission_rate),
            bars_per_year: optional_setting_f64(settings, SETTING_BARS_PER_YEAR)?
                .unwrap_or(defaults.bars_per_year),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive_finite("initial_cash", self.initial_cash)?;
        if !self.commission_rate.is_finite()
            || self.commission_rate < 0.0
            || self.commission_rate >= 1.0
        {
            return Err(EngineError::invalid_parameter(
                "commission_rate",
                format!("must be in [0, 1) (value: {})", self.commission_rate),
            ));
        }
        ensure_positive_finite("bars_per_year", self.bars_per_year)?;
        Ok(())
    }
}

fn optional_setting_f64(settings: &HashMap<String, String>, key: &str) -> Result<Option<f64>> {
    let Some(raw) = settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        EngineError::invalid_parameter(key, format!("must be a number (value: {})", raw))
    })?;
    if !value.is_finite() {
        return Err(EngineError::invalid_parameter(
            key,
            format!("must be finite (value: {})", raw),
        ));
    }
    Ok(Some(value))
}
