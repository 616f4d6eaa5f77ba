use crate::error::{EngineError, Result};
use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Checks the OHLC invariants of a single bar.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (label, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(format!("{} is not finite ({})", label, value));
            }
            if value <= 0.0 {
                return Err(format!("{} must be positive ({})", label, value));
            }
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(format!(
                "high {} is below open/close/low ({}/{}/{})",
                self.high, self.open, self.close, self.low
            ));
        }
        if self.low > self.open.min(self.close).min(self.high) {
            return Err(format!(
                "low {} is above open/close/high ({}/{}/{})",
                self.low, self.open, self.close, self.high
            ));
        }
        Ok(())
    }
}

/// Validated, strictly ascending bars for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    ticker: String,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()
                .map_err(|reason| EngineError::InvalidBar { index, reason })?;
            if index > 0 {
                let previous = &bars[index - 1];
                if bar.date == previous.date {
                    return Err(EngineError::DuplicateTimestamp {
                        index,
                        date: bar.date,
                    });
                }
                if bar.date < previous.date {
                    return Err(EngineError::OutOfOrder { index });
                }
            }
        }

        Ok(Self {
            ticker: ticker.into(),
            bars,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Timestamps of the first and last bar.
    pub fn date_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.bars.first()?.date, self.bars.last()?.date))
    }

    /// Bars with `start <= date <= end`. A missing bound leaves that side open.
    pub fn window(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> BarSeries {
        let from = match start {
            Some(start) => self.bars.partition_point(|bar| bar.date < start),
            None => 0,
        };
        let to = match end {
            Some(end) => self.bars.partition_point(|bar| bar.date <= end),
            None => self.bars.len(),
        };
        let bars = if from < to {
            self.bars[from..to].to_vec()
        } else {
            Vec::new()
        };
        BarSeries {
            ticker: self.ticker.clone(),
            bars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

/// Strategy decision for one bar.
///
/// `trigger_level` is the price the decision was measured against: the
/// consolidation high for a Buy, the trailing stop for a Sell.
/// `stop_raised` carries the new trailing stop when it moved on this bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub action: SignalAction,
    pub trigger_level: Option<f64>,
    pub stop_raised: Option<f64>,
}

impl StrategySignal {
    pub fn hold() -> Self {
        Self {
            action: SignalAction::Hold,
            trigger_level: None,
            stop_raised: None,
        }
    }

    pub fn buy(trigger_level: f64) -> Self {
        Self {
            action: SignalAction::Buy,
            trigger_level: Some(trigger_level),
            stop_raised: None,
        }
    }

    pub fn sell(trigger_level: f64) -> Self {
        Self {
            action: SignalAction::Sell,
            trigger_level: Some(trigger_level),
            stop_raised: None,
        }
    }

    pub fn with_stop_raised(mut self, stop: Option<f64>) -> Self {
        self.stop_raised = stop;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub action: SignalAction,
    pub date: DateTime<Utc>,
    pub bar_index: usize,
    pub price: f64,
    pub quantity: u64,
    pub commission: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_index: usize,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_index: usize,
    pub quantity: u64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub commission: f64,
    pub bars_held: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub portfolio_value: f64,
    pub cash: f64,
    pub position_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percentage of closed trades with positive net P&L.
    pub win_rate: f64,
    pub pnl_net: f64,
    pub pnl_gross: f64,
    pub total_commission: f64,
    /// Largest peak-to-trough decline of the equity curve, in percent.
    pub max_drawdown: f64,
    pub max_drawdown_value: f64,
    pub sqn: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    /// Percent change from start value to end value.
    pub total_return: f64,
    pub avg_trade_pnl: Option<f64>,
    pub best_trade: Option<f64>,
    pub worst_trade: Option<f64>,
    pub avg_bars_held: Option<f64>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            pnl_net: 0.0,
            pnl_gross: 0.0,
            total_commission: 0.0,
            max_drawdown: 0.0,
            max_drawdown_value: 0.0,
            sqn: None,
            sharpe_ratio: None,
            total_return: 0.0,
            avg_trade_pnl: None,
            best_trade: None,
            worst_trade: None,
            avg_bars_held: None,
        }
    }
}

/// A position still held after the last bar, valued at the final close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionSummary {
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_index: usize,
    pub quantity: u64,
    pub trailing_stop_price: f64,
    pub last_close: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub success: bool,
    pub error: Option<String>,
    pub ticker: String,
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    pub metrics: Option<PerformanceMetrics>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub open_position: Option<OpenPositionSummary>,
}

impl BacktestReport {
    pub fn failed(ticker: &str, error: impl Into<String>, start_value: Option<f64>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ticker: ticker.to_string(),
            start_value,
            end_value: None,
            metrics: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            open_position: None,
        }
    }
}

fn normalize_parameter_map(raw: HashMap<String, Value>) -> Result<HashMap<String, f64>> {
    let mut cleaned = HashMap::with_capacity(raw.len());

    for (key, value) in raw.into_iter() {
        let parsed = match &value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(num) => {
                cleaned.insert(key, num);
            }
            None => {
                return Err(EngineError::invalid_parameter(
                    &key,
                    format!("expected a number or numeric string (value: {})", value),
                ))
            }
        }
    }

    Ok(cleaned)
}

/// Parses a flat JSON object of strategy parameters into a numeric map.
///
/// Every value must be a JSON number or a string holding one.
pub fn parse_parameter_map_from_json(json: &str) -> AnyResult<HashMap<String, f64>> {
    let raw: HashMap<String, Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;
    Ok(normalize_parameter_map(raw)?)
}
