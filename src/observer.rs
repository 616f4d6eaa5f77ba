use chrono::{DateTime, Utc};
use log::{error, info, warn};

/// Everything a run reports while it progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestEvent {
    RunStarted {
        ticker: String,
        bars: usize,
        initial_cash: f64,
    },
    BuySignal {
        date: DateTime<Utc>,
        close: f64,
        range_high: Option<f64>,
        volume: u64,
        volume_ma: f64,
    },
    BuyFilled {
        date: DateTime<Utc>,
        price: f64,
        quantity: u64,
        commission: f64,
    },
    BuyRejected {
        date: DateTime<Utc>,
        price: f64,
        reason: &'static str,
        details: Option<String>,
    },
    InitialStopSet {
        date: DateTime<Utc>,
        stop: f64,
    },
    TrailingStopRaised {
        date: DateTime<Utc>,
        stop: f64,
    },
    SellSignal {
        date: DateTime<Utc>,
        close: f64,
        stop: Option<f64>,
    },
    SellFilled {
        date: DateTime<Utc>,
        price: f64,
        quantity: u64,
        commission: f64,
    },
    TradeClosed {
        date: DateTime<Utc>,
        gross_pnl: f64,
        net_pnl: f64,
    },
    RunCompleted {
        ticker: String,
        trades: usize,
        end_value: f64,
    },
    RunFailed {
        ticker: String,
        error: String,
    },
}

pub trait BacktestObserver {
    fn on_event(&mut self, event: &BacktestEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

fn day(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn level(value: &Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

impl BacktestObserver for LogObserver {
    fn on_event(&mut self, event: &BacktestEvent) {
        match event {
            BacktestEvent::RunStarted {
                ticker,
                bars,
                initial_cash,
            } => info!(
                "Starting backtest for {} over {} bars with {:.2} cash",
                ticker, bars, initial_cash
            ),
            BacktestEvent::BuySignal {
                date,
                close,
                range_high,
                volume,
                volume_ma,
            } => info!(
                "{} - BUY SIGNAL - Breakout Confirmed, Close: {:.2}, Range High: {}, Volume: {}, Volume MA: {:.2}",
                day(date),
                close,
                level(range_high),
                volume,
                volume_ma
            ),
            BacktestEvent::BuyFilled {
                date,
                price,
                quantity,
                commission,
            } => info!(
                "{} - BUY EXECUTED, Price: {:.2}, Size: {}, Comm: {:.2}",
                day(date),
                price,
                quantity,
                commission
            ),
            BacktestEvent::BuyRejected {
                date,
                price,
                reason,
                details,
            } => warn!(
                "{} - BUY REJECTED at {:.2} ({}){}",
                day(date),
                price,
                reason,
                details
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            ),
            BacktestEvent::InitialStopSet { date, stop } => {
                info!("{} - INITIAL STOP SET AT: {:.2}", day(date), stop)
            }
            BacktestEvent::TrailingStopRaised { date, stop } => {
                info!("{} - TRAILING STOP RAISED TO: {:.2}", day(date), stop)
            }
            BacktestEvent::SellSignal { date, close, stop } => info!(
                "{} - SELL SIGNAL - Trailing Stop Hit, Close: {:.2}, Stop: {}",
                day(date),
                close,
                level(stop)
            ),
            BacktestEvent::SellFilled {
                date,
                price,
                quantity,
                commission,
            } => info!(
                "{} - SELL EXECUTED, Price: {:.2}, Size: {}, Comm: {:.2}",
                day(date),
                price,
                quantity,
                commission
            ),
            BacktestEvent::TradeClosed {
                date,
                gross_pnl,
                net_pnl,
            } => info!(
                "{} - TRADE CLOSED - Profit: {:.2}, Net: {:.2}",
                day(date),
                gross_pnl,
                net_pnl
            ),
            BacktestEvent::RunCompleted {
                ticker,
                trades,
                end_value,
            } => info!(
                "Backtest for {} completed: {} trades, final value {:.2}",
                ticker, trades, end_value
            ),
            BacktestEvent::RunFailed { ticker, error: message } => {
                error!("Backtest for {} failed: {}", ticker, message)
            }
        }
    }
}

/// Keeps every event in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Vec<BacktestEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[BacktestEvent] {
        &self.events
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&BacktestEvent) -> bool,
    {
        self.events.iter().filter(|event| predicate(event)).count()
    }
}

impl BacktestObserver for RecordingObserver {
    fn on_event(&mut self, event: &BacktestEvent) {
        self.events.push(event.clone());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BacktestObserver for NullObserver {
    fn on_event(&mut self, _event: &BacktestEvent) {}
}
