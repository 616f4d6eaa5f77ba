pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod observer;
pub mod param_utils;
pub mod performance;
pub mod strategy;
pub mod trading_rules;

pub use config::{BacktestSettings, BreakoutParams};
pub use engine::Engine;
pub use error::EngineError;
pub use models::{Bar, BarSeries, BacktestReport};
pub use observer::{BacktestEvent, BacktestObserver, LogObserver, NullObserver, RecordingObserver};
