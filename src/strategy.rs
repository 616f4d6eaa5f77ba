use crate::error::Result;
use crate::indicators::IndicatorSnapshot;
use crate::models::*;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything a strategy may look at when deciding on bar `index`.
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    pub bars: &'a [Bar],
    pub index: usize,
    pub indicators: IndicatorSnapshot,
}

impl<'a> BarContext<'a> {
    pub fn bar(&self) -> &'a Bar {
        &self.bars[self.index]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongPosition {
    pub entry_price: f64,
    pub entry_bar_index: usize,
    pub entry_date: DateTime<Utc>,
    pub highest_high_since_entry: f64,
    pub initial_stop_price: f64,
    pub trailing_stop_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(LongPosition),
}

impl PositionState {
    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    pub fn long(&self) -> Option<&LongPosition> {
        match self {
            PositionState::Long(position) => Some(position),
            PositionState::Flat => None,
        }
    }
}

pub trait Strategy {
    fn get_template_id(&self) -> &str;
    /// Number of bars that must precede the first evaluable bar.
    fn get_min_data_points(&self) -> usize;
    fn on_bar(&mut self, ctx: &BarContext) -> StrategySignal;
    fn on_fill(&mut self, fill: &Fill, ctx: &BarContext) -> Result<()>;
    fn on_order_rejected(&mut self, action: SignalAction);
    fn position(&self) -> &PositionState;
}

#[path = "strategies/breakout.rs"]
pub mod breakout;

pub use breakout::BreakoutStrategy;
