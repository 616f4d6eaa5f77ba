use crate::config::BreakoutParams;
use crate::error::{EngineError, Result};
use crate::indicators::{consolidation_range, ConsolidationRange};
use crate::models::{Fill, SignalAction, StrategySignal};
use crate::strategy::{BarContext, LongPosition, PositionState, Strategy};
use crate::trading_rules::{compute_trailing_stop, initial_stop_loss, TrailingStopParams};

/// Volume-confirmed breakout of a consolidation range, exited on a
/// ratcheting Chandelier stop.
pub struct BreakoutStrategy {
    params: BreakoutParams,
    position: PositionState,
    pending: Option<SignalAction>,
    last_range: Option<ConsolidationRange>,
}

impl BreakoutStrategy {
    pub fn new(params: BreakoutParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            position: PositionState::Flat,
            pending: None,
            last_range: None,
        })
    }

    pub fn params(&self) -> &BreakoutParams {
        &self.params
    }

    pub fn pending_order(&self) -> Option<SignalAction> {
        self.pending
    }

    /// Range measured on the most recent flat evaluation.
    pub fn last_consolidation(&self) -> Option<ConsolidationRange> {
        self.last_range
    }

    fn evaluate_entry(&mut self, ctx: &BarContext, volume_ma: f64) -> StrategySignal {
        let Some(range) = consolidation_range(ctx.bars, ctx.index, self.params.lookback) else {
            return StrategySignal::hold();
        };
        self.last_range = Some(range);

        let bar = ctx.bar();
        let breakout_up = bar.close > range.high;
        let volume_confirmed = bar.volume as f64 > volume_ma * self.params.volume_mult;

        if breakout_up && volume_confirmed {
            self.pending = Some(SignalAction::Buy);
            StrategySignal::buy(range.high)
        } else {
            StrategySignal::hold()
        }
    }
}

impl Strategy for BreakoutStrategy {
    fn get_template_id(&self) -> &str {
        "classic_breakout"
    }

    fn get_min_data_points(&self) -> usize {
        self.params
            .lookback
            .max(self.params.atr_period)
            .max(self.params.volume_ma_period.saturating_sub(1))
    }

    fn on_bar(&mut self, ctx: &BarContext) -> StrategySignal {
        if self.pending.is_some() {
            return StrategySignal::hold();
        }
        let (Some(atr), Some(volume_ma)) = (ctx.indicators.atr, ctx.indicators.volume_ma) else {
            return StrategySignal::hold();
        };

        if self.position.is_flat() {
            return self.evaluate_entry(ctx, volume_ma);
        }
        let PositionState::Long(position) = &mut self.position else {
            return StrategySignal::hold();
        };

        let bar = ctx.bar();
        position.highest_high_since_entry = position.highest_high_since_entry.max(bar.high);

        // Recomputed on every bar, not only on a new high: a narrowing ATR
        // alone can lift the stop.
        let raised = compute_trailing_stop(TrailingStopParams {
            highest_high: position.highest_high_since_entry,
            atr,
            atr_multiplier: self.params.trail_stop_atr_mult,
            current_stop: position.trailing_stop_price,
        })
        .map(|update| update.value());
        if let Some(stop) = raised {
            position.trailing_stop_price = stop;
        }

        if bar.close < position.trailing_stop_price {
            let stop = position.trailing_stop_price;
            self.pending = Some(SignalAction::Sell);
            StrategySignal::sell(stop).with_stop_raised(raised)
        } else {
            StrategySignal::hold().with_stop_raised(raised)
        }
    }

    fn on_fill(&mut self, fill: &Fill, ctx: &BarContext) -> Result<()> {
        if self.pending != Some(fill.action) {
            return Err(EngineError::Internal(format!(
                "unexpected {} fill at bar {} (pending: {:?})",
                fill.action.as_str(),
                fill.bar_index,
                self.pending
            )));
        }
        self.pending = None;

        match fill.action {
            SignalAction::Buy => {
                let atr = ctx.indicators.atr.unwrap_or(f64::NAN);
                let initial_stop =
                    initial_stop_loss(fill.price, atr, self.params.initial_stop_atr_mult)
                        .ok_or_else(|| {
                            EngineError::Internal(format!(
                                "cannot derive initial stop from ATR {} at bar {}",
                                atr, fill.bar_index
                            ))
                        })?;
                self.position = PositionState::Long(LongPosition {
                    entry_price: fill.price,
                    entry_bar_index: fill.bar_index,
                    entry_date: fill.date,
                    highest_high_since_entry: ctx.bar().high,
                    initial_stop_price: initial_stop,
                    trailing_stop_price: initial_stop,
                });
            }
            SignalAction::Sell => {
                self.position = PositionState::Flat;
            }
            SignalAction::Hold => {}
        }
        Ok(())
    }

    fn on_order_rejected(&mut self, action: SignalAction) {
        if self.pending == Some(action) {
            self.pending = None;
        }
    }

    fn position(&self) -> &PositionState {
        &self.position
    }
}
