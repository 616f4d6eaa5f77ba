use crate::broker::{BuyOutcome, SimulatedBroker};
use crate::config::{BacktestSettings, BreakoutParams};
use crate::error::{EngineError, Result};
use crate::indicators::IndicatorSeries;
use crate::models::*;
use crate::observer::{BacktestEvent, BacktestObserver, LogObserver};
use crate::performance::PerformanceCalculator;
use crate::strategy::{BarContext, BreakoutStrategy, Strategy};
use crate::trading_rules::PRICE_EPSILON;
use log::debug;
use std::collections::HashMap;

struct SimulationOutcome {
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    end_value: f64,
    open_position: Option<OpenPositionSummary>,
}

/// Runs the breakout strategy over a single bar series.
///
/// The engine holds only immutable configuration; every run builds its own
/// broker, strategy state, ledger and equity curve, so runs are independent.
#[derive(Debug, Clone)]
pub struct Engine {
    params: BreakoutParams,
    settings: BacktestSettings,
}

impl Engine {
    pub fn new(params: BreakoutParams, settings: BacktestSettings) -> Result<Self> {
        params.validate()?;
        settings.validate()?;
        Ok(Self { params, settings })
    }

    /// Builds an engine from a strategy parameter map.
    pub fn from_parameters(
        parameters: &HashMap<String, f64>,
        settings: BacktestSettings,
    ) -> Result<Self> {
        Self::new(BreakoutParams::from_parameters(parameters)?, settings)
    }

    pub fn params(&self) -> &BreakoutParams {
        &self.params
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    pub fn run(&self, series: &BarSeries, observer: &mut dyn BacktestObserver) -> BacktestReport {
        match BreakoutStrategy::new(self.params.clone()) {
            Ok(mut strategy) => self.run_with_strategy(series, &mut strategy, observer),
            Err(err) => Self::fail(series.ticker(), err, None, observer),
        }
    }

    /// Same as [`Engine::run`], reporting progress through the `log` facade.
    pub fn run_logged(&self, series: &BarSeries) -> BacktestReport {
        self.run(series, &mut LogObserver)
    }

    /// Validates raw bars first; a malformed series becomes a failed report.
    pub fn run_bars(
        &self,
        ticker: &str,
        bars: Vec<Bar>,
        observer: &mut dyn BacktestObserver,
    ) -> BacktestReport {
        match BarSeries::new(ticker, bars) {
            Ok(series) => self.run(&series, observer),
            Err(err) => Self::fail(ticker, err, None, observer),
        }
    }

    pub fn run_with_strategy<S: Strategy + ?Sized>(
        &self,
        series: &BarSeries,
        strategy: &mut S,
        observer: &mut dyn BacktestObserver,
    ) -> BacktestReport {
        let ticker = series.ticker();

        if series.is_empty() {
            return Self::fail(
                ticker,
                EngineError::InsufficientData(format!("No bars supplied for {}", ticker)),
                None,
                observer,
            );
        }

        let min_data_points = strategy.get_min_data_points();
        if series.len() <= min_data_points {
            return Self::fail(
                ticker,
                EngineError::InsufficientData(format!(
                    "{} bars supplied for {}, strategy {} needs more than {}",
                    series.len(),
                    ticker,
                    strategy.get_template_id(),
                    min_data_points
                )),
                None,
                observer,
            );
        }

        let initial_cash = self.settings.initial_cash;
        observer.on_event(&BacktestEvent::RunStarted {
            ticker: ticker.to_string(),
            bars: series.len(),
            initial_cash,
        });

        let outcome = match self.simulate(series, strategy, observer) {
            Ok(outcome) => outcome,
            Err(err) => return Self::fail(ticker, err, Some(initial_cash), observer),
        };

        let metrics = PerformanceCalculator::calculate_performance(
            &outcome.trades,
            &outcome.equity_curve,
            initial_cash,
            outcome.end_value,
            self.settings.bars_per_year,
        );

        observer.on_event(&BacktestEvent::RunCompleted {
            ticker: ticker.to_string(),
            trades: outcome.trades.len(),
            end_value: outcome.end_value,
        });

        BacktestReport {
            success: true,
            error: None,
            ticker: ticker.to_string(),
            start_value: Some(initial_cash),
            end_value: Some(outcome.end_value),
            metrics: Some(metrics),
            trades: outcome.trades,
            equity_curve: outcome.equity_curve,
            open_position: outcome.open_position,
        }
    }

    fn fail(
        ticker: &str,
        err: EngineError,
        start_value: Option<f64>,
        observer: &mut dyn BacktestObserver,
    ) -> BacktestReport {
        let message = err.to_string();
        observer.on_event(&BacktestEvent::RunFailed {
            ticker: ticker.to_string(),
            error: message.clone(),
        });
        BacktestReport::failed(ticker, message, start_value)
    }

    fn simulate<S: Strategy + ?Sized>(
        &self,
        series: &BarSeries,
        strategy: &mut S,
        observer: &mut dyn BacktestObserver,
    ) -> Result<SimulationOutcome> {
        let bars = series.bars();
        let indicators =
            IndicatorSeries::compute(bars, self.params.atr_period, self.params.volume_ma_period);
        let mut broker =
            SimulatedBroker::new(self.settings.initial_cash, self.settings.commission_rate)?;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut warmup_bars = 0usize;

        for (index, bar) in bars.iter().enumerate() {
            let snapshot = indicators.snapshot(index);
            for value in [snapshot.atr, snapshot.volume_ma].into_iter().flatten() {
                if !value.is_finite() {
                    return Err(EngineError::Internal(format!(
                        "non-finite indicator value {} at bar {}",
                        value, index
                    )));
                }
            }

            if snapshot.is_ready() {
                let ctx = BarContext {
                    bars,
                    index,
                    indicators: snapshot,
                };
                let signal = strategy.on_bar(&ctx);

                if let Some(stop) = signal.stop_raised {
                    observer.on_event(&BacktestEvent::TrailingStopRaised {
                        date: bar.date,
                        stop,
                    });
                }

                match signal.action {
                    SignalAction::Buy => {
                        observer.on_event(&BacktestEvent::BuySignal {
                            date: bar.date,
                            close: bar.close,
                            range_high: signal.trigger_level,
                            volume: bar.volume,
                            volume_ma: snapshot.volume_ma.unwrap_or_default(),
                        });
                        match broker.execute_buy(bar.close, bar.date, index)? {
                            BuyOutcome::Filled(fill) => {
                                observer.on_event(&BacktestEvent::BuyFilled {
                                    date: fill.date,
                                    price: fill.price,
                                    quantity: fill.quantity,
                                    commission: fill.commission,
                                });
                                strategy.on_fill(&fill, &ctx)?;
                                if let Some(position) = strategy.position().long() {
                                    observer.on_event(&BacktestEvent::InitialStopSet {
                                        date: fill.date,
                                        stop: position.initial_stop_price,
                                    });
                                }
                            }
                            BuyOutcome::Rejected { reason, details } => {
                                observer.on_event(&BacktestEvent::BuyRejected {
                                    date: bar.date,
                                    price: bar.close,
                                    reason,
                                    details,
                                });
                                strategy.on_order_rejected(SignalAction::Buy);
                            }
                        }
                    }
                    SignalAction::Sell => {
                        observer.on_event(&BacktestEvent::SellSignal {
                            date: bar.date,
                            close: bar.close,
                            stop: signal.trigger_level,
                        });
                        let (fill, trade) = broker.execute_sell(bar.close, bar.date, index)?;
                        observer.on_event(&BacktestEvent::SellFilled {
                            date: fill.date,
                            price: fill.price,
                            quantity: fill.quantity,
                            commission: fill.commission,
                        });
                        strategy.on_fill(&fill, &ctx)?;
                        observer.on_event(&BacktestEvent::TradeClosed {
                            date: fill.date,
                            gross_pnl: trade.gross_pnl,
                            net_pnl: trade.net_pnl,
                        });
                        trades.push(trade);
                    }
                    SignalAction::Hold => {}
                }
            } else {
                warmup_bars += 1;
            }

            let cash = broker.cash();
            if cash < -PRICE_EPSILON {
                return Err(EngineError::Internal(format!(
                    "cash went negative ({:.2}) at bar {}",
                    cash, index
                )));
            }
            let portfolio_value = broker.mark_to_market(bar.close);
            if !portfolio_value.is_finite() {
                return Err(EngineError::Internal(format!(
                    "non-finite portfolio value at bar {}",
                    index
                )));
            }
            equity_curve.push(EquityPoint {
                date: bar.date,
                portfolio_value,
                cash,
                position_value: portfolio_value - cash,
            });
        }

        debug!(
            "{}: {} warm-up bars skipped, {} trades closed",
            series.ticker(),
            warmup_bars,
            trades.len()
        );

        let last_bar = &bars[bars.len() - 1];
        let open_position = match broker.entry_fill() {
            Some(entry) => {
                let position = strategy.position().long().ok_or_else(|| {
                    EngineError::Internal(
                        "broker holds a position the strategy does not track".to_string(),
                    )
                })?;
                Some(OpenPositionSummary {
                    entry_date: entry.date,
                    entry_price: entry.price,
                    entry_index: entry.bar_index,
                    quantity: entry.quantity,
                    trailing_stop_price: position.trailing_stop_price,
                    last_close: last_bar.close,
                    unrealized_pnl: (last_bar.close - entry.price) * entry.quantity as f64,
                })
            }
            None => None,
        };

        Ok(SimulationOutcome {
            trades,
            equity_curve,
            end_value: broker.mark_to_market(last_bar.close),
            open_position,
        })
    }
}
