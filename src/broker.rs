use crate::error::{EngineError, Result};
use crate::models::{Fill, SignalAction, TradeRecord};
use crate::trading_rules::{determine_position_size, PositionSizingOutcome, PositionSizingParams};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Filled(Fill),
    Rejected {
        reason: &'static str,
        details: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Holding {
    entry: Fill,
}

/// Single-instrument cash account filling market orders at the given price.
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    cash: f64,
    commission_rate: f64,
    holding: Option<Holding>,
}

impl SimulatedBroker {
    pub fn new(initial_cash: f64, commission_rate: f64) -> Result<Self> {
        if !initial_cash.is_finite() || initial_cash <= 0.0 {
            return Err(EngineError::invalid_parameter(
                "initial_cash",
                format!("must be > 0 (value: {})", initial_cash),
            ));
        }
        if !commission_rate.is_finite() || !(0.0..1.0).contains(&commission_rate) {
            return Err(EngineError::invalid_parameter(
                "commission_rate",
                format!("must be in [0, 1) (value: {})", commission_rate),
            ));
        }
        Ok(Self {
            cash: initial_cash,
            commission_rate,
            holding: None,
        })
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position_quantity(&self) -> u64 {
        self.holding
            .as_ref()
            .map(|holding| holding.entry.quantity)
            .unwrap_or(0)
    }

    pub fn entry_fill(&self) -> Option<&Fill> {
        self.holding.as_ref().map(|holding| &holding.entry)
    }

    pub fn mark_to_market(&self, price: f64) -> f64 {
        self.cash + self.position_quantity() as f64 * price
    }

    pub fn execute_buy(
        &mut self,
        price: f64,
        date: DateTime<Utc>,
        bar_index: usize,
    ) -> Result<BuyOutcome> {
        if self.holding.is_some() {
            return Err(EngineError::Internal(format!(
                "buy requested at bar {} while a position is already open",
                bar_index
            )));
        }
        if !price.is_finite() {
            return Err(EngineError::Internal(format!(
                "non-finite buy price {} at bar {}",
                price, bar_index
            )));
        }

        let allocation = match determine_position_size(PositionSizingParams {
            price,
            available_cash: self.cash,
            commission_rate: self.commission_rate,
        }) {
            PositionSizingOutcome::Sized(allocation) => allocation,
            PositionSizingOutcome::InsufficientCash { required } => {
                return Ok(BuyOutcome::Rejected {
                    reason: "insufficient_cash",
                    details: Some(format!(
                        "cash {:.2} below cost of one unit {:.2}",
                        self.cash, required
                    )),
                });
            }
            PositionSizingOutcome::InvalidPrice => {
                return Ok(BuyOutcome::Rejected {
                    reason: "invalid_price",
                    details: Some(format!("price {}", price)),
                });
            }
        };

        let cost = allocation.trade_value + allocation.commission;
        if cost > self.cash {
            return Err(EngineError::Internal(format!(
                "sized buy cost {:.2} exceeds cash {:.2}",
                cost, self.cash
            )));
        }
        self.cash -= cost;

        let fill = Fill {
            action: SignalAction::Buy,
            date,
            bar_index,
            price,
            quantity: allocation.quantity,
            commission: allocation.commission,
        };
        self.holding = Some(Holding {
            entry: fill.clone(),
        });
        Ok(BuyOutcome::Filled(fill))
    }

    /// Liquidates the whole position and returns the closing fill with its trade record.
    pub fn execute_sell(
        &mut self,
        price: f64,
        date: DateTime<Utc>,
        bar_index: usize,
    ) -> Result<(Fill, TradeRecord)> {
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::Internal(format!(
                "invalid sell price {} at bar {}",
                price, bar_index
            )));
        }
        let holding = self.holding.take().ok_or_else(|| {
            EngineError::Internal(format!("sell requested at bar {} while flat", bar_index))
        })?;

        let entry = holding.entry;
        let quantity = entry.quantity;
        let proceeds = price * quantity as f64;
        let commission = proceeds * self.commission_rate;
        self.cash += proceeds - commission;

        let exit = Fill {
            action: SignalAction::Sell,
            date,
            bar_index,
            price,
            quantity,
            commission,
        };

        let gross_pnl = (price - entry.price) * quantity as f64;
        let total_commission = entry.commission + commission;
        let trade = TradeRecord {
            entry_date: entry.date,
            entry_price: entry.price,
            entry_index: entry.bar_index,
            exit_date: date,
            exit_price: price,
            exit_index: bar_index,
            quantity,
            gross_pnl,
            net_pnl: gross_pnl - total_commission,
            commission: total_commission,
            bars_held: bar_index.saturating_sub(entry.bar_index),
        };

        Ok((exit, trade))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    #[test]
    fn buy_then_sell_books_both_commissions() {
        let mut broker = SimulatedBroker::new(100_000.0, 0.001).unwrap();
        let fill = match broker.execute_buy(110.0, day(0), 50).unwrap() {
            BuyOutcome::Filled(fill) => fill,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(fill.quantity, 908);
        assert!((broker.cash() - (100_000.0 - 99_880.0 - 99.88)).abs() < 1e-6);
        assert!(broker.cash() >= 0.0);
        assert!((broker.mark_to_market(110.0) - (100_000.0 - 99.88)).abs() < 1e-6);

        let (exit, trade) = broker.execute_sell(120.0, day(3), 53).unwrap();
        assert_eq!(exit.action, SignalAction::Sell);
        assert_eq!(broker.position_quantity(), 0);
        assert_eq!(trade.bars_held, 3);
        assert!((trade.gross_pnl - 9_080.0).abs() < 1e-6);
        let expected_commission = 99.88 + 108_960.0 * 0.001;
        assert!((trade.commission - expected_commission).abs() < 1e-6);
        assert!((trade.net_pnl - (9_080.0 - expected_commission)).abs() < 1e-6);
        assert!((broker.cash() - (100_000.0 + trade.net_pnl)).abs() < 1e-6);
    }

    #[test]
    fn buy_without_enough_cash_is_rejected_without_state_change() {
        let mut broker = SimulatedBroker::new(50.0, 0.001).unwrap();
        let outcome = broker.execute_buy(110.0, day(0), 10).unwrap();
        assert!(matches!(
            outcome,
            BuyOutcome::Rejected {
                reason: "insufficient_cash",
                ..
            }
        ));
        assert_eq!(broker.cash(), 50.0);
        assert_eq!(broker.position_quantity(), 0);
    }

    #[test]
    fn invalid_order_sequences_are_internal_errors() {
        let mut broker = SimulatedBroker::new(1_000.0, 0.0).unwrap();
        assert!(matches!(
            broker.execute_sell(10.0, day(0), 0),
            Err(EngineError::Internal(_))
        ));
        broker.execute_buy(10.0, day(0), 0).unwrap();
        assert!(matches!(
            broker.execute_buy(10.0, day(1), 1),
            Err(EngineError::Internal(_))
        ));
    }

    #[test]
    fn constructor_validates_account_settings() {
        assert!(SimulatedBroker::new(0.0, 0.001).is_err());
        assert!(SimulatedBroker::new(1_000.0, -0.1).is_err());
        assert!(SimulatedBroker::new(1_000.0, 1.0).is_err());
    }
}
