use crate::models::*;
use statrs::statistics::Statistics;

pub struct PerformanceCalculator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownInfo {
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl PerformanceCalculator {
    pub fn calculate_performance(
        trades: &[TradeRecord],
        equity_curve: &[EquityPoint],
        start_value: f64,
        end_value: f64,
        bars_per_year: f64,
    ) -> PerformanceMetrics {
        let total_trades = trades.len();
        let trade_pnls: Vec<f64> = trades.iter().map(|trade| trade.net_pnl).collect();

        let winning_trades = trade_pnls.iter().filter(|pnl| **pnl > 0.0).count();
        let losing_trades = trade_pnls.iter().filter(|pnl| **pnl < 0.0).count();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let pnl_net: f64 = trade_pnls.iter().sum();
        let pnl_gross: f64 = trades.iter().map(|trade| trade.gross_pnl).sum();
        let total_commission: f64 = trades.iter().map(|trade| trade.commission).sum();

        let best_trade = trade_pnls.iter().copied().reduce(f64::max);
        let worst_trade = trade_pnls.iter().copied().reduce(f64::min);
        let bars_held: Vec<f64> = trades.iter().map(|trade| trade.bars_held as f64).collect();

        let drawdown = Self::calculate_max_drawdown(equity_curve);

        let total_return = if start_value > 0.0 && end_value.is_finite() {
            (end_value - start_value) / start_value * 100.0
        } else {
            0.0
        };

        PerformanceMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            pnl_net,
            pnl_gross,
            total_commission,
            max_drawdown: drawdown.max_drawdown_percent,
            max_drawdown_value: drawdown.max_drawdown,
            sqn: Self::calculate_sqn(&trade_pnls),
            sharpe_ratio: Self::calculate_sharpe_ratio(equity_curve, bars_per_year),
            total_return,
            avg_trade_pnl: average(&trade_pnls),
            best_trade,
            worst_trade,
            avg_bars_held: average(&bars_held),
        }
    }

    /// System Quality Number over closed-trade net P&L.
    pub fn calculate_sqn(trade_pnls: &[f64]) -> Option<f64> {
        if trade_pnls.len() < 2 {
            return None;
        }
        let mean = trade_pnls.iter().mean();
        let std_dev = trade_pnls.iter().population_std_dev();
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return None;
        }
        Some((trade_pnls.len() as f64).sqrt() * mean / std_dev)
    }

    /// Annualized Sharpe ratio of per-bar equity returns, zero risk-free rate.
    pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint], bars_per_year: f64) -> Option<f64> {
        if equity_curve.len() < 3 {
            return None;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].portfolio_value;
                let curr_value = window[1].portfolio_value;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if !std_dev.is_finite() || std_dev <= 0.0 || !mean_return.is_finite() {
            return None;
        }

        Some(mean_return / std_dev * bars_per_year.sqrt())
    }

    pub fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> DrawdownInfo {
        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        if equity_curve.len() < 2 {
            return DrawdownInfo {
                max_drawdown,
                max_drawdown_percent,
            };
        }

        let mut peak_value = equity_curve[0].portfolio_value;

        for point in equity_curve {
            if point.portfolio_value > peak_value {
                peak_value = point.portfolio_value;
            } else {
                let drawdown = peak_value - point.portfolio_value;
                let drawdown_percent = if peak_value > 0.0 {
                    (drawdown / peak_value) * 100.0
                } else {
                    0.0
                };

                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}
