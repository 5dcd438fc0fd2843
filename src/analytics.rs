//! Performance analytics over a finished run
//!
//! Degenerate statistics resolve to defined values instead of errors: a
//! zero-variance return series has a Sharpe ratio of 0, an empty or
//! monotonically rising curve has zero drawdown.

use statrs::statistics::Statistics;

use crate::config::StrategyParams;
use crate::types::{EquityPoint, Order, PerformanceMetrics, Side, Trade};

#[derive(Debug, Clone)]
pub struct AnalyticsReporter {
    initial_capital: f64,
    risk_free_rate: f64,
    periods_per_year: f64,
}

/// Entry awaiting its exit(s)
struct OpenEntry<'a> {
    order: &'a Order,
    remaining: f64,
}

impl AnalyticsReporter {
    pub fn new(params: &StrategyParams) -> Self {
        AnalyticsReporter {
            initial_capital: params.initial_capital,
            risk_free_rate: params.risk_free_rate,
            periods_per_year: params.periods_per_year,
        }
    }

    /// Per-bar simple returns of total equity
    pub fn returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .map(|w| (w[1].total_equity - w[0].total_equity) / w[0].total_equity)
            .collect()
    }

    /// Annualized Sharpe ratio using the sample standard deviation
    pub fn sharpe_ratio(&self, returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();
        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }
        let excess = mean - self.risk_free_rate / self.periods_per_year;
        excess / std_dev * self.periods_per_year.sqrt()
    }

    /// Largest peak-to-trough decline as `(fraction, amount)`
    pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
        let mut peak = f64::MIN;
        let mut max_dd: f64 = 0.0;
        let mut max_dd_amount: f64 = 0.0;

        for point in equity_curve {
            let equity = point.total_equity;
            if equity > peak {
                peak = equity;
            }
            let amount = peak - equity;
            if amount > max_dd_amount {
                max_dd_amount = amount;
            }
            if peak > 0.0 {
                let dd = amount / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }

        (max_dd, max_dd_amount)
    }

    /// Pair every SELL with the entry it reduces.
    ///
    /// Entry commission is attributed pro rata to the quantity sold.
    /// `bars_held` counts the bars after entry up to and including the exit bar.
    pub fn pair_trades(&self, trade_log: &[Order], equity_curve: &[EquityPoint]) -> Vec<Trade> {
        let bar_index = |ts| equity_curve.partition_point(|p| p.timestamp < ts);

        let mut trades = Vec::new();
        let mut open: Option<OpenEntry> = None;

        for order in trade_log {
            match order.side {
                Side::Buy => {
                    open = Some(OpenEntry {
                        order,
                        remaining: order.quantity,
                    });
                }
                Side::Sell => {
                    let Some(entry) = open.as_mut() else {
                        continue;
                    };
                    let share = if entry.order.quantity > 0.0 {
                        order.quantity / entry.order.quantity
                    } else {
                        0.0
                    };
                    let commission = entry.order.commission * share + order.commission;
                    let pnl = (order.fill_price - entry.order.fill_price) * order.quantity;

                    trades.push(Trade {
                        entry_time: entry.order.timestamp,
                        exit_time: order.timestamp,
                        entry_price: entry.order.fill_price,
                        exit_price: order.fill_price,
                        quantity: order.quantity,
                        pnl,
                        commission,
                        net_pnl: pnl - commission,
                        bars_held: bar_index(order.timestamp)
                            .saturating_sub(bar_index(entry.order.timestamp)),
                        forced_exit: order.forced,
                    });

                    entry.remaining -= order.quantity;
                    if entry.remaining <= entry.order.quantity * 1e-12 {
                        open = None;
                    }
                }
            }
        }

        trades
    }

    /// Aggregate statistics; `final_equity` is the value after any liquidation
    pub fn compute(
        &self,
        equity_curve: &[EquityPoint],
        trade_log: &[Order],
        trades: &[Trade],
        final_equity: f64,
    ) -> PerformanceMetrics {
        let initial_capital = self.initial_capital;
        let total_return = (final_equity - initial_capital) / initial_capital;

        let periods = equity_curve.len() as f64;
        let annualized_return = if periods > 0.0 && final_equity > 0.0 {
            Some((final_equity / initial_capital).powf(self.periods_per_year / periods) - 1.0)
                .filter(|r| r.is_finite())
        } else {
            Some(0.0)
        };

        let returns = Self::returns(equity_curve);
        let sharpe_ratio = self.sharpe_ratio(&returns);
        let volatility = if returns.len() >= 2 {
            let std_dev = returns.iter().std_dev();
            if std_dev.is_finite() {
                std_dev * self.periods_per_year.sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_amount) = Self::max_drawdown(equity_curve);
        let calmar_ratio = annualized_return
            .map(|annual| if max_drawdown > 0.0 { annual / max_drawdown } else { 0.0 })
            .filter(|c| c.is_finite());

        let exposure = if equity_curve.is_empty() {
            0.0
        } else {
            let long_bars = equity_curve
                .iter()
                .filter(|p| p.position_market_value > 0.0)
                .count();
            long_bars as f64 / periods
        };

        let winners: Vec<&Trade> = trades.iter().filter(|t| t.is_win()).collect();
        let losers: Vec<&Trade> = trades.iter().filter(|t| !t.is_win()).collect();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winners.len() as f64 / trades.len() as f64
        };

        let gross_profits: f64 = winners.iter().map(|t| t.net_pnl).sum();
        let gross_losses: f64 = losers.iter().map(|t| t.net_pnl.abs()).sum();

        let profit_factor = if gross_losses > 0.0 {
            Some(gross_profits / gross_losses).filter(|pf| pf.is_finite())
        } else if gross_profits > 0.0 {
            None
        } else {
            Some(0.0)
        };

        let avg_win = if winners.is_empty() {
            0.0
        } else {
            gross_profits / winners.len() as f64
        };
        let avg_loss = if losers.is_empty() {
            0.0
        } else {
            gross_losses / losers.len() as f64
        };
        let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

        let largest_win = winners.iter().map(|t| t.net_pnl).fold(0.0, f64::max);
        let largest_loss = losers.iter().map(|t| t.net_pnl).fold(0.0, f64::min);

        let buy_orders = trade_log.iter().filter(|o| o.side == Side::Buy).count();

        PerformanceMetrics {
            initial_capital,
            final_equity,
            total_return,
            annualized_return,
            sharpe_ratio,
            calmar_ratio,
            volatility,
            max_drawdown,
            max_drawdown_amount,
            win_rate,
            profit_factor,
            expectancy,
            exposure,
            total_trades: trades.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            buy_orders,
            sell_orders: trade_log.len() - buy_orders,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            total_commission: trade_log.iter().map(|o| o.commission).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn reporter() -> AnalyticsReporter {
        let mut config = Config::default();
        config.backtest.initial_capital = 100.0;
        AnalyticsReporter::new(&config.params().unwrap())
    }

    fn day(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i)
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                timestamp: day(i as i64),
                cash: v,
                position_market_value: 0.0,
                total_equity: v,
            })
            .collect()
    }

    fn order(side: Side, i: i64, quantity: f64, price: f64, commission: f64) -> Order {
        Order {
            side,
            quantity,
            fill_price: price,
            reference_price: price,
            commission,
            timestamp: day(i),
            forced: false,
        }
    }

    #[test]
    fn test_flat_curve_sharpe_is_zero() {
        let r = reporter();
        let returns = AnalyticsReporter::returns(&curve(&[100.0; 10]));
        assert_eq!(r.sharpe_ratio(&returns), 0.0);
    }

    #[test]
    fn test_short_series_sharpe_is_zero() {
        assert_eq!(reporter().sharpe_ratio(&[0.01]), 0.0);
        assert_eq!(reporter().sharpe_ratio(&[]), 0.0);
    }

    #[test]
    fn test_sharpe_formula() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let mean: f64 = 0.025 / 4.0;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 3.0;
        let expected = mean / var.sqrt() * 365f64.sqrt();
        assert_relative_eq!(reporter().sharpe_ratio(&returns), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_monotonic_curve_has_no_drawdown() {
        let (dd, amount) = AnalyticsReporter::max_drawdown(&curve(&[100.0, 101.0, 105.0, 110.0]));
        assert_eq!(dd, 0.0);
        assert_eq!(amount, 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let (dd, amount) =
            AnalyticsReporter::max_drawdown(&curve(&[100.0, 120.0, 90.0, 130.0, 117.0]));
        assert_relative_eq!(dd, 0.25);
        assert_relative_eq!(amount, 30.0);
    }

    #[test]
    fn test_pair_trades_with_partial_exit() {
        let log = vec![
            order(Side::Buy, 0, 4.0, 10.0, 0.4),
            order(Side::Sell, 2, 1.0, 12.0, 0.12),
            order(Side::Sell, 3, 3.0, 9.0, 0.27),
        ];
        let trades = reporter().pair_trades(&log, &curve(&[100.0; 5]));
        assert_eq!(trades.len(), 2);

        assert_relative_eq!(trades[0].pnl, 2.0);
        assert_relative_eq!(trades[0].commission, 0.1 + 0.12);
        assert_eq!(trades[0].bars_held, 2);
        assert!(trades[0].is_win());

        assert_relative_eq!(trades[1].pnl, -3.0);
        assert_relative_eq!(trades[1].commission, 0.3 + 0.27);
        assert_eq!(trades[1].bars_held, 3);
        assert!(!trades[1].is_win());
    }

    #[test]
    fn test_win_rate_counts_commission() {
        // Price rises but fees eat the gain
        let log = vec![
            order(Side::Buy, 0, 1.0, 10.0, 0.5),
            order(Side::Sell, 1, 1.0, 10.5, 0.5),
        ];
        let r = reporter();
        let equity = curve(&[100.0, 99.5]);
        let trades = r.pair_trades(&log, &equity);
        let metrics = r.compute(&equity, &log, &trades, 99.5);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.losing_trades, 1);
        assert_relative_eq!(metrics.total_commission, 1.0);
        assert_relative_eq!(metrics.total_return, -0.005);
        assert_eq!(metrics.buy_orders, 1);
        assert_eq!(metrics.sell_orders, 1);
    }

    #[test]
    fn test_no_trades_metrics() {
        let r = reporter();
        let equity = curve(&[100.0, 100.0, 100.0]);
        let metrics = r.compute(&equity, &[], &[], 100.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, Some(0.0));
        assert_eq!(metrics.annualized_return, Some(0.0));
        assert_eq!(metrics.calmar_ratio, Some(0.0));
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.exposure, 0.0);
    }

    #[test]
    fn test_sharpe_subtracts_per_period_risk_free_rate() {
        let mut config = Config::default();
        config.strategy.risk_free_rate = 0.05;
        config.analytics.periods_per_year = 252.0;
        let r = AnalyticsReporter::new(&config.params().unwrap());

        let returns = [0.01, -0.005, 0.02, 0.0];
        let mean: f64 = 0.025 / 4.0;
        let var = returns.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 3.0;
        let expected = (mean - 0.05 / 252.0) / var.sqrt() * 252f64.sqrt();

        assert_relative_eq!(r.sharpe_ratio(&returns), expected, epsilon = 1e-12);
        assert!(r.sharpe_ratio(&returns) < reporter().sharpe_ratio(&returns));
    }

    #[test]
    fn test_unbounded_ratios_resolve_to_none() {
        // Three bars, 40000x growth, one winning trade and no losers
        let log = vec![
            order(Side::Buy, 1, 40.0, 2.0, 0.0),
            order(Side::Sell, 2, 40.0, 100_000.0, 0.0),
        ];
        let r = reporter();
        let equity = curve(&[100.0, 100.0, 4_000_020.0]);
        let trades = r.pair_trades(&log, &equity);
        let metrics = r.compute(&equity, &log, &trades, 4_000_020.0);

        assert_eq!(metrics.win_rate, 1.0);
        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.annualized_return, None);
        assert_eq!(metrics.calmar_ratio, None);
        assert!(metrics.sharpe_ratio.is_finite());
        assert!(metrics.total_return.is_finite());
    }

    #[test]
    fn test_profit_factor_with_losses() {
        let log = vec![
            order(Side::Buy, 0, 1.0, 10.0, 0.0),
            order(Side::Sell, 1, 1.0, 16.0, 0.0),
            order(Side::Buy, 2, 1.0, 16.0, 0.0),
            order(Side::Sell, 3, 1.0, 14.0, 0.0),
        ];
        let r = reporter();
        let equity = curve(&[100.0, 106.0, 106.0, 104.0]);
        let trades = r.pair_trades(&log, &equity);
        let metrics = r.compute(&equity, &log, &trades, 104.0);
        assert_relative_eq!(metrics.profit_factor.unwrap(), 3.0);
    }
}
