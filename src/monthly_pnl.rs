//! Month-by-month P&L over closed trades
//!
//! Trades are bucketed by the calendar month of their exit, evaluated in
//! the strategy timezone so month boundaries match the trading calendar.

use chrono::{Datelike, DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::types::Trade;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Aggregated closed trades for one month
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyPnL {
    pub net_pnl: f64,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

impl MonthlyPnL {
    fn add_trade(&mut self, trade: &Trade) {
        self.net_pnl += trade.net_pnl;
        self.trade_count += 1;
        if trade.is_win() {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    /// Fraction of winning trades, 0 for an empty month
    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.trade_count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    fn from_datetime(dt: DateTime<Utc>, tz: Tz) -> Self {
        let local = dt.with_timezone(&tz);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonthlyPnLMatrix {
    data: BTreeMap<YearMonth, MonthlyPnL>,
}

impl MonthlyPnLMatrix {
    /// Bucket trades by UTC exit month
    pub fn from_trades(trades: &[Trade]) -> Self {
        Self::from_trades_in(trades, Tz::UTC)
    }

    /// Bucket trades by exit month in `tz`
    pub fn from_trades_in(trades: &[Trade], tz: Tz) -> Self {
        let mut data = BTreeMap::new();
        for trade in trades {
            data.entry(YearMonth::from_datetime(trade.exit_time, tz))
                .or_insert_with(MonthlyPnL::default)
                .add_trade(trade);
        }
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, year: i32, month: u32) -> Option<&MonthlyPnL> {
        self.data.get(&YearMonth::new(year, month))
    }

    /// Months with at least one closed trade, oldest first
    pub fn months(&self) -> impl Iterator<Item = (&YearMonth, &MonthlyPnL)> {
        self.data.iter()
    }

    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.data.keys().map(|ym| ym.year).collect();
        years.dedup();
        years
    }

    pub fn yearly_total(&self, year: i32) -> f64 {
        self.data
            .range(YearMonth::new(year, 1)..=YearMonth::new(year, 12))
            .map(|(_, pnl)| pnl.net_pnl)
            .sum()
    }

    pub fn total_pnl(&self) -> f64 {
        self.data.values().map(|pnl| pnl.net_pnl).sum()
    }

    /// Fraction of traded months that ended in profit
    pub fn profitable_month_rate(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let profitable = self.data.values().filter(|pnl| pnl.net_pnl > 0.0).count();
        profitable as f64 / self.data.len() as f64
    }

    /// Plain-text year × month table
    pub fn render(&self) -> String {
        if self.data.is_empty() {
            return "No closed trades for a monthly P&L matrix.".to_string();
        }

        let width = 8 + 13 * 12 + 14;
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", "=".repeat(width));
        let _ = writeln!(out, "MONTHLY P&L MATRIX");
        let _ = writeln!(out, "{}", "=".repeat(width));

        let _ = write!(out, "{:>6} │", "Year");
        for name in MONTHS {
            let _ = write!(out, " {:>10} │", name);
        }
        let _ = writeln!(out, " {:>12}", "Total");
        let _ = writeln!(out, "{}", "-".repeat(width));

        for year in self.years() {
            let _ = write!(out, "{:>6} │", year);
            for month in 1..=12 {
                match self.get(year, month) {
                    Some(pnl) => {
                        let _ = write!(out, " {:>10.2} │", pnl.net_pnl);
                    }
                    None => {
                        let _ = write!(out, " {:>10} │", "");
                    }
                }
            }
            let _ = writeln!(out, " {:>12.2}", self.yearly_total(year));
        }

        let profitable = self.data.values().filter(|pnl| pnl.net_pnl > 0.0).count();
        let _ = writeln!(out, "{}", "=".repeat(width));
        let _ = writeln!(out, "Total P&L: {:.2}", self.total_pnl());
        let _ = writeln!(
            out,
            "Profitable Months: {:.1}% ({} of {})",
            self.profitable_month_rate() * 100.0,
            profitable,
            self.data.len()
        );
        let _ = writeln!(out, "{}", "=".repeat(width));
        out
    }
}
