//! N-day breakout signal generation
//!
//! Entry and exit gates are evaluated on the bar timestamp converted into the
//! configured timezone. Windows are half-open `[start, end)`.

use chrono::{Datelike, Timelike};
use chrono_tz::Tz;

use crate::config::{StrategyParams, TimeOfDay, TimeWindow, WeekdaySet};
use crate::error::CoreResult;
use crate::position::{Position, PositionStatus};
use crate::types::{Bar, Signal};

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    buy_window: TimeWindow,
    sell_window: TimeWindow,
    eligible_entry_weekdays: WeekdaySet,
    holding_period_days: usize,
    timezone: Tz,
}

impl SignalGenerator {
    pub fn new(params: &StrategyParams) -> Self {
        SignalGenerator {
            buy_window: params.buy_window,
            sell_window: params.sell_window,
            eligible_entry_weekdays: params.eligible_entry_weekdays,
            holding_period_days: params.holding_period_days,
            timezone: params.timezone,
        }
    }

    fn local_time(&self, bar: &Bar) -> (chrono::Weekday, TimeOfDay) {
        let local = bar.timestamp.with_timezone(&self.timezone);
        let seconds = local.num_seconds_from_midnight();
        // num_seconds_from_midnight is always < 86400
        let time = TimeOfDay::from_seconds(seconds).unwrap_or(TimeOfDay::MIDNIGHT);
        (local.weekday(), time)
    }

    /// BUY gate: FLAT, close above the rolling high, eligible weekday, inside the buy window
    pub fn is_buy(&self, bar: &Bar, rolling_high: f64, position: &Position) -> bool {
        if position.status != PositionStatus::Flat || !(bar.close > rolling_high) {
            return false;
        }
        let (weekday, time) = self.local_time(bar);
        self.eligible_entry_weekdays.contains(weekday) && self.buy_window.contains(time)
    }

    /// SELL gate: LONG, holding period served, inside the sell window
    pub fn is_sell(&self, bar: &Bar, position: &Position) -> bool {
        if position.status != PositionStatus::Long
            || position.elapsed_holding_bars < self.holding_period_days
        {
            return false;
        }
        let (_, time) = self.local_time(bar);
        self.sell_window.contains(time)
    }

    /// Decide for one bar.
    ///
    /// `rolling_high` is the trailing high excluding this bar; a warm-up
    /// error resolves to NONE for entries. Exits do not depend on it.
    pub fn evaluate(&self, bar: &Bar, rolling_high: &CoreResult<f64>, position: &Position) -> Signal {
        match position.status {
            PositionStatus::Long if self.is_sell(bar, position) => Signal::sell(bar),
            PositionStatus::Flat => match rolling_high {
                Ok(high) if self.is_buy(bar, *high, position) => Signal::buy(bar),
                _ => Signal::none(bar),
            },
            _ => Signal::none(bar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::BacktestError;
    use crate::types::SignalKind;
    use chrono::{TimeZone, Utc};

    // Asia/Shanghai is UTC+8: 07:58 UTC is 15:58 local, 01:58 UTC is 09:58 local.
    // 2024-01-05 is a Friday, 2024-01-03 a Wednesday.
    fn bar(day: u32, hour: u32, minute: u32, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap(),
            close,
            close,
            close,
            close,
            1.0,
        )
        .unwrap()
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::new(&Config::default().params().unwrap())
    }

    fn long_position(elapsed: usize) -> Position {
        Position {
            status: PositionStatus::Long,
            entry_price: 10.0,
            entry_timestamp: None,
            quantity: 1.0,
            elapsed_holding_bars: elapsed,
        }
    }

    #[test]
    fn test_breakout_in_window_buys() {
        let signal = generator().evaluate(&bar(5, 7, 58, 15.0), &Ok(12.0), &Position::flat());
        assert_eq!(signal.kind, SignalKind::Buy);
        assert_eq!(signal.reference_price, 15.0);
    }

    #[test]
    fn test_no_breakout_when_close_equals_high() {
        let signal = generator().evaluate(&bar(5, 7, 58, 12.0), &Ok(12.0), &Position::flat());
        assert!(signal.is_none());
    }

    #[test]
    fn test_ineligible_weekday_blocks_entry() {
        let signal = generator().evaluate(&bar(3, 7, 58, 15.0), &Ok(12.0), &Position::flat());
        assert!(signal.is_none());
    }

    #[test]
    fn test_outside_buy_window_blocks_entry() {
        // 08:05 UTC is 16:05 local, the exclusive end of the window
        let signal = generator().evaluate(&bar(5, 8, 5, 15.0), &Ok(12.0), &Position::flat());
        assert!(signal.is_none());
    }

    #[test]
    fn test_warm_up_yields_none() {
        let warm_up = Err(BacktestError::InsufficientData { required: 20, observed: 3 });
        let signal = generator().evaluate(&bar(5, 7, 58, 15.0), &warm_up, &Position::flat());
        assert!(signal.is_none());
    }

    #[test]
    fn test_sell_after_holding_period() {
        let gen = generator();
        let exit_bar = bar(6, 1, 58, 14.0);
        assert!(gen.evaluate(&exit_bar, &Ok(1.0), &long_position(0)).is_none());
        let signal = gen.evaluate(&exit_bar, &Ok(1.0), &long_position(1));
        assert_eq!(signal.kind, SignalKind::Sell);
    }

    #[test]
    fn test_sell_requires_sell_window() {
        let signal = generator().evaluate(&bar(6, 7, 58, 14.0), &Ok(1.0), &long_position(5));
        assert!(signal.is_none());
    }

    #[test]
    fn test_sell_ignores_warm_up() {
        let warm_up = Err(BacktestError::InsufficientData { required: 20, observed: 3 });
        let signal = generator().evaluate(&bar(6, 1, 58, 14.0), &warm_up, &long_position(1));
        assert_eq!(signal.kind, SignalKind::Sell);
    }
}
