//! Single-position lifecycle and cash balance
//!
//! Exactly one [`Position`] exists per run and only [`PositionManager`]
//! mutates it. Status is FLAT exactly when quantity is zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, CoreResult};
use crate::types::{Order, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Flat,
    Long,
}

/// The one tradable position of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub status: PositionStatus,
    pub entry_price: f64,
    pub entry_timestamp: Option<DateTime<Utc>>,
    pub quantity: f64,
    pub elapsed_holding_bars: usize,
}

impl Position {
    pub fn flat() -> Self {
        Position {
            status: PositionStatus::Flat,
            entry_price: 0.0,
            entry_timestamp: None,
            quantity: 0.0,
            elapsed_holding_bars: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.status == PositionStatus::Flat
    }

    pub fn is_long(&self) -> bool {
        self.status == PositionStatus::Long
    }

    /// Mark-to-market value at `price`
    pub fn market_value(&self, price: f64) -> f64 {
        match self.status {
            PositionStatus::Long => self.quantity * price,
            PositionStatus::Flat => 0.0,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::flat()
    }
}

/// Owns the position state machine and the cash balance
#[derive(Debug, Clone, PartialEq)]
pub struct PositionManager {
    cash: f64,
    position: Position,
}

impl PositionManager {
    pub fn new(initial_capital: f64) -> Self {
        PositionManager {
            cash: initial_capital,
            position: Position::flat(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Cash plus position value at `price`
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.position.market_value(price)
    }

    /// Open a position; only valid while FLAT
    pub fn apply_buy(&mut self, order: &Order) -> CoreResult<()> {
        if order.side != Side::Buy || !self.position.is_flat() {
            return Err(BacktestError::InvalidStateTransition {
                operation: "apply_buy",
                status: self.position.status,
            });
        }

        self.cash -= order.notional() + order.commission;
        self.position = Position {
            status: PositionStatus::Long,
            entry_price: order.fill_price,
            entry_timestamp: Some(order.timestamp),
            quantity: order.quantity,
            elapsed_holding_bars: 0,
        };
        Ok(())
    }

    /// Reduce or close the position; only valid while LONG.
    ///
    /// Selling the full quantity returns to FLAT. A partial sell keeps the
    /// position LONG with the remaining quantity and the original entry.
    pub fn apply_sell(&mut self, order: &Order) -> CoreResult<()> {
        if order.side != Side::Sell || !self.position.is_long() {
            return Err(BacktestError::InvalidStateTransition {
                operation: "apply_sell",
                status: self.position.status,
            });
        }
        if !(order.quantity > 0.0) || order.quantity > self.position.quantity {
            return Err(BacktestError::InvalidStateTransition {
                operation: "apply_sell (quantity exceeds holding)",
                status: self.position.status,
            });
        }

        self.cash += order.notional() - order.commission;
        let remaining = self.position.quantity - order.quantity;
        if remaining > 0.0 {
            self.position.quantity = remaining;
        } else {
            self.position = Position::flat();
        }
        Ok(())
    }

    pub fn apply(&mut self, order: &Order) -> CoreResult<()> {
        match order.side {
            Side::Buy => self.apply_buy(order),
            Side::Sell => self.apply_sell(order),
        }
    }

    /// Count one held bar; no-op while FLAT
    pub fn mark_bar_elapsed(&mut self) {
        if self.position.is_long() {
            self.position.elapsed_holding_bars += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn order(side: Side, quantity: f64, price: f64, commission: f64) -> Order {
        Order {
            side,
            quantity,
            fill_price: price,
            reference_price: price,
            commission,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap(),
            forced: false,
        }
    }

    #[test]
    fn test_buy_then_sell_round_trip() {
        let mut pm = PositionManager::new(100.0);
        pm.apply_buy(&order(Side::Buy, 2.0, 40.0, 0.5)).unwrap();
        assert!(pm.position().is_long());
        assert_relative_eq!(pm.cash(), 19.5);
        assert_eq!(pm.position().entry_price, 40.0);

        pm.apply_sell(&order(Side::Sell, 2.0, 45.0, 0.5)).unwrap();
        assert!(pm.position().is_flat());
        assert_eq!(pm.position().quantity, 0.0);
        assert_relative_eq!(pm.cash(), 109.0);
    }

    #[test]
    fn test_buy_while_long_is_rejected() {
        let mut pm = PositionManager::new(100.0);
        pm.apply_buy(&order(Side::Buy, 1.0, 10.0, 0.0)).unwrap();
        let before = pm.clone();
        let err = pm.apply_buy(&order(Side::Buy, 1.0, 10.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InvalidStateTransition { status: PositionStatus::Long, .. }
        ));
        assert_eq!(pm, before);
    }

    #[test]
    fn test_sell_while_flat_is_rejected() {
        let mut pm = PositionManager::new(100.0);
        let err = pm.apply_sell(&order(Side::Sell, 1.0, 10.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InvalidStateTransition { status: PositionStatus::Flat, .. }
        ));
    }

    #[test]
    fn test_partial_sell_stays_long() {
        let mut pm = PositionManager::new(100.0);
        pm.apply_buy(&order(Side::Buy, 4.0, 10.0, 0.0)).unwrap();
        pm.apply_sell(&order(Side::Sell, 1.0, 12.0, 0.0)).unwrap();
        assert!(pm.position().is_long());
        assert_eq!(pm.position().quantity, 3.0);
        assert_eq!(pm.position().entry_price, 10.0);
        assert_relative_eq!(pm.cash(), 72.0);
    }

    #[test]
    fn test_oversell_is_rejected() {
        let mut pm = PositionManager::new(100.0);
        pm.apply_buy(&order(Side::Buy, 1.0, 10.0, 0.0)).unwrap();
        assert!(pm.apply_sell(&order(Side::Sell, 2.0, 10.0, 0.0)).is_err());
    }

    #[test]
    fn test_mark_bar_elapsed_only_while_long() {
        let mut pm = PositionManager::new(100.0);
        pm.mark_bar_elapsed();
        assert_eq!(pm.position().elapsed_holding_bars, 0);

        pm.apply_buy(&order(Side::Buy, 1.0, 10.0, 0.0)).unwrap();
        pm.mark_bar_elapsed();
        pm.mark_bar_elapsed();
        assert_eq!(pm.position().elapsed_holding_bars, 2);
        assert_relative_eq!(pm.equity(12.0), 102.0);
    }
}
