//! Simulated order fills
//!
//! Fills happen at the signal bar's close, moved against the trader by the
//! configured slippage fraction. Commission is `commission_rate * notional`
//! where the notional uses either the slipped or the reference price.

use crate::config::{CommissionBasis, StrategyParams};
use crate::error::CoreResult;
use crate::position::PositionManager;
use crate::types::{Bar, Order, Side, Signal};

/// Price and fee for one unit of quantity on a given side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    /// Commission charged per unit
    pub commission_per_unit: f64,
}

impl Fill {
    /// Total cash cost of buying `quantity`
    pub fn buy_cost(&self, quantity: f64) -> f64 {
        quantity * (self.price + self.commission_per_unit)
    }
}

#[derive(Debug, Clone)]
pub struct OrderSimulator {
    commission_rate: f64,
    slippage: f64,
    commission_basis: CommissionBasis,
    buy_cash_percentage: f64,
    sell_asset_percentage: f64,
}

impl OrderSimulator {
    pub fn new(params: &StrategyParams) -> Self {
        OrderSimulator {
            commission_rate: params.commission_rate,
            slippage: params.slippage,
            commission_basis: params.commission_basis,
            buy_cash_percentage: params.buy_cash_percentage,
            sell_asset_percentage: params.sell_asset_percentage,
        }
    }

    /// Fill price and per-unit commission for `side` at `reference_price`
    pub fn price(&self, side: Side, reference_price: f64) -> Fill {
        let price = match side {
            Side::Buy => reference_price * (1.0 + self.slippage),
            Side::Sell => reference_price * (1.0 - self.slippage),
        };
        let basis = match self.commission_basis {
            CommissionBasis::FillPrice => price,
            CommissionBasis::ReferencePrice => reference_price,
        };
        Fill {
            price,
            commission_per_unit: self.commission_rate * basis,
        }
    }

    fn order(&self, side: Side, quantity: f64, reference_price: f64, fill: Fill, signal: &Signal) -> Order {
        Order {
            side,
            quantity,
            fill_price: fill.price,
            reference_price,
            commission: quantity * fill.commission_per_unit,
            timestamp: signal.timestamp,
            forced: false,
        }
    }

    /// Build the order a signal asks for without touching any state.
    ///
    /// Returns `None` for NONE signals and when sizing rounds to nothing.
    pub fn simulate(&self, signal: &Signal, positions: &PositionManager) -> Option<Order> {
        let side = signal.side()?;
        let reference = signal.reference_price;
        let fill = self.price(side, reference);

        let quantity = match side {
            Side::Buy => {
                let cash = positions.cash();
                let mut quantity = self.buy_cash_percentage * cash / fill.price;
                // Scale down so notional plus commission never exceeds cash
                if fill.buy_cost(quantity) > cash {
                    quantity = cash / (fill.price + fill.commission_per_unit);
                }
                quantity
            }
            Side::Sell => {
                let held = positions.position().quantity;
                if self.sell_asset_percentage >= 1.0 {
                    held
                } else {
                    self.sell_asset_percentage * held
                }
            }
        };

        if !quantity.is_finite() || quantity <= 0.0 {
            return None;
        }
        Some(self.order(side, quantity, reference, fill, signal))
    }

    /// Simulate and apply to the position manager
    pub fn execute(&self, signal: &Signal, positions: &mut PositionManager) -> CoreResult<Option<Order>> {
        match self.simulate(signal, positions) {
            Some(order) => {
                positions.apply(&order)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Sell the whole remaining quantity at `bar.close` with no slippage
    pub fn liquidate(&self, bar: &Bar, positions: &mut PositionManager) -> CoreResult<Option<Order>> {
        let quantity = positions.position().quantity;
        if !positions.position().is_long() || quantity <= 0.0 {
            return Ok(None);
        }
        let order = Order {
            side: Side::Sell,
            quantity,
            fill_price: bar.close,
            reference_price: bar.close,
            commission: self.commission_rate * quantity * bar.close,
            timestamp: bar.timestamp,
            forced: true,
        };
        positions.apply_sell(&order)?;
        Ok(Some(order))
    }
}
