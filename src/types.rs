//! Core data types used across the simulation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One OHLCV observation for a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(timestamp, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (for trusted sources or when validation is done separately)
    pub fn new_unchecked(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the bar data
    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume.is_nan() || self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Check if the bar is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Decision emitted for a single bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    None,
}

/// Trading signal, produced fresh per bar and never persisted beyond one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub timestamp: DateTime<Utc>,
    pub reference_price: f64,
}

impl Signal {
    pub fn none(bar: &Bar) -> Self {
        Self {
            kind: SignalKind::None,
            timestamp: bar.timestamp,
            reference_price: bar.close,
        }
    }

    pub fn buy(bar: &Bar) -> Self {
        Self {
            kind: SignalKind::Buy,
            timestamp: bar.timestamp,
            reference_price: bar.close,
        }
    }

    pub fn sell(bar: &Bar) -> Self {
        Self {
            kind: SignalKind::Sell,
            timestamp: bar.timestamp,
            reference_price: bar.close,
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == SignalKind::None
    }

    /// The order side this signal asks for, if any
    pub fn side(&self) -> Option<Side> {
        match self.kind {
            SignalKind::Buy => Some(Side::Buy),
            SignalKind::Sell => Some(Side::Sell),
            SignalKind::None => None,
        }
    }
}

/// Simulated fill, appended to the append-only trade log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub side: Side,
    pub quantity: f64,
    pub fill_price: f64,
    /// Price the signal referenced before slippage
    pub reference_price: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
    /// Set on the end-of-data liquidation
    #[serde(default)]
    pub forced: bool,
}

impl Order {
    pub fn notional(&self) -> f64 {
        self.quantity * self.fill_price
    }

    /// Signed change in cash this order causes
    pub fn cash_delta(&self) -> f64 {
        match self.side {
            Side::Buy => -(self.notional() + self.commission),
            Side::Sell => self.notional() - self.commission,
        }
    }
}

/// One point of the equity curve, one per bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub position_market_value: f64,
    pub total_equity: f64,
}

/// Closed round trip: a SELL paired with the entry it reduces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    /// Pro-rata entry commission plus the exit commission
    pub commission: f64,
    pub net_pnl: f64,
    pub bars_held: usize,
    pub forced_exit: bool,
}

impl Trade {
    /// Calculate return percentage (net of commission) relative to entry cost
    pub fn return_pct(&self) -> f64 {
        let cost = self.entry_price * self.quantity;
        if cost <= 0.0 {
            return 0.0;
        }
        self.net_pnl / cost * 100.0
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

/// Aggregate statistics for a finished run
///
/// Ratios are fractions (0.25 = 25%), not percentages. Every field is
/// finite; ratios with no finite value are `None` (serialized as `null`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    /// `None` when compounding over the run overflows `f64`
    pub annualized_return: Option<f64>,
    pub sharpe_ratio: f64,
    pub calmar_ratio: Option<f64>,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub max_drawdown_amount: f64,
    pub win_rate: f64,
    /// Gross profit over gross loss; `None` when there are winners but no losers
    pub profit_factor: Option<f64>,
    /// Average net profit per closed trade: (win rate × avg win) - (loss rate × avg loss)
    pub expectancy: f64,
    pub exposure: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub buy_orders: usize,
    pub sell_orders: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_commission: f64,
}
