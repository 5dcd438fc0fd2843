//! N-day breakout backtester
//!
//! Deterministic replay of historical bars through a single-instrument,
//! long-only breakout strategy: enter when the close clears the trailing
//! N-bar high inside a configured entry window on an eligible weekday, exit
//! after a holding period inside the exit window.
//!
//! The simulation core (`rolling`, `signal`, `position`, `execution`,
//! `backtest`, `analytics`) is synchronous, never logs, and produces
//! byte-identical results for identical inputs. Loading, export and
//! parameter sweeps live in `data`, `report` and `optimizer`.
//!
//! ```no_run
//! use owl_trader::{data, Backtester, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/btc_usdt_1d.json")?;
//!     let series = data::load_series(
//!         &config.backtest.data_dir,
//!         &config.backtest.symbol,
//!         &config.backtest.timeframe,
//!         None,
//!         None,
//!     )?;
//!     let result = Backtester::from_config(&config)?.run(&series)?;
//!     println!("Sharpe: {:.2}", result.metrics.sharpe_ratio);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod monthly_pnl;
pub mod optimizer;
pub mod position;
pub mod report;
pub mod rolling;
pub mod signal;
pub mod types;

pub use analytics::AnalyticsReporter;
pub use backtest::{run_backtest, BacktestResult, Backtester, EngineState, StepReport};
pub use config::{CommissionBasis, Config, StrategyParams, TimeOfDay, TimeWindow};
pub use data::BarSeries;
pub use error::{BacktestError, CoreResult};
pub use execution::OrderSimulator;
pub use position::{Position, PositionManager, PositionStatus};
pub use rolling::RollingHighTracker;
pub use signal::SignalGenerator;
pub use types::*;
