//! Backtesting engine
//!
//! Replays bars in strict timestamp order through the breakout rules.
//! Orders fill at the signal bar's close. Each step stages its position
//! changes on a copy and commits only once every transition succeeded.
//!
//! Engine lifecycle: `Initializing -> Running -> Finalizing -> Done`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::AnalyticsReporter;
use crate::config::{Config, StrategyParams};
use crate::data::BarSeries;
use crate::error::{BacktestError, CoreResult};
use crate::execution::OrderSimulator;
use crate::position::{Position, PositionManager};
use crate::rolling::RollingHighTracker;
use crate::signal::SignalGenerator;
use crate::types::{Bar, EquityPoint, Order, PerformanceMetrics, Signal, SignalKind, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Initializing,
    Running,
    Finalizing,
    Done,
}

/// What happened on one bar
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub timestamp: DateTime<Utc>,
    /// Actionable signals in the order they were evaluated (SELL before BUY)
    pub signals: Vec<Signal>,
    pub orders: Vec<Order>,
    pub equity: EquityPoint,
}

impl StepReport {
    pub fn is_quiet(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Outcome of a run, read-only once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    /// Every simulated fill in execution order
    pub trade_log: Vec<Order>,
    /// Closed round trips derived from the trade log
    pub trades: Vec<Trade>,
    pub metrics: PerformanceMetrics,
    pub initial_capital: f64,
    pub ending_cash: f64,
    /// Position left open when a run was cancelled; FLAT otherwise
    pub final_position: Position,
    pub bars_processed: usize,
    pub cancelled: bool,
}

pub struct Backtester {
    params: StrategyParams,
    state: EngineState,
    tracker: RollingHighTracker,
    signals: SignalGenerator,
    simulator: OrderSimulator,
    positions: PositionManager,
    equity_curve: Vec<EquityPoint>,
    trade_log: Vec<Order>,
    last_bar: Option<Bar>,
}

impl Backtester {
    /// Build an engine; `params` are re-validated so a hand-edited copy
    /// cannot start a run.
    pub fn new(params: StrategyParams) -> CoreResult<Self> {
        params.validate()?;
        let tracker = RollingHighTracker::new(params.n_day_high_period)?;
        Ok(Backtester {
            signals: SignalGenerator::new(&params),
            simulator: OrderSimulator::new(&params),
            positions: PositionManager::new(params.initial_capital),
            tracker,
            params,
            state: EngineState::Initializing,
            equity_curve: Vec::new(),
            trade_log: Vec::new(),
            last_bar: None,
        })
    }

    /// Validate `config` and build an engine from it
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        Self::new(config.params()?)
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn trade_log(&self) -> &[Order] {
        &self.trade_log
    }

    pub fn position(&self) -> &Position {
        self.positions.position()
    }

    pub fn cash(&self) -> f64 {
        self.positions.cash()
    }

    pub fn bars_processed(&self) -> usize {
        self.equity_curve.len()
    }

    /// Process one bar.
    ///
    /// On error nothing from this bar is committed and the engine can still
    /// be inspected or finished.
    pub fn step(&mut self, bar: &Bar) -> CoreResult<StepReport> {
        match self.state {
            EngineState::Initializing | EngineState::Running => {}
            EngineState::Finalizing | EngineState::Done => return Err(BacktestError::EngineFinished),
        }

        bar.validate().map_err(|source| BacktestError::InvalidBar {
            index: self.bars_processed(),
            source,
        })?;
        if let Some(previous) = &self.last_bar {
            if bar.timestamp <= previous.timestamp {
                return Err(BacktestError::UnorderedBars {
                    previous: previous.timestamp,
                    current: bar.timestamp,
                });
            }
        }
        self.state = EngineState::Running;

        // Trailing high over prior bars only; the current bar is pushed on commit
        let rolling_high = self.tracker.current();

        let mut staged = self.positions.clone();
        let mut signals = Vec::new();
        let mut orders = Vec::new();

        let first = self.signals.evaluate(bar, &rolling_high, staged.position());
        match first.kind {
            SignalKind::Sell => {
                signals.push(first);
                orders.extend(self.simulator.execute(&first, &mut staged)?);

                // A freed position may re-enter on the same bar
                if staged.position().is_flat() {
                    let second = self.signals.evaluate(bar, &rolling_high, staged.position());
                    if second.kind == SignalKind::Buy {
                        signals.push(second);
                        orders.extend(self.simulator.execute(&second, &mut staged)?);
                    }
                }
            }
            SignalKind::Buy => {
                signals.push(first);
                orders.extend(self.simulator.execute(&first, &mut staged)?);
            }
            SignalKind::None => {}
        }

        staged.mark_bar_elapsed();

        let market_value = staged.position().market_value(bar.close);
        let equity = EquityPoint {
            timestamp: bar.timestamp,
            cash: staged.cash(),
            position_market_value: market_value,
            total_equity: staged.cash() + market_value,
        };

        // Commit
        self.positions = staged;
        self.trade_log.extend_from_slice(&orders);
        self.equity_curve.push(equity);
        self.tracker.push(bar.high);
        self.last_bar = Some(*bar);

        Ok(StepReport {
            timestamp: bar.timestamp,
            signals,
            orders,
            equity,
        })
    }

    /// Close out the run: liquidate any open position at the last close and
    /// compute analytics.
    ///
    /// The engine stays inspectable afterwards in state `Done`; further
    /// `step`, `finish` or `cancel` calls fail with `EngineFinished`.
    pub fn finish(&mut self) -> CoreResult<BacktestResult> {
        self.begin_finalizing()?;
        if let Some(last) = self.last_bar {
            if let Some(order) = self.simulator.liquidate(&last, &mut self.positions)? {
                self.trade_log.push(order);
            }
        }
        Ok(self.build_result(false))
    }

    /// Stop early without liquidating; results cover the bars processed so far
    pub fn cancel(&mut self) -> CoreResult<BacktestResult> {
        self.begin_finalizing()?;
        Ok(self.build_result(true))
    }

    fn begin_finalizing(&mut self) -> CoreResult<()> {
        match self.state {
            EngineState::Initializing | EngineState::Running => {
                self.state = EngineState::Finalizing;
                Ok(())
            }
            EngineState::Finalizing | EngineState::Done => Err(BacktestError::EngineFinished),
        }
    }

    fn build_result(&mut self, cancelled: bool) -> BacktestResult {
        let final_equity = match self.last_bar {
            Some(last) => self.positions.equity(last.close),
            None => self.positions.cash(),
        };

        let reporter = AnalyticsReporter::new(&self.params);
        let trades = reporter.pair_trades(&self.trade_log, &self.equity_curve);
        let metrics = reporter.compute(
            &self.equity_curve,
            &self.trade_log,
            &trades,
            final_equity,
        );

        self.state = EngineState::Done;
        BacktestResult {
            bars_processed: self.equity_curve.len(),
            equity_curve: self.equity_curve.clone(),
            trade_log: self.trade_log.clone(),
            trades,
            metrics,
            initial_capital: self.params.initial_capital,
            ending_cash: self.positions.cash(),
            final_position: self.positions.position().clone(),
            cancelled,
        }
    }

    /// Replay a whole series
    pub fn run(self, series: &BarSeries) -> CoreResult<BacktestResult> {
        self.run_until(series, |_| true)
    }

    /// Replay a series, asking `should_continue(bars_done)` before each bar.
    ///
    /// Returning `false` cancels the run between bars.
    pub fn run_until<F>(mut self, series: &BarSeries, mut should_continue: F) -> CoreResult<BacktestResult>
    where
        F: FnMut(usize) -> bool,
    {
        for (i, bar) in series.iter().enumerate() {
            if !should_continue(i) {
                return self.cancel();
            }
            self.step(bar)?;
        }
        self.finish()
    }
}

/// Validate `config` and replay `series` with it
pub fn run_backtest(config: &Config, series: &BarSeries) -> CoreResult<BacktestResult> {
    Backtester::from_config(config)?.run(series)
}
