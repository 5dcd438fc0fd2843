//! Parameter grid search
//!
//! Expands a config's `grid` section into concrete configs and backtests each
//! combination on the same read-only bar series. Every combination gets its
//! own engine, so runs can execute in parallel without shared state.

use anyhow::Result;
use indicatif::ProgressBar;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::backtest::run_backtest;
use crate::config::Config;
use crate::data::BarSeries;

pub type ParamSet = BTreeMap<String, serde_json::Value>;

/// One concrete parameter combination
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub params: ParamSet,
    pub config: Config,
}

/// A combination that failed validation
#[derive(Debug, Clone)]
pub struct SkippedCombination {
    pub params: ParamSet,
    pub reason: String,
}

/// Cartesian product of the grid values, in key order
#[derive(Debug, Clone, Default)]
pub struct GridSpec {
    axes: BTreeMap<String, Vec<serde_json::Value>>,
}

impl GridSpec {
    pub fn new(axes: BTreeMap<String, Vec<serde_json::Value>>) -> Self {
        GridSpec { axes }
    }

    pub fn from_config(config: &Config) -> Self {
        GridSpec::new(config.grid.clone().unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of combinations before validation
    pub fn combinations(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.values().map(Vec::len).product()
    }

    /// Every parameter set, deterministic order
    pub fn param_sets(&self) -> Vec<ParamSet> {
        if self.axes.is_empty() {
            return Vec::new();
        }
        self.axes
            .iter()
            .map(|(key, values)| values.iter().map(move |v| (key.clone(), v.clone())))
            .multi_cartesian_product()
            .map(|pairs| pairs.into_iter().collect())
            .collect()
    }

    /// Apply each parameter set to `base`, keeping only combinations that validate
    pub fn expand(&self, base: &Config) -> (Vec<Candidate>, Vec<SkippedCombination>) {
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for params in self.param_sets() {
            let outcome = base
                .with_overrides(&params)
                .and_then(|config| config.validate().map(|_| config).map_err(Into::into));
            match outcome {
                Ok(mut config) => {
                    config.grid = None;
                    candidates.push(Candidate {
                        index: candidates.len(),
                        params,
                        config,
                    });
                }
                Err(e) => {
                    debug!("Skipping combination {:?}: {:#}", params, e);
                    skipped.push(SkippedCombination {
                        params,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        (candidates, skipped)
    }
}

/// Result for a single parameter combination
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub index: usize,
    pub params: ParamSet,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub calmar_ratio: Option<f64>,
    pub profit_factor: Option<f64>,
    pub final_equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Sharpe,
    Return,
    Drawdown,
    WinRate,
    ProfitFactor,
    Calmar,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharpe" => Ok(SortKey::Sharpe),
            "return" => Ok(SortKey::Return),
            "drawdown" => Ok(SortKey::Drawdown),
            "win_rate" => Ok(SortKey::WinRate),
            "profit_factor" => Ok(SortKey::ProfitFactor),
            "calmar" => Ok(SortKey::Calmar),
            _ => Err(format!(
                "Unknown sort key: {}. Use sharpe, return, drawdown, win_rate, profit_factor or calmar",
                s
            )),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Sharpe => "sharpe",
            SortKey::Return => "return",
            SortKey::Drawdown => "drawdown",
            SortKey::WinRate => "win_rate",
            SortKey::ProfitFactor => "profit_factor",
            SortKey::Calmar => "calmar",
        };
        write!(f, "{}", name)
    }
}

pub struct Optimizer {
    sequential: bool,
    progress: Option<ProgressBar>,
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer {
            sequential: false,
            progress: None,
        }
    }

    /// Run combinations one after another (useful for debugging)
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    fn evaluate(&self, series: &BarSeries, candidate: &Candidate) -> Option<OptimizationResult> {
        let outcome = run_backtest(&candidate.config, series);
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }

        match outcome {
            Ok(result) => Some(OptimizationResult {
                index: candidate.index,
                params: candidate.params.clone(),
                sharpe_ratio: result.metrics.sharpe_ratio,
                total_return: result.metrics.total_return,
                max_drawdown: result.metrics.max_drawdown,
                win_rate: result.metrics.win_rate,
                total_trades: result.metrics.total_trades,
                calmar_ratio: result.metrics.calmar_ratio,
                profit_factor: result.metrics.profit_factor,
                final_equity: result.metrics.final_equity,
            }),
            Err(e) => {
                warn!("Combination {} failed: {}", candidate.index, e);
                None
            }
        }
    }

    /// Backtest every candidate; results come back in candidate order
    pub fn run(&self, series: &BarSeries, candidates: &[Candidate]) -> Vec<OptimizationResult> {
        info!(
            "Testing {} parameter combinations{}",
            candidates.len(),
            if self.sequential { " sequentially" } else { "" }
        );

        let results: Vec<OptimizationResult> = if self.sequential {
            candidates
                .iter()
                .filter_map(|c| self.evaluate(series, c))
                .collect()
        } else {
            candidates
                .par_iter()
                .filter_map(|c| self.evaluate(series, c))
                .collect()
        };

        if let Some(pb) = &self.progress {
            pb.finish_with_message("done");
        }
        results
    }

    /// Expand the grid in `base` and run it
    pub fn optimize(&self, base: &Config, series: &BarSeries) -> Result<OptimizationRun> {
        let grid = GridSpec::from_config(base);
        if grid.is_empty() {
            anyhow::bail!("Config has no grid section to optimize over");
        }
        let (candidates, skipped) = grid.expand(base);
        if !skipped.is_empty() {
            warn!(
                "Skipped {} of {} combinations with invalid parameters",
                skipped.len(),
                grid.combinations()
            );
        }
        let results = self.run(series, &candidates);
        Ok(OptimizationRun { results, skipped })
    }

    /// Best first; ties broken by combination index
    pub fn sort_results(results: &mut [OptimizationResult], key: SortKey) {
        let metric = |r: &OptimizationResult| match key {
            SortKey::Sharpe => r.sharpe_ratio,
            SortKey::Return => r.total_return,
            // Smaller drawdown ranks higher
            SortKey::Drawdown => -r.max_drawdown,
            SortKey::WinRate => r.win_rate,
            // Undefined ratios come from runs with no losers or runaway growth
            SortKey::ProfitFactor => r.profit_factor.unwrap_or(f64::INFINITY),
            SortKey::Calmar => r.calmar_ratio.unwrap_or(f64::INFINITY),
        };
        results.sort_by(|a, b| {
            metric(b)
                .partial_cmp(&metric(a))
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a grid sweep
#[derive(Debug, Clone)]
pub struct OptimizationRun {
    pub results: Vec<OptimizationResult>,
    pub skipped: Vec<SkippedCombination>,
}
