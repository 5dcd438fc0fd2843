//! Export of backtest artifacts
//!
//! Writes the equity curve, trade log and closed trades as CSV and the
//! metrics as pretty JSON. Output is fully determined by the result, so two
//! identical runs produce identical files.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backtest::BacktestResult;
use crate::types::{EquityPoint, Order, PerformanceMetrics, Trade};

/// Paths written by [`export_result`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub equity: PathBuf,
    pub orders: PathBuf,
    pub trades: PathBuf,
    pub metrics: PathBuf,
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_equity_csv(path: impl AsRef<Path>, curve: &[EquityPoint]) -> Result<()> {
    write_csv(path.as_ref(), curve)
}

pub fn write_orders_csv(path: impl AsRef<Path>, orders: &[Order]) -> Result<()> {
    write_csv(path.as_ref(), orders)
}

pub fn write_trades_csv(path: impl AsRef<Path>, trades: &[Trade]) -> Result<()> {
    write_csv(path.as_ref(), trades)
}

pub fn write_metrics_json(path: impl AsRef<Path>, metrics: &PerformanceMetrics) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, metrics).context("Failed to serialize metrics")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write every artifact of a run into `dir` as `{run_name}_{artifact}.{ext}`
pub fn export_result(result: &BacktestResult, dir: impl AsRef<Path>, run_name: &str) -> Result<ExportPaths> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let paths = ExportPaths {
        equity: dir.join(format!("{}_equity.csv", run_name)),
        orders: dir.join(format!("{}_orders.csv", run_name)),
        trades: dir.join(format!("{}_trades.csv", run_name)),
        metrics: dir.join(format!("{}_metrics.json", run_name)),
    };

    write_equity_csv(&paths.equity, &result.equity_curve)?;
    write_orders_csv(&paths.orders, &result.trade_log)?;
    write_trades_csv(&paths.trades, &result.trades)?;
    write_metrics_json(&paths.metrics, &result.metrics)?;

    info!(
        "Exported {} equity points, {} orders, {} trades to {}",
        result.equity_curve.len(),
        result.trade_log.len(),
        result.trades.len(),
        dir.display()
    );

    Ok(paths)
}
