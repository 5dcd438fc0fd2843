//! Subcommand implementations

pub mod backtest;
pub mod optimize;

use anyhow::Result;
use owl_trader::{data, BarSeries, Config};
use tracing::info;

/// Load the configured symbol's bars, honouring the config's date range
pub fn load_bars(config: &Config) -> Result<BarSeries> {
    let bt = &config.backtest;
    let start = bt.start_date.as_deref().map(data::parse_date).transpose()?;
    let end = bt.end_date.as_deref().map(data::parse_end_date).transpose()?;

    info!("Loading data from: {}", bt.data_dir);
    data::load_series(&bt.data_dir, &bt.symbol, &bt.timeframe, start, end)
}
