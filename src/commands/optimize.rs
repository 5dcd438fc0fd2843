//! Optimize command implementation with progress tracking

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owl_trader::optimizer::{GridSpec, Optimizer, ParamSet, SortKey};
use owl_trader::Config;
use tracing::info;

fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn run(config_path: String, sort_by: String, top: usize, sequential: bool) -> Result<()> {
    info!("Starting optimization");

    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let sort_key: SortKey = sort_by.parse().map_err(anyhow::Error::msg)?;

    let grid = GridSpec::from_config(&config);
    if grid.is_empty() {
        anyhow::bail!("No grid section in {}", config_path);
    }
    let (candidates, skipped) = grid.expand(&config);

    let series = super::load_bars(&config)?;

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Symbol:        {} {}", config.backtest.symbol, config.backtest.timeframe);
    println!("  Bars:          {}", series.len());
    println!("  Combinations:  {}", grid.combinations());
    println!("  Valid:         {}", candidates.len());
    println!("  Skipped:       {}", skipped.len());
    println!(
        "  Mode:          {}",
        if sequential { "sequential" } else { "parallel" }
    );
    println!("{}\n", "=".repeat(70));

    for skip in &skipped {
        info!("Skipped {}: {}", format_params(&skip.params), skip.reason);
    }

    let pb = ProgressBar::new(candidates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec}] {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█░ "),
    );
    pb.set_message("running");
    pb.tick();

    let optimizer = Optimizer::new().sequential(sequential).with_progress(pb);
    let mut results = optimizer.run(&series, &candidates);
    println!();

    if results.is_empty() {
        info!("No valid results found.");
        println!("No valid results found.");
        return Ok(());
    }

    Optimizer::sort_results(&mut results, sort_key);
    info!("Total results: {}, sorted by: {}", results.len(), sort_key);

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(120));
    println!(
        "TOP {} OPTIMIZATION RESULTS (sorted by {})",
        display_count, sort_key
    );
    println!("{}", "=".repeat(120));
    println!(
        "{:<4} {:>7} {:>9} {:>8} {:>8} {:>8} {:>6} | Parameters",
        "Rank", "Sharpe", "Return%", "MaxDD%", "WinR%", "Calmar", "Trades"
    );
    println!("{}", "-".repeat(120));

    for (i, result) in results.iter().take(top).enumerate() {
        println!(
            "{:<4} {:>7.2} {:>9.2} {:>8.2} {:>8.2} {:>8} {:>6} | {}",
            i + 1,
            result.sharpe_ratio,
            result.total_return * 100.0,
            result.max_drawdown * 100.0,
            result.win_rate * 100.0,
            result
                .calmar_ratio
                .map_or_else(|| "n/a".to_string(), |c| format!("{:.2}", c)),
            result.total_trades,
            format_params(&result.params)
        );
    }
    println!("{}", "=".repeat(120));

    info!("Optimization completed successfully");

    Ok(())
}
