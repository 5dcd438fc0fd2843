//! Backtest command implementation

use anyhow::{Context, Result};
use owl_trader::monthly_pnl::MonthlyPnLMatrix;
use owl_trader::{report, Backtester, Config};
use tracing::{debug, info};

fn format_ratio(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, suffix),
        None => "n/a".to_string(),
    }
}

pub fn run(
    config_path: String,
    capital_override: Option<f64>,
    start_override: Option<String>,
    end_override: Option<String>,
    symbol_override: Option<String>,
    export: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.backtest.initial_capital = capital;
    }
    if let Some(symbol) = symbol_override {
        info!("Overriding symbol to: {}", symbol);
        config.backtest.symbol = symbol;
    }
    if start_override.is_some() {
        config.backtest.start_date = start_override;
    }
    if end_override.is_some() {
        config.backtest.end_date = end_override;
    }

    // Reject bad parameters before touching any data
    let params = config.params().context("Invalid configuration")?;
    debug!("Strategy parameters: {:?}", params);

    let series = super::load_bars(&config)?;
    if series.is_empty() {
        anyhow::bail!("No bars for {} in the requested range", config.backtest.symbol);
    }

    let timezone = params.timezone;
    info!("Running backtest over {} bars...", series.len());
    let result = Backtester::new(params)?.run(&series)?;
    let m = &result.metrics;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {} {}", config.backtest.symbol, config.backtest.timeframe);
    println!("{}", "=".repeat(60));
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!(
            "Period:             {} to {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        );
    }
    println!("Bars Processed:     {}", result.bars_processed);
    println!("Initial Capital:    {:.2}", m.initial_capital);
    println!("Final Equity:       {:.2}", m.final_equity);
    println!("Total Return:       {:.2}%", m.total_return * 100.0);
    println!("Annualized Return:  {}", format_ratio(m.annualized_return.map(|r| r * 100.0), "%"));
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Calmar Ratio:       {}", format_ratio(m.calmar_ratio, ""));
    println!("Volatility:         {:.2}%", m.volatility * 100.0);
    println!("Max Drawdown:       {:.2}% ({:.2})", m.max_drawdown * 100.0, m.max_drawdown_amount);
    println!("Exposure:           {:.2}%", m.exposure * 100.0);
    println!("{}", "-".repeat(60));
    println!("Orders:             {} buy / {} sell", m.buy_orders, m.sell_orders);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Win Rate:           {:.2}%", m.win_rate * 100.0);
    println!("Profit Factor:      {}", format_ratio(m.profit_factor, ""));
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Commission:   {:.2}", m.total_commission);
    println!("{}", "=".repeat(60));

    let matrix = MonthlyPnLMatrix::from_trades_in(&result.trades, timezone);
    println!("{}", matrix.render());

    if export {
        let run_name = format!(
            "{}_{}",
            config.backtest.symbol.replace('/', "").to_uppercase(),
            config.backtest.timeframe
        );
        let paths = report::export_result(&result, &config.backtest.results_dir, &run_name)?;
        println!("Equity curve:  {}", paths.equity.display());
        println!("Orders:        {}", paths.orders.display());
        println!("Trades:        {}", paths.trades.display());
        println!("Metrics:       {}", paths.metrics.display());
    }

    info!("Backtest completed successfully");

    Ok(())
}
