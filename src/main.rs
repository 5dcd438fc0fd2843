//! owl-trader - main entry point
//!
//! This binary provides two subcommands:
//! - backtest: Replay a bar series through the breakout strategy
//! - optimize: Grid search over strategy parameters

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "owl-trader")]
#[command(about = "N-day breakout backtester with parameter optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for run logs
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btc_usdt_1d.json")]
        config: String,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,

        /// Symbol (overrides config file)
        #[arg(long)]
        symbol: Option<String>,

        /// Write equity, orders, trades and metrics to the results directory
        #[arg(long)]
        export: bool,
    },

    /// Optimize strategy parameters (grid search from JSON config)
    Optimize {
        /// Path to configuration file with grid section
        #[arg(short, long, default_value = "configs/btc_usdt_1d.json")]
        config: String,

        /// Sort results by metric (sharpe, return, drawdown, win_rate, profit_factor, calmar)
        #[arg(long, default_value = "sharpe")]
        sort_by: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },
}

/// Where a run's log goes and how chatty it is
struct LogTarget<'a> {
    dir: &'a Path,
    command: &'a str,
    verbose: bool,
    /// Optimize keeps the console free for the progress bar
    file_only: bool,
}

impl LogTarget<'_> {
    /// `owl-trader_{command}_{timestamp}.log`
    fn file_name(&self) -> String {
        format!(
            "owl-trader_{}_{}.log",
            self.command,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        )
    }

    /// Crate logs at info (debug when verbose); dependencies at warn
    fn filter(&self) -> EnvFilter {
        let crate_level = if self.verbose { "debug" } else { "info" };
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("warn,owl_trader={}", crate_level)))
    }
}

fn setup_logging(target: &LogTarget<'_>) -> Result<()> {
    std::fs::create_dir_all(target.dir)
        .with_context(|| format!("Failed to create log directory {}", target.dir.display()))?;
    let file_name = target.file_name();
    let log_path = target.dir.join(&file_name);

    if target.file_only {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never(target.dir, &file_name))
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(target.filter())
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(true);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never(target.dir, &file_name))
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(target.filter())
            .with(console_layer)
            .with(file_layer)
            .init();

        debug!("Logging {} run to {}", target.command, log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
    };

    setup_logging(&LogTarget {
        dir: &cli.log_dir,
        command: command_name,
        verbose: cli.verbose,
        file_only,
    })?;

    match cli.command {
        Commands::Backtest {
            config,
            capital,
            start,
            end,
            symbol,
            export,
        } => commands::backtest::run(config, capital, start, end, symbol, export),

        Commands::Optimize {
            config,
            sort_by,
            top,
            sequential,
        } => commands::optimize::run(config, sort_by, top, sequential),
    }
}
