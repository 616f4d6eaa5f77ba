use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    config::{BacktestSettings, BreakoutParams},
    market_data,
    models::parse_parameter_map_from_json,
    trading_rules::{calculate_position_size, calculate_rr_ratio},
    Engine, LogObserver,
};
use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "swing-engine")]
#[command(about = "Breakout backtesting and pre-trade risk tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest the classic breakout strategy over an OHLCV CSV file
    Backtest {
        /// CSV with timestamp,open,high,low,close,volume columns
        #[arg(long, value_name = "PATH")]
        bars: PathBuf,
        /// Instrument symbol used in logs and the report (defaults to the file stem)
        #[arg(long)]
        ticker: Option<String>,
        /// Strategy parameter overrides as a JSON object, e.g. '{"lookback": 30}'
        #[arg(long)]
        params: Option<String>,
        /// Starting cash (overrides BACKTEST_INITIAL_CASH)
        #[arg(long)]
        initial_cash: Option<f64>,
        /// Commission rate per leg (overrides BACKTEST_COMMISSION_RATE)
        #[arg(long)]
        commission: Option<f64>,
        /// First bar date to include (inclusive)
        #[arg(long)]
        start: Option<String>,
        /// Last bar date to include (inclusive; a bare date covers the whole day)
        #[arg(long)]
        end: Option<String>,
        /// Bars per year for Sharpe annualization (overrides BACKTEST_BARS_PER_YEAR)
        #[arg(long)]
        bars_per_year: Option<f64>,
        /// Write the JSON report here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Pre-trade risk calculations
    Risk {
        #[command(subcommand)]
        command: RiskCommands,
    },
}

#[derive(Subcommand)]
enum RiskCommands {
    /// Reward-to-risk ratio of a planned trade
    Rr {
        #[arg(long)]
        entry: f64,
        #[arg(long)]
        stop: f64,
        #[arg(long)]
        target: f64,
    },
    /// Shares to buy so that a stop-out loses the given percent of capital
    Size {
        #[arg(long)]
        capital: f64,
        #[arg(long)]
        risk_percent: f64,
        #[arg(long)]
        entry: f64,
        #[arg(long)]
        stop: f64,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Backtest {
            bars,
            ticker,
            params,
            initial_cash,
            commission,
            start,
            end,
            bars_per_year,
            output,
        } => {
            let settings = resolve_settings(initial_cash, commission, bars_per_year)?;
            let params = match params {
                Some(json) => BreakoutParams::from_parameters(&parse_parameter_map_from_json(&json)?)?,
                None => BreakoutParams::default(),
            };
            let ticker = ticker
                .or_else(|| {
                    bars.file_stem()
                        .map(|stem| stem.to_string_lossy().to_uppercase())
                })
                .ok_or_else(|| anyhow!("Cannot derive a ticker from {}", bars.display()))?;

            let (start, end) = market_data::parse_date_window(start.as_deref(), end.as_deref())?;
            let (series, quality) = market_data::load_csv(&bars, &ticker)?;
            if quality.invalid_rows > 0 {
                warn!(
                    "{} rows of {} were skipped as invalid",
                    quality.invalid_rows,
                    bars.display()
                );
            }
            if let Some((first, last)) = series.date_range() {
                info!("{}: data available from {} to {}", ticker, first, last);
            }
            let series = series.window(start, end);

            let engine = Engine::new(params, settings)?;
            let report = engine.run(&series, &mut LogObserver);
            let rendered = serde_json::to_string_pretty(&report)?;

            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write report to {}", path.display()))?;
                    info!("Report written to {}", path.display());
                }
                None => println!("{}", rendered),
            }

            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Risk { command } => {
            match command {
                RiskCommands::Rr {
                    entry,
                    stop,
                    target,
                } => match calculate_rr_ratio(entry, stop, target) {
                    Some(ratio) => println!("R:R = {:.2}", ratio),
                    None => println!("R:R undefined (zero risk or zero reward)"),
                },
                RiskCommands::Size {
                    capital,
                    risk_percent,
                    entry,
                    stop,
                } => match calculate_position_size(capital, risk_percent, entry, stop) {
                    Some(shares) => println!("Position size = {} shares", shares),
                    None => println!("Position size undefined (zero risk per share)"),
                },
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_settings(
    initial_cash: Option<f64>,
    commission: Option<f64>,
    bars_per_year: Option<f64>,
) -> Result<BacktestSettings> {
    let env_settings: HashMap<String, String> = env::vars()
        .filter(|(key, _)| key.starts_with("BACKTEST_"))
        .collect();
    let mut settings = BacktestSettings::from_settings_map(&env_settings)?;

    if let Some(value) = initial_cash {
        settings.initial_cash = value;
    }
    if let Some(value) = commission {
        settings.commission_rate = value;
    }
    if let Some(value) = bars_per_year {
        settings.bars_per_year = value;
    }
    settings.validate()?;
    Ok(settings)
}
