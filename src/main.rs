use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use signal_engine::{
    commands::{backtest, generate_sample, optimize, show},
    config::EngineSettings,
    context::AppContext,
};
use std::collections::HashSet;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Back-test and optimize indicator-driven trading strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic market data snapshot
    GenerateSample {
        /// Destination file for the snapshot (.json for JSON, anything else for bincode)
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Number of tickers
        #[arg(long, default_value_t = 50)]
        tickers: usize,
        /// Number of trading days per ticker
        #[arg(long, default_value_t = 1000)]
        days: usize,
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Backtest a strategy over every symbol of the snapshot
    Backtest {
        /// Strategy options as JSON
        options: PathBuf,
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Comma separated list of tickers to restrict the run to
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
    },
    /// Continue a stored backtest over bars added since it last ran
    Update {
        id: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Replay a backtest over a stoploss/risk-reward grid
    OptimizeStoplossTarget {
        id: String,
        /// Grid options as JSON
        grid: PathBuf,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Sample indicator values at every buy of a backtest
    OptimizeIndicators {
        id: String,
        /// Indicator options as JSON
        indicators: PathBuf,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// List stored results, or print one
    Show { id: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = EngineSettings::from_env()?;
    info!(
        "Starting signal engine with {} threads. Not financial advice.",
        settings.num_threads
    );

    match command {
        Commands::GenerateSample {
            output,
            tickers,
            days,
            seed,
        } => {
            let output_path = resolve_market_data_path(output);
            generate_sample::run(&output_path, tickers, days, seed).await?;
        }
        Commands::Backtest {
            options,
            data_file,
            tickers,
        } => {
            let app = AppContext::initialize(settings)?;
            let scope: HashSet<String> = tickers
                .iter()
                .map(|ticker| ticker.trim().to_uppercase())
                .filter(|ticker| !ticker.is_empty())
                .collect();
            let scope = (!scope.is_empty()).then_some(&scope);
            backtest::run(&app, &resolve_market_data_path(data_file), &options, scope).await?;
        }
        Commands::Update { id, data_file } => {
            let app = AppContext::initialize(settings)?;
            backtest::update(&app, &resolve_market_data_path(data_file), &id).await?;
        }
        Commands::OptimizeStoplossTarget {
            id,
            grid,
            data_file,
        } => {
            let app = AppContext::initialize(settings)?;
            optimize::stoploss_target(&app, &resolve_market_data_path(data_file), &id, &grid)
                .await?;
        }
        Commands::OptimizeIndicators {
            id,
            indicators,
            data_file,
        } => {
            let app = AppContext::initialize(settings)?;
            optimize::indicators(&app, &resolve_market_data_path(data_file), &id, &indicators)
                .await?;
        }
        Commands::Show { id } => {
            let app = AppContext::initialize(settings)?;
            show::run(&app, id.as_deref()).await?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE))
}
