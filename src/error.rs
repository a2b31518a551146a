use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure while processing a single symbol. Never aborts the batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SymbolError {
    #[error("no price data for {symbol}")]
    MissingPriceData { symbol: String },
    #[error("failed to fetch prices for {symbol}: {reason}")]
    PriceFetch { symbol: String, reason: String },
    #[error("indicator {indicator} failed for {symbol}: {reason}")]
    IndicatorCompute {
        symbol: String,
        indicator: String,
        reason: String,
    },
    #[error("processing {symbol} panicked: {reason}")]
    Panicked { symbol: String, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid strategy options: {0}")]
    InvalidStrategyOptions(String),
    #[error("invalid optimize options: {0}")]
    InvalidOptimizeOptions(String),
    #[error("backtest results {0} do not exist")]
    ResultNotFound(String),
    #[error("backtest {id} is already up to date (last updated {last_updated})")]
    UpToDate {
        id: String,
        last_updated: DateTime<Utc>,
    },
}
