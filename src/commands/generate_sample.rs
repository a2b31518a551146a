use crate::market_data::MarketData;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(output_path: &Path, tickers: usize, days: usize, seed: u64) -> Result<()> {
    info!(
        "Generating sample market data for {} tickers over {} days (seed {})",
        tickers, days, seed
    );
    let market_data = MarketData::generate_sample(tickers, days, seed)?;
    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );
    Ok(())
}
