use crate::context::{read_json_file, AppContext};
use crate::models::StrategyOptions;
use crate::store::ResultStore;
use anyhow::Result;
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;

pub async fn run(
    app: &AppContext,
    market_data_file: &Path,
    options_file: &Path,
    tickers: Option<&HashSet<String>>,
) -> Result<()> {
    let options: StrategyOptions = read_json_file(options_file)?;
    info!(
        "Backtesting {} / {} from {}",
        options.main_buy_indicator,
        options.main_sell_indicator,
        options_file.display()
    );
    let market_data = app.market_data_from_file(market_data_file, tickers)?;
    let backtester = app.backtester(market_data);

    let (id, position) = backtester.start_backtest(options)?;
    info!("Backtest {} queued at position {}", id, position);
    backtester.queue().wait_idle().await;
    app.persist()?;
    report(app, &id)
}

pub async fn update(app: &AppContext, market_data_file: &Path, id: &str) -> Result<()> {
    let market_data = app.market_data_from_file(market_data_file, None)?;
    let backtester = app.backtester(market_data);

    let position = backtester.update_backtest(id)?;
    info!("Update of {} queued at position {}", id, position);
    backtester.queue().wait_idle().await;
    app.persist()?;
    report(app, id)
}

fn report(app: &AppContext, id: &str) -> Result<()> {
    let status = app.status_handle().snapshot();
    if status.failed_symbols > 0 || status.failed_partitions > 0 {
        warn!(
            "{} symbols and {} partitions failed",
            status.failed_symbols, status.failed_partitions
        );
    }
    match app.store().get_result(id)?.and_then(|document| document.summary) {
        Some(summary) => println!("{}\n{}", id, serde_json::to_string_pretty(&summary)?),
        None => warn!("Backtest {} finished without a summary", id),
    }
    Ok(())
}
