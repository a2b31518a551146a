use crate::context::{read_json_file, AppContext};
use crate::models::{IndicatorOptions, OptimizeOptions};
use crate::store::ResultStore;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn stoploss_target(
    app: &AppContext,
    market_data_file: &Path,
    id: &str,
    grid_file: &Path,
) -> Result<()> {
    let grid: OptimizeOptions = read_json_file(grid_file)?;
    let market_data = app.market_data_from_file(market_data_file, None)?;
    let backtester = app.backtester(market_data);

    let (ids, position) = backtester.start_stoploss_target_optimize(id, grid)?;
    info!(
        "Optimization of {} queued at position {} ({} results)",
        id,
        position,
        ids.len()
    );
    backtester.queue().wait_idle().await;
    app.persist()?;

    for derived in ids {
        let profit = app
            .store()
            .get_result(&derived)?
            .and_then(|document| document.summary)
            .map(|summary| format!("{:.2}", summary.total_profit))
            .unwrap_or_else(|| "n/a".to_string());
        println!("{}\t{}", derived, profit);
    }
    Ok(())
}

pub async fn indicators(
    app: &AppContext,
    market_data_file: &Path,
    id: &str,
    indicators_file: &Path,
) -> Result<()> {
    let indicators: IndicatorOptions = read_json_file(indicators_file)?;
    let market_data = app.market_data_from_file(market_data_file, None)?;
    let backtester = app.backtester(market_data);

    let (dataset_id, position) = backtester.start_indicator_optimize(id, indicators)?;
    info!(
        "Indicator sampling of {} queued at position {}",
        id, position
    );
    backtester.queue().wait_idle().await;
    app.persist()?;

    if let Some(dataset) = app.store().get_indicator_dataset(&dataset_id)? {
        let rows: usize = dataset.symbols.values().map(|set| set.data.len()).sum();
        println!(
            "{}\t{} symbols\t{} rows\t{}",
            dataset_id,
            dataset.symbols.len(),
            rows,
            dataset.normalized.keys().cloned().collect::<Vec<_>>().join(",")
        );
    }
    Ok(())
}
