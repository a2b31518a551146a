use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::indicator::IndicatorKind;
use crate::job_queue::{job, JobQueue};
use crate::market_data::PriceProvider;
use crate::models::*;
use crate::notifier::{Notifier, NotifyEvent};
use crate::optimizer::{
    cap_ratio_axis, grid_cells, normalize_dataset, stoploss_rows, validate_optimize_options,
};
use crate::orchestrator::{Orchestrator, RunReport};
use crate::performance::PerformanceCalculator;
use crate::run_status::RunStatus;
use crate::signals::validate_strategy_options;
use crate::store::{
    extend_blacklist, load_blacklist, OptimizedLink, ResultDocument, ResultField, ResultStatus,
    ResultStore,
};
use crate::worker::{PartitionPayload, WorkerJob};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Queues and conducts backtests, updates and optimizations over the
/// provider's symbol universe.
#[derive(Clone)]
pub struct Backtester {
    provider: Arc<dyn PriceProvider>,
    store: Arc<dyn ResultStore>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    status: RunStatus,
    queue: JobQueue,
}

impl Backtester {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        store: Arc<dyn ResultStore>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
        status: RunStatus,
    ) -> Self {
        Self {
            provider,
            store,
            notifier,
            settings,
            status,
            queue: JobQueue::new(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Queues a fresh backtest and returns its id and queue position.
    pub fn start_backtest(&self, options: StrategyOptions) -> Result<(String, usize)> {
        validate_strategy_options(&options)?;
        let id = Uuid::new_v4().to_string();
        self.store.add_result(ResultDocument::queued(&id))?;

        let run_id = id.clone();
        let position = self.schedule(&id, vec![id.clone()], move |backtester| {
            backtester.conduct_backtest(&run_id, options, None)
        });
        info!("Queued backtest {} at position {}", id, position);
        Ok((id, position))
    }

    /// Queues an incremental update of a finished backtest.
    pub fn update_backtest(&self, id: &str) -> Result<usize> {
        let previous = self.finished_results(id)?;
        if let Some(latest) = self.provider.latest_date() {
            if latest < previous.last_updated {
                return Err(EngineError::UpToDate {
                    id: id.to_string(),
                    last_updated: previous.last_updated,
                }
                .into());
            }
        }
        self.store
            .set_field(id, ResultField::Status(ResultStatus::Queued))?;

        let run_id = id.to_string();
        let options = previous.strategy_options.clone();
        let position = self.schedule(id, vec![id.to_string()], move |backtester| {
            backtester.conduct_backtest(&run_id, options, Some(previous))
        });
        info!("Queued update of {} at position {}", id, position);
        Ok(position)
    }

    /// Queues one replay per stoploss row of `grid` over the events of a
    /// finished backtest. Returns every derived id and the position of the
    /// first row.
    pub fn start_stoploss_target_optimize(
        &self,
        id: &str,
        mut grid: OptimizeOptions,
    ) -> Result<(Vec<String>, usize)> {
        validate_optimize_options(&grid)?;
        self.finished_results(id)?;
        cap_ratio_axis(&mut grid, self.settings.optimize_max_results);

        let mut ids = Vec::new();
        let mut first_position = None;
        for row in stoploss_rows(&grid) {
            let row_ids: Vec<String> = grid_cells(&row)
                .iter()
                .map(|cell| cell.derived_id(id))
                .collect();
            for derived in &row_ids {
                self.store.add_result(ResultDocument::queued(derived))?;
            }

            let base_id = id.to_string();
            let position = self.schedule(id, row_ids.clone(), move |backtester| {
                backtester.conduct_stoploss_target(&base_id, row)
            });
            first_position.get_or_insert(position);
            ids.extend(row_ids);
        }
        info!(
            "Queued stoploss/target optimization of {} with {} results",
            id,
            ids.len()
        );
        Ok((ids, first_position.unwrap_or_default()))
    }

    /// Queues sampling of `indicators` at every buy of a finished backtest.
    /// The dataset is stored under the backtest's id.
    pub fn start_indicator_optimize(
        &self,
        id: &str,
        indicators: IndicatorOptions,
    ) -> Result<(String, usize)> {
        if indicators.is_empty() {
            return Err(
                EngineError::InvalidStrategyOptions("no indicators to sample".to_string()).into(),
            );
        }
        for name in indicators.keys() {
            name.parse::<IndicatorKind>()
                .map_err(|err| EngineError::InvalidStrategyOptions(err.to_string()))?;
        }
        self.finished_results(id)?;

        let base_id = id.to_string();
        let position = self.schedule(id, Vec::new(), move |backtester| {
            backtester.conduct_indicator_sampling(&base_id, indicators)
        });
        info!("Queued indicator sampling of {} at position {}", id, position);
        Ok((id.to_string(), position))
    }

    fn schedule<F>(&self, channel: &str, documents: Vec<String>, work: F) -> usize
    where
        F: FnOnce(&Backtester) -> Result<()> + Send + 'static,
    {
        let backtester = self.clone();
        let channel = channel.to_string();
        self.queue.enqueue(
            job(move || backtester.execute(channel, documents, work)),
            false,
        )
    }

    async fn execute<F>(self, channel: String, documents: Vec<String>, work: F)
    where
        F: FnOnce(&Backtester) -> Result<()> + Send + 'static,
    {
        self.mark(&documents, ResultStatus::Running);
        let runner = self.clone();
        let outcome = tokio::task::spawn_blocking(move || work(&runner))
            .await
            .unwrap_or_else(|err| Err(anyhow!("run panicked: {}", err)));

        match outcome {
            Ok(()) => {
                self.mark(&documents, ResultStatus::Finished);
                self.status.set_phase("Idle");
                self.notifier.publish(
                    &channel,
                    NotifyEvent::Finished {
                        id: channel.clone(),
                    },
                );
            }
            Err(err) => {
                warn!("Run for {} failed: {:#}", channel, err);
                self.mark(&documents, ResultStatus::Failed);
                self.status.set_phase(format!("Failed: {}", channel));
            }
        }
    }

    fn mark(&self, documents: &[String], status: ResultStatus) {
        for id in documents {
            if let Err(err) = self.store.set_field(id, ResultField::Status(status)) {
                warn!("Failed to set status of {}: {:#}", id, err);
            }
        }
    }

    fn finished_results(&self, id: &str) -> Result<BacktestResult> {
        self.store
            .get_result(id)?
            .and_then(|document| document.results)
            .ok_or_else(|| EngineError::ResultNotFound(id.to_string()).into())
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(&self.settings, self.status.clone(), self.notifier.clone())
    }

    /// Runs a backtest, or continues `previous` when given, and stores the
    /// merged results with their summary.
    pub fn conduct_backtest(
        &self,
        id: &str,
        options: StrategyOptions,
        previous: Option<BacktestResult>,
    ) -> Result<()> {
        let blacklist = load_blacklist(&self.settings.blacklist_path)?;
        let universe = self.provider.symbols();
        let symbols: Vec<String> = universe
            .iter()
            .filter(|symbol| !blacklist.contains(*symbol))
            .cloned()
            .collect();
        if symbols.len() < universe.len() {
            info!(
                "Skipping {} blacklisted symbols",
                universe.len() - symbols.len()
            );
        }

        let created = previous
            .as_ref()
            .map(|previous| previous.created)
            .unwrap_or_else(Utc::now);
        let mut symbol_data = previous
            .as_ref()
            .map(|previous| previous.symbol_data.clone())
            .unwrap_or_default();

        let job = Arc::new(WorkerJob::Backtest {
            options: options.clone(),
            previous,
        });
        let report = self
            .orchestrator()
            .run(id, job, &symbols, self.provider.clone());
        log_report(id, &report);
        let PartitionPayload::Backtest(fresh) = report.payload else {
            return Err(anyhow!("Backtest {} produced an unexpected payload", id));
        };

        let faulty: Vec<String> = fresh
            .iter()
            .filter(|(_, result)| result.faulty)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbol_data.extend(fresh);
        if !faulty.is_empty() {
            let blacklist = extend_blacklist(&self.settings.blacklist_path, faulty)?;
            info!("Blacklist now holds {} symbols", blacklist.len());
        }

        let summary = PerformanceCalculator::summarize(&symbol_data);
        info!(
            "Backtest {}: {} symbols, {} events, total profit {:.2}",
            id, summary.symbols, summary.events, summary.total_profit
        );
        let results = BacktestResult {
            strategy_options: options,
            symbol_data,
            last_updated: covered_through(self.provider.latest_date()),
            created,
            summary: Some(summary.clone()),
        };
        self.store.set_field(id, ResultField::Summary(summary))?;
        self.store.set_field(id, ResultField::Results(results))?;
        Ok(())
    }

    /// Replays one stoploss row of a grid and stores a derived result per
    /// cell, linked to the base.
    pub fn conduct_stoploss_target(&self, base_id: &str, grid: OptimizeOptions) -> Result<()> {
        let base = self.finished_results(base_id)?;
        let symbols: Vec<String> = base.symbol_data.keys().cloned().collect();
        let cells = grid_cells(&grid);

        let job = Arc::new(WorkerJob::OptimizeStoplossTarget {
            base: base.clone(),
            grid,
        });
        let report = self
            .orchestrator()
            .run(base_id, job, &symbols, self.provider.clone());
        log_report(base_id, &report);
        let PartitionPayload::StoplossTarget {
            optimized,
            effective,
            count,
        } = report.payload
        else {
            return Err(anyhow!(
                "Optimization of {} produced an unexpected payload",
                base_id
            ));
        };
        info!(
            "Optimization of {}: {} of {} replayed exits changed reason",
            base_id, effective, count
        );

        let mut per_cell: Vec<BTreeMap<String, SymbolResult>> = vec![BTreeMap::new(); cells.len()];
        for (symbol, results) in optimized {
            for (cell_data, result) in per_cell.iter_mut().zip(results) {
                cell_data.insert(symbol.clone(), result);
            }
        }

        let mut derived_ids = Vec::with_capacity(cells.len());
        for (cell, symbol_data) in cells.iter().zip(per_cell) {
            let derived = cell.derived_id(base_id);
            let summary = PerformanceCalculator::summarize(&symbol_data);
            let results = BacktestResult {
                strategy_options: cell.apply(&base.strategy_options),
                symbol_data,
                last_updated: base.last_updated,
                created: base.created,
                summary: Some(summary.clone()),
            };
            if self.store.get_result(&derived)?.is_none() {
                self.store.add_result(ResultDocument::queued(&derived))?;
            }
            self.store.set_field(&derived, ResultField::Summary(summary))?;
            self.store.set_field(&derived, ResultField::Results(results))?;
            self.store.set_field(
                &derived,
                ResultField::Optimized(OptimizedLink {
                    base: base_id.to_string(),
                    ids: Vec::new(),
                }),
            )?;
            debug!("Stored optimized result {}", derived);
            derived_ids.push(derived);
        }

        // earlier rows of the same grid may have linked their ids already
        let mut linked = self
            .store
            .get_result(base_id)?
            .and_then(|document| document.optimized)
            .map(|link| link.ids)
            .unwrap_or_default();
        for derived in derived_ids {
            if !linked.contains(&derived) {
                linked.push(derived);
            }
        }
        self.store.set_field(
            base_id,
            ResultField::Optimized(OptimizedLink {
                base: base_id.to_string(),
                ids: linked,
            }),
        )?;
        Ok(())
    }

    /// Samples `indicators` at every buy of the base backtest and stores the
    /// normalized dataset under the base id.
    pub fn conduct_indicator_sampling(
        &self,
        base_id: &str,
        indicators: IndicatorOptions,
    ) -> Result<()> {
        let base = self.finished_results(base_id)?;
        let symbols: Vec<String> = base.symbol_data.keys().cloned().collect();

        let job = Arc::new(WorkerJob::OptimizeIndicators { base, indicators });
        let report = self
            .orchestrator()
            .run(base_id, job, &symbols, self.provider.clone());
        log_report(base_id, &report);
        let PartitionPayload::Indicators(sampled) = report.payload else {
            return Err(anyhow!(
                "Indicator sampling of {} produced an unexpected payload",
                base_id
            ));
        };

        let mut dataset = IndicatorDataset {
            symbols: sampled,
            normalized: BTreeMap::new(),
        };
        normalize_dataset(&mut dataset);
        info!(
            "Sampled indicators of {} for {} symbols ({} columns)",
            base_id,
            dataset.symbols.len(),
            dataset.normalized.len()
        );
        self.store.set_indicator_dataset(base_id, dataset)?;
        Ok(())
    }
}

/// First instant after the latest bar, so a resumed run starts on the next bar.
fn covered_through(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    latest
        .map(|date| date + Duration::days(1))
        .unwrap_or_else(Utc::now)
}

fn log_report(id: &str, report: &RunReport) {
    if !report.failures.is_empty() {
        warn!("{}: {} symbols failed", id, report.failures.len());
        for failure in &report.failures {
            debug!("{}: {}", id, failure.error);
        }
    }
    for partition in &report.failed_partitions {
        warn!(
            "{}: partition {} with {} symbols failed: {}",
            id,
            partition.worker,
            partition.symbols.len(),
            partition.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;
    use crate::market_data::MarketData;
    use crate::notifier::ChannelNotifier;
    use crate::store::MemoryStore;
    use std::path::{Path, PathBuf};

    fn options() -> StrategyOptions {
        serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 5, "minDuration": 1 } },
            "sellIndicators": { "SMA": { "period": 5, "minDuration": 1 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 3,
            "stopLossAtr": 1.0,
            "riskRewardRatio": 2.0
        }))
        .unwrap()
    }

    fn closes() -> Vec<f64> {
        let mut closes = vec![10.0; 10];
        closes.extend((0..10).map(|i| 11.0 + i as f64 * 0.1));
        closes.extend(vec![8.0; 5]);
        closes
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("signal-engine-bt-{}", Uuid::new_v4()))
    }

    fn backtester(candles: Vec<Candle>, dir: &Path) -> (Backtester, MemoryStore, ChannelNotifier) {
        let store = MemoryStore::new();
        let notifier = ChannelNotifier::new(256);
        let settings = EngineSettings {
            num_threads: 2,
            blacklist_path: dir.join("blacklist.json"),
            results_path: dir.join("results.json"),
            ..Default::default()
        };
        let backtester = Backtester::new(
            Arc::new(MarketData::from_candles(candles).unwrap()),
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            settings,
            RunStatus::new(),
        );
        (backtester, store, notifier)
    }

    #[tokio::test]
    async fn backtest_finishes_and_notifies() {
        let dir = temp_dir();
        let mut candles = candles_from_closes("AAA", &closes());
        candles.extend(candles_from_closes("BBB", &closes()));
        let (backtester, store, notifier) = backtester(candles, &dir);
        let mut receiver = notifier.subscribe();

        let (id, position) = backtester.start_backtest(options()).unwrap();
        assert_eq!(position, 0);
        backtester.queue().wait_idle().await;

        let document = store.get_result(&id).unwrap().unwrap();
        assert_eq!(document.status, ResultStatus::Finished);
        let results = document.results.unwrap();
        assert_eq!(results.symbol_data.len(), 2);
        assert_eq!(document.summary.unwrap().symbols, 2);

        let mut finished = false;
        while let Ok(notification) = receiver.try_recv() {
            assert_eq!(notification.channel, id);
            finished |= notification.event == NotifyEvent::Finished { id: id.clone() };
        }
        assert!(finished);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn update_of_a_current_backtest_is_rejected() {
        let dir = temp_dir();
        let (backtester, _, _) = backtester(candles_from_closes("AAA", &closes()), &dir);

        let (id, _) = backtester.start_backtest(options()).unwrap();
        backtester.queue().wait_idle().await;

        let err = backtester.update_backtest(&id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::UpToDate { .. })
        ));
        assert!(backtester.update_backtest("missing").is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn faulty_symbols_are_blacklisted_and_skipped_later() {
        let dir = temp_dir();
        let mut faulty = candles_from_closes("BAD", &closes());
        faulty[3].close = 0.0;
        let mut candles = candles_from_closes("AAA", &closes());
        candles.extend(faulty);
        let (backtester, store, _) = backtester(candles, &dir);

        let (first, _) = backtester.start_backtest(options()).unwrap();
        backtester.queue().wait_idle().await;
        let first = store.get_result(&first).unwrap().unwrap().results.unwrap();
        assert!(first.symbol_data["BAD"].faulty);
        assert!(load_blacklist(dir.join("blacklist.json"))
            .unwrap()
            .contains("BAD"));

        let (second, _) = backtester.start_backtest(options()).unwrap();
        backtester.queue().wait_idle().await;
        let second = store.get_result(&second).unwrap().unwrap().results.unwrap();
        assert_eq!(
            second.symbol_data.keys().collect::<Vec<_>>(),
            vec!["AAA"]
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn optimization_links_derived_results_to_the_base() {
        let dir = temp_dir();
        let (backtester, store, _) = backtester(candles_from_closes("AAA", &closes()), &dir);
        let (id, _) = backtester.start_backtest(options()).unwrap();
        backtester.queue().wait_idle().await;

        let grid = OptimizeOptions {
            start_stoploss: 1.0,
            end_stoploss: 2.0,
            stride_stoploss: 0.5,
            start_ratio: 1.0,
            end_ratio: 2.0,
            stride_ratio: 1.0,
        };
        let (ids, position) = backtester
            .start_stoploss_target_optimize(&id, grid)
            .unwrap();
        assert_eq!(position, 0);
        assert_eq!(
            ids,
            vec![
                format!("{}_optimized_1.00_1.00", id),
                format!("{}_optimized_1.50_1.00", id)
            ]
        );
        backtester.queue().wait_idle().await;

        let base = store.get_result(&id).unwrap().unwrap();
        let base_events = base.results.as_ref().unwrap().symbol_data["AAA"].events.len();
        assert_eq!(base.optimized.unwrap().ids, ids);
        for derived in &ids {
            let document = store.get_result(derived).unwrap().unwrap();
            assert_eq!(document.status, ResultStatus::Finished);
            assert_eq!(document.optimized.unwrap().base, id);
            let results = document.results.unwrap();
            assert!(results.strategy_options.stop_loss_atr.is_some());
            assert!(results.symbol_data["AAA"].events.len() <= base_events);
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn entry_points_validate_before_queueing() {
        let dir = temp_dir();
        let (backtester, store, _) = backtester(candles_from_closes("AAA", &closes()), &dir);

        let mut bad = options();
        bad.main_sell_indicator = "RSI".to_string();
        assert!(backtester.start_backtest(bad).is_err());
        assert!(store.result_ids().is_empty());

        let grid = OptimizeOptions {
            start_stoploss: 1.0,
            end_stoploss: 2.0,
            stride_stoploss: 0.0,
            start_ratio: 1.0,
            end_ratio: 2.0,
            stride_ratio: 1.0,
        };
        assert!(backtester
            .start_stoploss_target_optimize("missing", grid)
            .is_err());
        assert!(backtester
            .start_indicator_optimize("missing", IndicatorOptions::new())
            .is_err());
        assert!(!backtester.queue().is_busy());
        let _ = std::fs::remove_dir_all(dir);
    }
}
