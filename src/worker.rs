use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Sender;
use log::{debug, warn};

use crate::error::SymbolError;
use crate::market_data::PriceProvider;
use crate::models::*;
use crate::optimizer::{grid_cells, replay_stoploss_target, sample_indicators};
use crate::signals::{find_intersections, PreviousRun};

/// Work shared by every partition of a run.
#[derive(Debug, Clone)]
pub enum WorkerJob {
    Backtest {
        options: StrategyOptions,
        previous: Option<BacktestResult>,
    },
    OptimizeStoplossTarget {
        base: BacktestResult,
        grid: OptimizeOptions,
    },
    OptimizeIndicators {
        base: BacktestResult,
        indicators: IndicatorOptions,
    },
}

impl WorkerJob {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerJob::Backtest { previous: None, .. } => "backtest",
            WorkerJob::Backtest { .. } => "update",
            WorkerJob::OptimizeStoplossTarget { .. } => "stoploss/target optimization",
            WorkerJob::OptimizeIndicators { .. } => "indicator sampling",
        }
    }

    pub fn empty_payload(&self) -> PartitionPayload {
        match self {
            WorkerJob::Backtest { .. } => PartitionPayload::Backtest(BTreeMap::new()),
            WorkerJob::OptimizeStoplossTarget { .. } => PartitionPayload::StoplossTarget {
                optimized: BTreeMap::new(),
                effective: 0,
                count: 0,
            },
            WorkerJob::OptimizeIndicators { .. } => PartitionPayload::Indicators(BTreeMap::new()),
        }
    }
}

/// Results of one partition, keyed by symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionPayload {
    Backtest(BTreeMap<String, SymbolResult>),
    /// Per symbol, one result per grid cell in `grid_cells` order.
    StoplossTarget {
        optimized: BTreeMap<String, Vec<SymbolResult>>,
        effective: usize,
        count: usize,
    },
    Indicators(BTreeMap<String, FeatureSet>),
}

impl PartitionPayload {
    /// Union with another partition's payload of the same kind.
    pub fn merge(&mut self, other: PartitionPayload) {
        match (self, other) {
            (PartitionPayload::Backtest(mine), PartitionPayload::Backtest(theirs)) => {
                mine.extend(theirs)
            }
            (
                PartitionPayload::StoplossTarget {
                    optimized,
                    effective,
                    count,
                },
                PartitionPayload::StoplossTarget {
                    optimized: other_optimized,
                    effective: other_effective,
                    count: other_count,
                },
            ) => {
                optimized.extend(other_optimized);
                *effective += other_effective;
                *count += other_count;
            }
            (PartitionPayload::Indicators(mine), PartitionPayload::Indicators(theirs)) => {
                mine.extend(theirs)
            }
            (mine, theirs) => warn!(
                "Ignoring mismatched partition payload {:?} for {:?}",
                std::mem::discriminant(&theirs),
                std::mem::discriminant(mine)
            ),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PartitionPayload::Backtest(map) => map.len(),
            PartitionPayload::StoplossTarget { optimized, .. } => optimized.len(),
            PartitionPayload::Indicators(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: SymbolError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionOutput {
    pub payload: PartitionPayload,
    pub failures: Vec<SymbolFailure>,
}

#[derive(Debug)]
pub enum WorkerMessage {
    /// `progress` more symbols of the partition are done.
    Progress { worker: usize, progress: usize },
    Finished { worker: usize, output: PartitionOutput },
}

/// Symbols between two progress messages.
pub fn progress_step(partition_len: usize) -> usize {
    std::cmp::max(1, partition_len / 100)
}

/// Processes `partition` serially and reports over `sender`: progress every
/// `progress_step` symbols, then exactly one `Finished`. Returns early when
/// the orchestrator has stopped listening.
pub fn run_partition(
    worker: usize,
    job: &WorkerJob,
    partition: &[String],
    provider: &dyn PriceProvider,
    sender: &Sender<WorkerMessage>,
) {
    let step = progress_step(partition.len());
    let mut payload = job.empty_payload();
    let mut failures = Vec::new();

    for (index, symbol) in partition.iter().enumerate() {
        let outcome = catch_unwind(AssertUnwindSafe(|| process_symbol(job, symbol, provider)))
            .unwrap_or_else(|panic| {
                Err(SymbolError::Panicked {
                    symbol: symbol.clone(),
                    reason: panic_message(panic.as_ref()),
                })
            });

        match outcome {
            Ok(symbol_payload) => payload.merge(symbol_payload),
            Err(error) => {
                debug!("worker {}: {}", worker, error);
                // an update keeps the symbol's previous data when it cannot be refreshed
                if let WorkerJob::Backtest {
                    previous: Some(previous),
                    ..
                } = job
                {
                    if let Some(result) = previous.symbol_data.get(symbol) {
                        payload.merge(PartitionPayload::Backtest(BTreeMap::from([(
                            symbol.clone(),
                            result.clone(),
                        )])));
                    }
                }
                failures.push(SymbolFailure {
                    symbol: symbol.clone(),
                    error,
                });
            }
        }

        if (index + 1) % step == 0
            && sender
                .send(WorkerMessage::Progress {
                    worker,
                    progress: step,
                })
                .is_err()
        {
            return;
        }
    }

    let _ = sender.send(WorkerMessage::Finished {
        worker,
        output: PartitionOutput { payload, failures },
    });
}

fn process_symbol(
    job: &WorkerJob,
    symbol: &str,
    provider: &dyn PriceProvider,
) -> Result<PartitionPayload, SymbolError> {
    match job {
        WorkerJob::Backtest { options, previous } => {
            let previous_run = previous.as_ref().and_then(|previous| {
                previous
                    .symbol_data
                    .get(symbol)
                    .map(|result| PreviousRun {
                        result,
                        last_updated: previous.last_updated,
                    })
            });
            let since = previous_run
                .as_ref()
                .map(|run| incremental_since(options, run));
            let candles = fetch(provider, symbol, since)?;
            let result = find_intersections(options, symbol, &candles, previous_run)?;
            Ok(PartitionPayload::Backtest(BTreeMap::from([(
                symbol.to_string(),
                result,
            )])))
        }
        WorkerJob::OptimizeStoplossTarget { base, grid } => {
            let base_result = base_symbol(base, symbol)?;
            let candles = fetch(provider, symbol, None)?;
            let replay = replay_stoploss_target(
                &base.strategy_options,
                grid,
                symbol,
                &candles,
                base_result,
            )?;
            debug_assert_eq!(replay.results.len(), grid_cells(grid).len());
            Ok(PartitionPayload::StoplossTarget {
                optimized: BTreeMap::from([(symbol.to_string(), replay.results)]),
                effective: replay.effective,
                count: replay.count,
            })
        }
        WorkerJob::OptimizeIndicators { base, indicators } => {
            let base_result = base_symbol(base, symbol)?;
            let candles = fetch(provider, symbol, None)?;
            let features = sample_indicators(indicators, symbol, &candles, base_result)?;
            Ok(PartitionPayload::Indicators(BTreeMap::from([(
                symbol.to_string(),
                features,
            )])))
        }
    }
}

/// Caps the look-back of an incremental update at roughly a century.
const MAX_WARMUP_DAYS: usize = 36_500;

/// Earliest bar an incremental update needs: calendar days generous enough to
/// hold the warm-up margin in trading days, pulled back to the oldest holding.
fn incremental_since(options: &StrategyOptions, previous: &PreviousRun<'_>) -> DateTime<Utc> {
    let warmup_days = options.warmup_margin().saturating_mul(2).min(MAX_WARMUP_DAYS) as i64;
    let mut since = previous
        .last_updated
        .checked_sub_signed(Duration::days(warmup_days))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    for holding in &previous.result.holdings {
        since = since.min(holding.buy_date);
    }
    since
}

fn base_symbol<'a>(base: &'a BacktestResult, symbol: &str) -> Result<&'a SymbolResult, SymbolError> {
    base.symbol_data
        .get(symbol)
        .ok_or_else(|| SymbolError::MissingPriceData {
            symbol: symbol.to_string(),
        })
}

fn fetch(
    provider: &dyn PriceProvider,
    symbol: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Candle>, SymbolError> {
    provider
        .get_series(symbol, since)
        .map_err(|err| SymbolError::PriceFetch {
            symbol: symbol.to_string(),
            reason: format!("{:#}", err),
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
