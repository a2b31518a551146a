use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::config::EngineSettings;
use crate::market_data::PriceProvider;
use crate::notifier::{Notifier, NotifyEvent};
use crate::run_status::RunStatus;
use crate::worker::{run_partition, PartitionPayload, SymbolFailure, WorkerJob, WorkerMessage};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Partition whose worker hung or died before reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFailure {
    pub worker: usize,
    pub symbols: Vec<String>,
    pub reason: String,
}

/// Merged outcome of a run over every partition that finished.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub payload: PartitionPayload,
    pub failures: Vec<SymbolFailure>,
    pub failed_partitions: Vec<PartitionFailure>,
}

/// Contiguous partitions of `ceil(n / threads)` symbols each.
pub fn partition_symbols(symbols: &[String], threads: usize) -> Vec<Vec<String>> {
    if symbols.is_empty() {
        return Vec::new();
    }
    let partition_size = symbols.len().div_ceil(threads.max(1));
    symbols
        .chunks(partition_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

struct WorkerSlot {
    symbols: Vec<String>,
    handle: Option<JoinHandle<()>>,
    last_seen: Instant,
    reported: usize,
    resolved: bool,
}

/// Fans a job out over a pool of worker threads and merges what comes back.
pub struct Orchestrator {
    num_threads: usize,
    worker_timeout: Duration,
    show_progress: bool,
    status: RunStatus,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(settings: &EngineSettings, status: RunStatus, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            num_threads: settings.num_threads.max(1),
            worker_timeout: settings.worker_timeout,
            show_progress: settings.show_progress,
            status,
            notifier,
        }
    }

    /// Runs `job` over `symbols` and blocks until every partition either
    /// finished or was given up on by the watchdog.
    pub fn run(
        &self,
        channel: &str,
        job: Arc<WorkerJob>,
        symbols: &[String],
        provider: Arc<dyn PriceProvider>,
    ) -> RunReport {
        let total = symbols.len();
        let partitions = partition_symbols(symbols, self.num_threads);
        info!(
            "Running {} over {} symbols with {} workers",
            job.label(),
            total,
            partitions.len()
        );
        self.status.begin(total);
        self.status.set_phase(format!("Running {}", job.label()));
        self.status.clear_debug_note();

        let (sender, receiver) = unbounded::<WorkerMessage>();
        let mut slots: Vec<WorkerSlot> = partitions
            .into_iter()
            .enumerate()
            .map(|(worker, partition)| {
                let sender = sender.clone();
                let job = job.clone();
                let provider = provider.clone();
                let symbols = partition.clone();
                let handle = thread::Builder::new()
                    .name(format!("worker-{}", worker))
                    .spawn(move || {
                        run_partition(worker, &job, &partition, provider.as_ref(), &sender)
                    });
                let handle = match handle {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        warn!("Failed to spawn worker {}: {}", worker, err);
                        None
                    }
                };
                WorkerSlot {
                    symbols,
                    handle,
                    last_seen: Instant::now(),
                    reported: 0,
                    resolved: false,
                }
            })
            .collect();
        drop(sender);

        let progress_bar = self.progress_bar(total);
        let mut report = RunReport {
            payload: job.empty_payload(),
            failures: Vec::new(),
            failed_partitions: Vec::new(),
        };
        let mut processed = 0usize;

        while slots.iter().any(|slot| !slot.resolved) {
            // a thread seen ended here has already sent everything it will send
            let ended: Vec<bool> = slots
                .iter()
                .map(|slot| slot.handle.as_ref().map_or(true, JoinHandle::is_finished))
                .collect();
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(message) => {
                    self.handle_message(channel, message, &mut slots, &mut report, &mut processed, total);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // every sender is gone; whatever is unresolved never reported
                    for (worker, slot) in slots.iter_mut().enumerate() {
                        if !slot.resolved {
                            Self::give_up(worker, slot, "worker ended without finishing", &mut report);
                        }
                    }
                    break;
                }
            }

            for message in receiver.try_iter().collect::<Vec<_>>() {
                self.handle_message(channel, message, &mut slots, &mut report, &mut processed, total);
            }
            self.watchdog(&mut slots, &ended, &mut report);
            if let Some(bar) = &progress_bar {
                bar.set_position(processed as u64);
            }
        }

        for slot in slots.iter_mut() {
            if let Some(handle) = slot.handle.take() {
                if handle.is_finished() {
                    let _ = handle.join();
                }
            }
        }

        self.status.set_failures(report.failures.len(), report.failed_partitions.len());
        if let Some(bar) = progress_bar {
            if report.failed_partitions.is_empty() {
                bar.finish_with_message("Run completed");
            } else {
                bar.finish_with_message("Run completed with failed partitions");
            }
        }
        if !report.failed_partitions.is_empty() {
            warn!(
                "{} of {} partitions failed",
                report.failed_partitions.len(),
                slots.len()
            );
        }
        report
    }

    fn handle_message(
        &self,
        channel: &str,
        message: WorkerMessage,
        slots: &mut [WorkerSlot],
        report: &mut RunReport,
        processed: &mut usize,
        total: usize,
    ) {
        let worker = match &message {
            WorkerMessage::Progress { worker, .. } | WorkerMessage::Finished { worker, .. } => *worker,
        };
        let Some(slot) = slots.get_mut(worker) else {
            return;
        };
        // late messages of a partition given up on are dropped
        if slot.resolved {
            return;
        }
        slot.last_seen = Instant::now();

        let advanced = match message {
            WorkerMessage::Progress { progress, .. } => {
                let advanced = progress.min(slot.symbols.len() - slot.reported);
                slot.reported += advanced;
                advanced
            }
            WorkerMessage::Finished { output, .. } => {
                slot.resolved = true;
                report.payload.merge(output.payload);
                report.failures.extend(output.failures);
                let remaining = slot.symbols.len() - slot.reported;
                slot.reported = slot.symbols.len();
                remaining
            }
        };

        if advanced > 0 {
            *processed += advanced;
            self.status.add_processed(advanced);
            let fraction = if total == 0 {
                1.0
            } else {
                *processed as f64 / total as f64
            };
            self.notifier
                .publish(channel, NotifyEvent::Progress { fraction });
        }
    }

    fn watchdog(&self, slots: &mut [WorkerSlot], ended: &[bool], report: &mut RunReport) {
        for (worker, slot) in slots.iter_mut().enumerate() {
            if slot.resolved {
                continue;
            }
            if ended[worker] {
                Self::give_up(worker, slot, "worker ended without finishing", report);
                self.status
                    .set_debug_note(format!("worker {} ended without finishing", worker));
            } else if slot.last_seen.elapsed() > self.worker_timeout {
                let reason = format!(
                    "worker silent for more than {}s",
                    self.worker_timeout.as_secs_f64()
                );
                Self::give_up(worker, slot, &reason, report);
                self.status
                    .set_debug_note(format!("worker {} timed out", worker));
            }
        }
    }

    fn give_up(worker: usize, slot: &mut WorkerSlot, reason: &str, report: &mut RunReport) {
        warn!(
            "Giving up on worker {} ({} symbols): {}",
            worker,
            slot.symbols.len(),
            reason
        );
        slot.resolved = true;
        report.failed_partitions.push(PartitionFailure {
            worker,
            symbols: slot.symbols.clone(),
            reason: reason.to_string(),
        });
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Some(bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;
    use crate::market_data::MarketData;
    use crate::models::*;
    use crate::notifier::ChannelNotifier;
    use anyhow::Result;
    use chrono::{DateTime, Utc};

    fn options() -> StrategyOptions {
        serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 5, "minDuration": 1 } },
            "sellIndicators": { "SMA": { "period": 5, "minDuration": 1 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 3
        }))
        .unwrap()
    }

    fn market(symbols: &[&str]) -> MarketData {
        let mut closes = vec![10.0; 10];
        closes.extend((0..10).map(|i| 11.0 + i as f64 * 0.1));
        closes.extend(vec![8.0; 5]);
        let candles = symbols
            .iter()
            .flat_map(|symbol| candles_from_closes(symbol, &closes))
            .collect();
        MarketData::from_candles(candles).unwrap()
    }

    fn settings(threads: usize, timeout: Duration) -> EngineSettings {
        EngineSettings {
            num_threads: threads,
            worker_timeout: timeout,
            ..Default::default()
        }
    }

    /// Blocks far longer than the watchdog allows on one symbol.
    struct StallingProvider {
        inner: MarketData,
        stall_on: String,
    }

    impl PriceProvider for StallingProvider {
        fn symbols(&self) -> Vec<String> {
            self.inner.symbols()
        }

        fn get_series(&self, symbol: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Candle>> {
            if symbol == self.stall_on {
                thread::sleep(Duration::from_secs(3));
            }
            self.inner.get_series(symbol, since)
        }

        fn latest_date(&self) -> Option<DateTime<Utc>> {
            self.inner.latest_date()
        }
    }

    #[test]
    fn partitions_are_contiguous_and_cover_every_symbol() {
        let symbols: Vec<String> = (0..10).map(|i| format!("S{}", i)).collect();
        let partitions = partition_symbols(&symbols, 3);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].len(), 4);
        assert_eq!(partitions.concat(), symbols);
        assert!(partition_symbols(&[], 4).is_empty());
    }

    #[test]
    fn run_merges_partitions_and_publishes_progress() {
        let data = market(&["AAA", "BBB", "CCC"]);
        let notifier = Arc::new(ChannelNotifier::new(64));
        let mut receiver = notifier.subscribe();
        let status = RunStatus::new();
        let orchestrator = Orchestrator::new(
            &settings(2, Duration::from_secs(30)),
            status.clone(),
            notifier.clone(),
        );
        let job = Arc::new(WorkerJob::Backtest {
            options: options(),
            previous: None,
        });

        let report = orchestrator.run("run", job, &data.symbols(), Arc::new(data.clone()));

        assert!(report.failures.is_empty());
        assert!(report.failed_partitions.is_empty());
        assert_eq!(report.payload.len(), 3);
        assert_eq!(status.snapshot().processed_symbols, 3);

        let mut last_fraction = 0.0;
        while let Ok(notification) = receiver.try_recv() {
            if let NotifyEvent::Progress { fraction } = notification.event {
                assert!(fraction >= last_fraction);
                last_fraction = fraction;
            }
        }
        assert_eq!(last_fraction, 1.0);
    }

    #[test]
    fn watchdog_reports_a_hung_partition() {
        let data = market(&["AAA", "BBB", "CCC", "DDD"]);
        let provider = Arc::new(StallingProvider {
            inner: data.clone(),
            stall_on: "CCC".to_string(),
        });
        let orchestrator = Orchestrator::new(
            &settings(2, Duration::from_millis(500)),
            RunStatus::new(),
            Arc::new(ChannelNotifier::default()),
        );
        let job = Arc::new(WorkerJob::Backtest {
            options: options(),
            previous: None,
        });

        let started = Instant::now();
        let report = orchestrator.run("run", job, &data.symbols(), provider);

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report.failed_partitions.len(), 1);
        assert_eq!(report.failed_partitions[0].symbols, vec!["CCC", "DDD"]);
        assert_eq!(report.payload.len(), 2);
    }
}
