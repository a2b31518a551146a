use crate::backtester::Backtester;
use crate::config::EngineSettings;
use crate::market_data::MarketData;
use crate::notifier::LogNotifier;
use crate::run_status::RunStatus;
use crate::store::MemoryStore;
use anyhow::{Context, Result};
use log::info;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Settings, result store and status shared by every CLI command.
#[derive(Clone)]
pub struct AppContext {
    settings: EngineSettings,
    store: MemoryStore,
    status: RunStatus,
}

impl AppContext {
    pub fn initialize(settings: EngineSettings) -> Result<Self> {
        let status = RunStatus::new();
        status.set_phase("Loading result store");
        let store = MemoryStore::load_from_file(&settings.results_path).with_context(|| {
            format!(
                "Failed to load results from {}",
                settings.results_path.display()
            )
        })?;
        status.set_phase("Idle");
        Ok(Self {
            settings,
            store,
            status,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn status_handle(&self) -> RunStatus {
        self.status.clone()
    }

    /// Loads a snapshot, optionally narrowed to `tickers`.
    pub fn market_data_from_file<P: AsRef<Path>>(
        &self,
        data_file: P,
        tickers: Option<&HashSet<String>>,
    ) -> Result<MarketData> {
        let market_data = MarketData::load_from_file(data_file, &self.status)?;
        let Some(tickers) = tickers else {
            return Ok(market_data);
        };
        let before = market_data.tickers().len();
        let restricted = market_data.restrict_to_tickers(tickers)?;
        info!(
            "Restricted market data snapshot to {} tickers (from {})",
            restricted.tickers().len(),
            before
        );
        Ok(restricted)
    }

    pub fn backtester(&self, market_data: MarketData) -> Backtester {
        Backtester::new(
            Arc::new(market_data),
            Arc::new(self.store.clone()),
            Arc::new(LogNotifier),
            self.settings.clone(),
            self.status.clone(),
        )
    }

    /// Writes the result store back to `RESULTS_PATH`.
    pub fn persist(&self) -> Result<()> {
        self.store.save_to_file(&self.settings.results_path)?;
        info!("Saved results to {}", self.settings.results_path.display());
        Ok(())
    }
}

/// Reads a JSON document such as strategy or optimize options.
pub fn read_json_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
