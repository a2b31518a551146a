use crate::error::EngineError;
use crate::models::*;
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

/// Link between a base backtest and the results derived from it by the grid
/// optimizer. On the base document `ids` lists every derived id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedLink {
    pub base: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDocument {
    pub id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BacktestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BacktestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized: Option<OptimizedLink>,
}

impl ResultDocument {
    pub fn queued(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: ResultStatus::Queued,
            results: None,
            summary: None,
            optimized: None,
        }
    }
}

/// Partial update of a stored document.
#[derive(Debug, Clone)]
pub enum ResultField {
    Status(ResultStatus),
    Results(BacktestResult),
    /// Merged into the stored results by symbol.
    SymbolData(BTreeMap<String, SymbolResult>),
    Summary(BacktestSummary),
    Optimized(OptimizedLink),
}

pub trait ResultStore: Send + Sync {
    fn get_result(&self, id: &str) -> Result<Option<ResultDocument>>;

    /// Inserts the document, replacing any document with the same id.
    fn add_result(&self, document: ResultDocument) -> Result<()>;

    fn set_field(&self, id: &str, field: ResultField) -> Result<()>;

    fn set_indicator_dataset(&self, id: &str, dataset: IndicatorDataset) -> Result<()>;

    fn get_indicator_dataset(&self, id: &str) -> Result<Option<IndicatorDataset>>;

    fn result_ids(&self) -> Vec<String>;
}

#[derive(Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    results: BTreeMap<String, ResultDocument>,
    #[serde(default)]
    indicators: BTreeMap<String, IndicatorDataset>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    results: Arc<DashMap<String, ResultDocument>>,
    indicators: Arc<DashMap<String, IndicatorDataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store saved with `save_to_file`; a missing file gives an empty store.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)
            .with_context(|| format!("Failed to open result store at {}", path.display()))?;
        let stored: StoreFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to decode result store at {}", path.display()))?;

        let store = Self::new();
        for (id, document) in stored.results {
            store.results.insert(id, document);
        }
        for (id, dataset) in stored.indicators {
            store.indicators.insert(id, dataset);
        }
        Ok(store)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let stored = StoreFile {
            results: self
                .results
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            indicators: self
                .indicators
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let file = File::create(path)
            .with_context(|| format!("Unable to create result store at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &stored)
            .context("Failed to serialize result store")?;
        writer.flush().context("Failed to flush result store")?;
        Ok(())
    }
}

impl ResultStore for MemoryStore {
    fn get_result(&self, id: &str) -> Result<Option<ResultDocument>> {
        Ok(self.results.get(id).map(|entry| entry.value().clone()))
    }

    fn add_result(&self, document: ResultDocument) -> Result<()> {
        self.results.insert(document.id.clone(), document);
        Ok(())
    }

    fn set_field(&self, id: &str, field: ResultField) -> Result<()> {
        let mut document = self
            .results
            .get_mut(id)
            .ok_or_else(|| EngineError::ResultNotFound(id.to_string()))?;
        match field {
            ResultField::Status(status) => document.status = status,
            ResultField::Results(results) => document.results = Some(results),
            ResultField::SymbolData(symbol_data) => {
                let results = document
                    .results
                    .as_mut()
                    .ok_or_else(|| EngineError::ResultNotFound(id.to_string()))?;
                results.symbol_data.extend(symbol_data);
            }
            ResultField::Summary(summary) => document.summary = Some(summary),
            ResultField::Optimized(link) => document.optimized = Some(link),
        }
        Ok(())
    }

    fn set_indicator_dataset(&self, id: &str, dataset: IndicatorDataset) -> Result<()> {
        self.indicators.insert(id.to_string(), dataset);
        Ok(())
    }

    fn get_indicator_dataset(&self, id: &str) -> Result<Option<IndicatorDataset>> {
        Ok(self.indicators.get(id).map(|entry| entry.value().clone()))
    }

    fn result_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.results.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Symbols with faulty price data; a missing file is an empty list.
pub fn load_blacklist<P: AsRef<Path>>(path: P) -> Result<BTreeSet<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read blacklist at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to decode blacklist at {}", path.display()))
}

/// Adds `faulty` symbols to the blacklist file and returns the full list.
pub fn extend_blacklist<P, I>(path: P, faulty: I) -> Result<BTreeSet<String>>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = String>,
{
    let path = path.as_ref();
    let mut blacklist = load_blacklist(path)?;
    let before = blacklist.len();
    blacklist.extend(faulty);
    if blacklist.len() != before || !path.exists() {
        ensure_parent_dir(path)?;
        fs::write(path, serde_json::to_string(&blacklist)?)
            .with_context(|| format!("Failed to write blacklist at {}", path.display()))?;
    }
    Ok(blacklist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn backtest_result() -> BacktestResult {
        let options: StrategyOptions = serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 5 } },
            "sellIndicators": { "SMA": { "period": 5 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 0
        }))
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        BacktestResult {
            strategy_options: options,
            symbol_data: BTreeMap::from([("AAA".to_string(), SymbolResult::default())]),
            last_updated: now,
            created: now,
            summary: None,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("signal-engine-store-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn partial_updates_merge_symbol_data() {
        let store = MemoryStore::new();
        store.add_result(ResultDocument::queued("run")).unwrap();
        store
            .set_field("run", ResultField::Results(backtest_result()))
            .unwrap();
        store
            .set_field(
                "run",
                ResultField::SymbolData(BTreeMap::from([(
                    "BBB".to_string(),
                    SymbolResult::default(),
                )])),
            )
            .unwrap();
        store
            .set_field("run", ResultField::Status(ResultStatus::Finished))
            .unwrap();

        let document = store.get_result("run").unwrap().unwrap();
        assert_eq!(document.status, ResultStatus::Finished);
        assert_eq!(document.results.unwrap().symbol_data.len(), 2);
    }

    #[test]
    fn updating_a_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .set_field("nope", ResultField::Status(ResultStatus::Running))
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn store_persists_results_and_datasets() {
        let store = MemoryStore::new();
        let mut document = ResultDocument::queued("run");
        document.results = Some(backtest_result());
        document.optimized = Some(OptimizedLink {
            base: "run".to_string(),
            ids: vec!["run_optimized_1.00_2.00".to_string()],
        });
        store.add_result(document.clone()).unwrap();
        store
            .set_indicator_dataset("run", IndicatorDataset::default())
            .unwrap();

        let path = temp_path("results.json");
        store.save_to_file(&path).unwrap();
        let loaded = MemoryStore::load_from_file(&path).unwrap();

        assert_eq!(loaded.get_result("run").unwrap(), Some(document));
        assert!(loaded.get_indicator_dataset("run").unwrap().is_some());
        assert_eq!(loaded.result_ids(), vec!["run".to_string()]);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn blacklist_accumulates_across_runs() {
        let path = temp_path("blacklist.json");
        assert!(load_blacklist(&path).unwrap().is_empty());

        extend_blacklist(&path, vec!["BBB".to_string()]).unwrap();
        let all = extend_blacklist(&path, vec!["AAA".to_string(), "BBB".to_string()]).unwrap();

        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec!["AAA", "BBB"]);
        assert_eq!(load_blacklist(&path).unwrap().len(), 2);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
