use crate::candle_utils::{candle_counts, candles_since, group_candles_by_ticker};
use crate::models::Candle;
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use chrono::Duration;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

/// Source of daily bars for the symbol universe.
pub trait PriceProvider: Send + Sync {
    fn symbols(&self) -> Vec<String>;

    /// Bars of `symbol` ascending by date; with `since`, only bars on or
    /// after that date.
    fn get_series(&self, symbol: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Candle>>;

    fn latest_date(&self) -> Option<DateTime<Utc>>;
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    tickers: Vec<String>,
    candles: Vec<Candle>,
}

enum SnapshotFormat {
    Bincode,
    Json,
}

impl SnapshotFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

/// In-memory market data snapshot, grouped per ticker.
#[derive(Clone)]
pub struct MarketData {
    candles_by_ticker: Arc<BTreeMap<String, Vec<Candle>>>,
    tickers: Arc<Vec<String>>,
    unique_dates: Arc<Vec<DateTime<Utc>>>,
}

impl MarketData {
    pub fn from_candles(candles: Vec<Candle>) -> Result<Self> {
        let candles_by_ticker = group_candles_by_ticker(candles);
        if candles_by_ticker.is_empty() {
            return Err(anyhow!("Market data has no usable tickers or candles"));
        }

        let unique_dates: Vec<DateTime<Utc>> = candles_by_ticker
            .values()
            .flatten()
            .map(|candle| candle.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tickers: Vec<String> = candles_by_ticker.keys().cloned().collect();

        Ok(Self {
            candles_by_ticker: Arc::new(candles_by_ticker),
            tickers: Arc::new(tickers),
            unique_dates: Arc::new(unique_dates),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!(
            "Loading market data snapshot from {}",
            path.display()
        ));
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot = match SnapshotFormat::of(path) {
            SnapshotFormat::Json => {
                serde_json::from_reader(reader).context("Snapshot decode failed")?
            }
            SnapshotFormat::Bincode => {
                bincode::deserialize_from(reader).context("Snapshot decode failed")?
            }
        };

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        status.set_phase("Reconstructing market data snapshot");
        let data = Self::from_candles(snapshot.candles)?;
        let counts = candle_counts(&data.candles_by_ticker);
        info!(
            "Loaded {} candles for {} tickers across {} unique dates (snapshot from {})",
            counts.values().sum::<usize>(),
            data.tickers.len(),
            data.unique_dates.len(),
            snapshot.generated_at.format("%Y-%m-%d %H:%M")
        );
        Ok(data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            tickers: self.tickers.as_ref().clone(),
            candles: self.candles_by_ticker.values().flatten().cloned().collect(),
        };
        match SnapshotFormat::of(path) {
            SnapshotFormat::Json => serde_json::to_writer(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
            SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
        }
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    /// Synthetic weekday bars for `tickers` symbols: a seeded random walk with
    /// slowly switching trend regimes.
    pub fn generate_sample(tickers: usize, days: usize, seed: u64) -> Result<Self> {
        if tickers == 0 || days == 0 {
            return Err(anyhow!("Sample needs at least one ticker and one day"));
        }
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut dates = Vec::with_capacity(days);
        let mut day = Utc
            .with_ymd_and_hms(2015, 1, 2, 0, 0, 0)
            .single()
            .ok_or_else(|| anyhow!("Invalid sample start date"))?;
        while dates.len() < days {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                dates.push(day);
            }
            day += Duration::days(1);
        }

        let mut candles = Vec::with_capacity(tickers * days);
        for index in 0..tickers {
            let ticker = sample_ticker(index);
            let mut close = 20.0 + rng.f64() * 180.0;
            let mut drift = 0.0;
            for date in &dates {
                if rng.f64() < 0.03 {
                    drift = (rng.f64() - 0.5) * 0.006;
                }
                let open = close;
                close = (close * (1.0 + drift + (rng.f64() - 0.5) * 0.04)).max(1.0);
                let high = open.max(close) * (1.0 + rng.f64() * 0.01);
                let low = open.min(close) * (1.0 - rng.f64() * 0.01);
                candles.push(Candle {
                    ticker: ticker.clone(),
                    date: *date,
                    open,
                    high,
                    low,
                    close,
                    unadjusted_close: Some(close),
                    volume_shares: rng.i64(50_000..5_000_000),
                });
            }
        }
        Self::from_candles(candles)
    }

    pub fn restrict_to_tickers(self, allowed_tickers: &HashSet<String>) -> Result<Self> {
        let filtered: Vec<Candle> = self
            .candles_by_ticker
            .iter()
            .filter(|(ticker, _)| allowed_tickers.contains(*ticker))
            .flat_map(|(_, candles)| candles.iter().cloned())
            .collect();
        if filtered.is_empty() {
            return Err(anyhow!(
                "Market data snapshot does not contain any tickers that match the requested scope"
            ));
        }
        Self::from_candles(filtered)
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn unique_dates(&self) -> &[DateTime<Utc>] {
        &self.unique_dates
    }

    pub fn candles(&self, ticker: &str) -> Option<&[Candle]> {
        self.candles_by_ticker.get(ticker).map(Vec::as_slice)
    }
}

impl PriceProvider for MarketData {
    fn symbols(&self) -> Vec<String> {
        self.tickers.as_ref().clone()
    }

    fn get_series(&self, symbol: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Candle>> {
        let candles = self
            .candles(symbol)
            .ok_or_else(|| anyhow!("No price data for {}", symbol))?;
        Ok(candles_since(candles, since).to_vec())
    }

    fn latest_date(&self) -> Option<DateTime<Utc>> {
        self.unique_dates.last().copied()
    }
}

/// Four-letter ticker for the `index`-th sample symbol (AAAA, AAAB, ...).
fn sample_ticker(index: usize) -> String {
    let mut remaining = index;
    let mut letters = ['A'; 4];
    for slot in letters.iter_mut().rev() {
        *slot = (b'A' + (remaining % 26) as u8) as char;
        remaining /= 26;
    }
    letters.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_deterministic_and_skips_weekends() {
        let first = MarketData::generate_sample(3, 30, 7).unwrap();
        let second = MarketData::generate_sample(3, 30, 7).unwrap();

        assert_eq!(first.tickers(), &["AAAA", "AAAB", "AAAC"]);
        assert_eq!(first.unique_dates().len(), 30);
        assert!(first
            .unique_dates()
            .iter()
            .all(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)));

        let a = first.get_series("AAAB", None).unwrap();
        let b = second.get_series("AAAB", None).unwrap();
        assert_eq!(a.len(), 30);
        assert!(a.iter().zip(&b).all(|(x, y)| x.close == y.close));
        assert!(a.iter().all(|c| c.low <= c.close && c.close <= c.high));
    }

    #[test]
    fn series_since_and_unknown_symbols() {
        let data = MarketData::generate_sample(1, 10, 1).unwrap();
        let since = data.unique_dates()[6];
        assert_eq!(data.get_series("AAAA", Some(since)).unwrap().len(), 4);
        assert_eq!(data.latest_date(), data.unique_dates().last().copied());
        assert!(data.get_series("NOPE", None).is_err());
    }

    #[test]
    fn snapshot_survives_bincode_and_json_files() {
        let data = MarketData::generate_sample(2, 15, 3).unwrap();
        let dir = std::env::temp_dir().join(format!("signal-engine-md-{}", uuid::Uuid::new_v4()));
        let status = RunStatus::new();

        for name in ["snapshot.bin", "snapshot.json"] {
            let path = dir.join(name);
            data.save_to_file(&path).unwrap();
            let loaded = MarketData::load_from_file(&path, &status).unwrap();
            assert_eq!(loaded.tickers(), data.tickers());
            assert_eq!(
                loaded.get_series("AAAB", None).unwrap().len(),
                data.get_series("AAAB", None).unwrap().len()
            );
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn restriction_keeps_only_allowed_tickers() {
        let data = MarketData::generate_sample(3, 5, 2).unwrap();
        let allowed = HashSet::from(["AAAC".to_string()]);
        let restricted = data.clone().restrict_to_tickers(&allowed).unwrap();
        assert_eq!(restricted.symbols(), vec!["AAAC".to_string()]);
        assert!(data.restrict_to_tickers(&HashSet::new()).is_err());
    }
}
