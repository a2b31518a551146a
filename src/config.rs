use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const SETTING_KEYS: [&str; 6] = [
    "NUM_THREADS",
    "WORKER_TIMEOUT_SECS",
    "OPTIMIZE_MAX_RESULTS",
    "BLACKLIST_PATH",
    "RESULTS_PATH",
    "SHOW_PROGRESS",
];

const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 600;
const DEFAULT_OPTIMIZE_MAX_RESULTS: usize = 15;
const DEFAULT_BLACKLIST_PATH: &str = "data/blacklist.json";
const DEFAULT_RESULTS_PATH: &str = "data/results.json";

/// Risk engine constants shared by the signal engine and the grid replay.
pub const RISK_ATR_PERIOD: usize = 12;
pub const SWING_RANGE: usize = 7;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub num_threads: usize,
    pub worker_timeout: Duration,
    pub optimize_max_results: usize,
    pub blacklist_path: PathBuf,
    pub results_path: PathBuf,
    pub show_progress: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            num_threads: std::cmp::max(1, num_cpus::get()),
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            optimize_max_results: DEFAULT_OPTIMIZE_MAX_RESULTS,
            blacklist_path: PathBuf::from(DEFAULT_BLACKLIST_PATH),
            results_path: PathBuf::from(DEFAULT_RESULTS_PATH),
            show_progress: false,
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let num_threads = require_setting_usize(settings, "NUM_THREADS", 1)?;
        let worker_timeout_secs = require_setting_u64(settings, "WORKER_TIMEOUT_SECS", 1)?;
        let optimize_max_results = require_setting_usize(settings, "OPTIMIZE_MAX_RESULTS", 2)?;
        let blacklist_path = PathBuf::from(require_setting(settings, "BLACKLIST_PATH")?);
        let results_path = PathBuf::from(require_setting(settings, "RESULTS_PATH")?);
        let show_progress = require_setting_bool(settings, "SHOW_PROGRESS")?;

        Ok(Self {
            num_threads,
            worker_timeout: Duration::from_secs(worker_timeout_secs),
            optimize_max_results,
            blacklist_path,
            results_path,
            show_progress,
        })
    }

    /// Defaults overlaid with any matching process environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default().to_settings_map();
        for key in SETTING_KEYS {
            if let Ok(value) = std::env::var(key) {
                if !value.trim().is_empty() {
                    settings.insert(key.to_string(), value);
                }
            }
        }
        Self::from_settings_map(&settings)
    }

    pub fn to_settings_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("NUM_THREADS".to_string(), self.num_threads.to_string()),
            (
                "WORKER_TIMEOUT_SECS".to_string(),
                self.worker_timeout.as_secs().to_string(),
            ),
            (
                "OPTIMIZE_MAX_RESULTS".to_string(),
                self.optimize_max_results.to_string(),
            ),
            (
                "BLACKLIST_PATH".to_string(),
                self.blacklist_path.display().to_string(),
            ),
            (
                "RESULTS_PATH".to_string(),
                self.results_path.display().to_string(),
            ),
            ("SHOW_PROGRESS".to_string(), self.show_progress.to_string()),
        ])
    }
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn require_setting_u64(settings: &HashMap<String, String>, key: &str, min: u64) -> Result<u64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Setting {} must be a boolean (value: {})", key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_settings_map() {
        let defaults = EngineSettings::default();
        let parsed = EngineSettings::from_settings_map(&defaults.to_settings_map()).unwrap();

        assert_eq!(parsed.num_threads, defaults.num_threads);
        assert_eq!(parsed.worker_timeout, defaults.worker_timeout);
        assert_eq!(parsed.optimize_max_results, 15);
        assert!(!parsed.show_progress);
    }

    #[test]
    fn rejects_zero_threads_and_bad_booleans() {
        let mut settings = EngineSettings::default().to_settings_map();
        settings.insert("NUM_THREADS".to_string(), "0".to_string());
        let err = EngineSettings::from_settings_map(&settings).unwrap_err();
        assert!(err.to_string().contains("NUM_THREADS"));

        let mut settings = EngineSettings::default().to_settings_map();
        settings.insert("SHOW_PROGRESS".to_string(), "maybe".to_string());
        assert!(EngineSettings::from_settings_map(&settings).is_err());
    }

    #[test]
    fn missing_setting_is_reported_by_name() {
        let mut settings = EngineSettings::default().to_settings_map();
        settings.remove("RESULTS_PATH");
        let err = EngineSettings::from_settings_map(&settings).unwrap_err();
        assert_eq!(err.to_string(), "Missing required setting RESULTS_PATH");
    }
}
