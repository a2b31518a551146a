use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub unadjusted_close: Option<f64>,
    pub volume_shares: i64,
}

/// Named numeric parameters of a single indicator.
pub type IndicatorParams = HashMap<String, f64>;

/// Indicator name to its parameters.
pub type IndicatorOptions = BTreeMap<String, IndicatorParams>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    NoAction,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::NoAction => "NO ACTION",
            Action::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventReason {
    Indicator,
    Stoploss,
    Target,
    Overdue,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::Indicator => "indicator",
            EventReason::Stoploss => "stoploss",
            EventReason::Target => "target",
            EventReason::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopIndicatorOptions {
    pub period: usize,
    pub min_duration: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOptions {
    pub buy_indicators: IndicatorOptions,
    pub sell_indicators: IndicatorOptions,
    pub main_buy_indicator: String,
    pub main_sell_indicator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_atr: Option<f64>,
    #[serde(default, alias = "stoplossSwing")]
    pub stop_loss_swing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_atr: Option<f64>,
    #[serde(default)]
    pub target_swing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_reward_ratio: Option<f64>,
    #[serde(default)]
    pub trailing_stop_loss: bool,
    #[serde(default)]
    pub min_volume: f64,
    pub expiration: usize,
    #[serde(default)]
    pub multiple_buys: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_days: Option<i64>,
    #[serde(default)]
    pub limit_order: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_indicator: Option<StopIndicatorOptions>,
}

impl StrategyOptions {
    /// Number of bars loaded before the resume point of an incremental update so
    /// that rolling indicators are warmed up again.
    pub fn warmup_margin(&self) -> usize {
        let widest = self
            .buy_indicators
            .values()
            .chain(self.sell_indicators.values())
            .map(|params| params.values().copied().filter(|v| v.is_finite()).sum::<f64>())
            .fold(0.0f64, f64::max);
        (widest.ceil() as usize).saturating_add(100)
    }
}

/// Daily OHLCV columns for one symbol, ascending by date. `closes` is the
/// adjusted close and serves as the price everywhere.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub symbol: String,
    pub dates: Vec<DateTime<Utc>>,
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl PriceSeries {
    pub fn from_candles(symbol: &str, candles: &[Candle]) -> Self {
        let mut ordered: Vec<&Candle> = candles.iter().collect();
        ordered.sort_by(|a, b| a.date.cmp(&b.date));
        ordered.dedup_by(|a, b| a.date == b.date);

        let mut series = PriceSeries {
            symbol: symbol.to_string(),
            ..Default::default()
        };
        for candle in ordered {
            series.dates.push(candle.date);
            series.opens.push(candle.open);
            series.highs.push(candle.high);
            series.lows.push(candle.low);
            series.closes.push(candle.close);
            series.volumes.push(candle.volume_shares as f64);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn price(&self, index: usize) -> f64 {
        self.closes[index]
    }

    /// A zero or non-finite close marks a gap in the data.
    pub fn has_price(&self, index: usize) -> bool {
        self.closes
            .get(index)
            .map(|p| p.is_finite() && *p != 0.0)
            .unwrap_or(false)
    }

    pub fn index_of(&self, date: DateTime<Utc>) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Copy of the series starting at `start`.
    pub fn slice_from(&self, start: usize) -> Self {
        let start = start.min(self.len());
        PriceSeries {
            symbol: self.symbol.clone(),
            dates: self.dates[start..].to_vec(),
            opens: self.opens[start..].to_vec(),
            highs: self.highs[start..].to_vec(),
            lows: self.lows[start..].to_vec(),
            closes: self.closes[start..].to_vec(),
            volumes: self.volumes[start..].to_vec(),
        }
    }
}

/// Exit levels of one open position, keyed by its buy date in the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoplossTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_stoploss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stoploss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid_point_reached: Option<bool>,
}

impl StoplossTarget {
    pub fn is_empty(&self) -> bool {
        self.stoploss.is_none() && self.target.is_none()
    }

    pub fn midpoint_reached(&self) -> bool {
        self.mid_point_reached.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub buy_date: DateTime<Utc>,
    pub sell_date: DateTime<Utc>,
    pub span: i64,
    pub profit: f64,
    pub percent_profit: f64,
    pub reason: EventReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub buy_date: DateTime<Utc>,
    #[serde(default)]
    pub stoploss_target: StoplossTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolResult {
    pub events: Vec<Event>,
    pub holdings: Vec<Holding>,
    pub profit: f64,
    pub percent_profit: f64,
    pub faulty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub symbols: usize,
    pub events: usize,
    pub holdings: usize,
    pub faulty_symbols: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub average_percent_profit: f64,
    pub percent_profit_std_dev: f64,
    pub sharpe: f64,
    pub average_span: f64,
    pub reasons: BTreeMap<EventReason, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub strategy_options: StrategyOptions,
    pub symbol_data: BTreeMap<String, SymbolResult>,
    pub last_updated: DateTime<Utc>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BacktestSummary>,
}

/// Stoploss multiplier and risk/reward ratio ranges of a grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeOptions {
    pub start_stoploss: f64,
    pub end_stoploss: f64,
    pub stride_stoploss: f64,
    pub start_ratio: f64,
    pub end_ratio: f64,
    pub stride_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRow {
    pub indicators: Vec<Option<f64>>,
    pub percent_profit: f64,
    pub buy_date: DateTime<Utc>,
}

/// Feature rows of one symbol, in the column order given by `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub data: Vec<FeatureRow>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDataset {
    pub symbols: BTreeMap<String, FeatureSet>,
    #[serde(default)]
    pub normalized: BTreeMap<String, Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(day: u32, close: f64) -> Candle {
        Candle {
            ticker: "AAA".to_string(),
            date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            unadjusted_close: None,
            volume_shares: 1_000,
        }
    }

    #[test]
    fn series_from_candles_sorts_and_dedups_dates() {
        let candles = vec![candle(3, 12.0), candle(1, 10.0), candle(2, 11.0), candle(2, 11.0)];
        let series = PriceSeries::from_candles("AAA", &candles);

        assert_eq!(series.len(), 3);
        assert_eq!(series.closes, vec![10.0, 11.0, 12.0]);
        assert_eq!(series.index_of(candles[0].date), Some(2));
    }

    #[test]
    fn zero_and_nan_closes_are_missing_prices() {
        let candles = vec![candle(1, 10.0), candle(2, 0.0), candle(3, f64::NAN)];
        let series = PriceSeries::from_candles("AAA", &candles);

        assert!(series.has_price(0));
        assert!(!series.has_price(1));
        assert!(!series.has_price(2));
        assert!(!series.has_price(3));
    }

    #[test]
    fn warmup_margin_uses_widest_parameter_sum() {
        let options: StrategyOptions = serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 50, "minDuration": 3 } },
            "sellIndicators": { "RSI": { "period": 14, "underbought": 30, "overbought": 70 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "RSI",
            "expiration": 7
        }))
        .unwrap();

        assert_eq!(options.warmup_margin(), 214);
        assert!(!options.multiple_buys);
        assert_eq!(options.min_volume, 0.0);
    }

    #[test]
    fn warmup_margin_saturates_on_absurd_periods() {
        let options: StrategyOptions = serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 1e300 } },
            "sellIndicators": { "SMA": { "period": 5 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 7
        }))
        .unwrap();

        assert_eq!(options.warmup_margin(), usize::MAX);
    }
}
