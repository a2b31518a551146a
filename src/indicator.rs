use crate::indicators::Normalizer;
use crate::models::*;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Named per-date series of an indicator, aligned with the price series.
pub type IndicatorGraph = BTreeMap<String, Vec<Option<f64>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Scalar(f64),
    Fields(Vec<(String, f64)>),
    Missing,
}

impl IndicatorValue {
    pub fn from_option(value: Option<f64>) -> Self {
        value.map(IndicatorValue::Scalar).unwrap_or(IndicatorValue::Missing)
    }

    /// Flattens the value into `(column, value)` pairs; a scalar takes the
    /// indicator name as its column.
    pub fn columns(&self, name: &str) -> Vec<(String, f64)> {
        match self {
            IndicatorValue::Scalar(v) => vec![(name.to_string(), *v)],
            IndicatorValue::Fields(fields) => fields.clone(),
            IndicatorValue::Missing => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    Macd2,
    Gc,
    Adx,
    Atr,
    Stochastic,
    Candle,
    Solid,
    Breakout,
    Pullback,
    Divergence,
    Structure,
    Swing,
    Trend,
    High,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 18] = [
        IndicatorKind::Sma,
        IndicatorKind::Ema,
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::Macd2,
        IndicatorKind::Gc,
        IndicatorKind::Adx,
        IndicatorKind::Atr,
        IndicatorKind::Stochastic,
        IndicatorKind::Candle,
        IndicatorKind::Solid,
        IndicatorKind::Breakout,
        IndicatorKind::Pullback,
        IndicatorKind::Divergence,
        IndicatorKind::Structure,
        IndicatorKind::Swing,
        IndicatorKind::Trend,
        IndicatorKind::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "SMA",
            IndicatorKind::Ema => "EMA",
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Macd => "MACD",
            IndicatorKind::Macd2 => "MACD2",
            IndicatorKind::Gc => "GC",
            IndicatorKind::Adx => "ADX",
            IndicatorKind::Atr => "ATR",
            IndicatorKind::Stochastic => "Stochastic",
            IndicatorKind::Candle => "Candle",
            IndicatorKind::Solid => "Solid",
            IndicatorKind::Breakout => "Breakout",
            IndicatorKind::Pullback => "Pullback",
            IndicatorKind::Divergence => "Divergence",
            IndicatorKind::Structure => "Structure",
            IndicatorKind::Swing => "Swing",
            IndicatorKind::Trend => "Trend",
            IndicatorKind::High => "High",
        }
    }

    pub fn normalizer(&self) -> Normalizer {
        match self {
            IndicatorKind::Rsi | IndicatorKind::Adx | IndicatorKind::Stochastic => {
                Normalizer::Percent
            }
            IndicatorKind::Gc => Normalizer::ZScore,
            IndicatorKind::Sma
            | IndicatorKind::Ema
            | IndicatorKind::Macd2
            | IndicatorKind::High
            | IndicatorKind::Solid
            | IndicatorKind::Candle => Normalizer::ClampRange,
            _ => Normalizer::Identity,
        }
    }

    /// Normalizer for values already returned by `Indicator::value`, which
    /// percent oscillators report pre-scaled to 0..1.
    pub fn sample_normalizer(&self) -> Normalizer {
        match self.normalizer() {
            Normalizer::Percent => Normalizer::Identity,
            other => other,
        }
    }
}

impl FromStr for IndicatorKind {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        IndicatorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| anyhow!("Unknown indicator: {}", name))
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Indicator: Send {
    fn kind(&self) -> IndicatorKind;

    /// Trading decision for `date_index`. Calls must use strictly increasing
    /// indices between `reset()` calls.
    fn action(&mut self, date_index: usize, is_main: bool) -> Action;

    fn value(&self, date_index: usize) -> IndicatorValue;

    fn graph(&self) -> IndicatorGraph;

    fn normalize(&self, values: &[f64]) -> Vec<f64> {
        self.kind().normalizer().apply(values)
    }

    fn should_stop(&self, _date_index: usize) -> Action {
        Action::NoAction
    }

    /// Clears pattern memory so the indicator can be replayed from the start.
    fn reset(&mut self) {}
}

/// Tracks the last index an indicator acted on; memory-bearing indicators
/// use it to assert chronological calls.
#[derive(Debug, Clone, Default)]
pub struct CallOrder {
    last: Option<usize>,
}

impl CallOrder {
    pub fn advance(&mut self, date_index: usize) {
        debug_assert!(
            self.last.map(|last| date_index > last).unwrap_or(true),
            "indicator called out of order: {} after {:?}",
            date_index,
            self.last
        );
        self.last = Some(date_index);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[path = "indicators/sma.rs"]
pub mod sma;

pub use sma::SmaIndicator;

#[path = "indicators/ema.rs"]
pub mod ema;

pub use ema::EmaIndicator;

#[path = "indicators/rsi.rs"]
pub mod rsi;

pub use rsi::RsiIndicator;

#[path = "indicators/macd.rs"]
pub mod macd;

pub use macd::MacdIndicator;

#[path = "indicators/macd2.rs"]
pub mod macd2;

pub use macd2::Macd2Indicator;

#[path = "indicators/gc.rs"]
pub mod gc;

pub use gc::GcIndicator;

#[path = "indicators/adx.rs"]
pub mod adx;

pub use adx::AdxIndicator;

#[path = "indicators/atr.rs"]
pub mod atr;

pub use atr::AtrIndicator;

#[path = "indicators/stochastic.rs"]
pub mod stochastic;

pub use stochastic::StochasticIndicator;

#[path = "indicators/candle.rs"]
pub mod candle;

pub use candle::CandleIndicator;

#[path = "indicators/solid.rs"]
pub mod solid;

pub use solid::SolidIndicator;

#[path = "indicators/breakout.rs"]
pub mod breakout;

pub use breakout::BreakoutIndicator;

#[path = "indicators/pullback.rs"]
pub mod pullback;

pub use pullback::PullbackIndicator;

#[path = "indicators/divergence.rs"]
pub mod divergence;

pub use divergence::DivergenceIndicator;

#[path = "indicators/structure.rs"]
pub mod structure;

pub use structure::StructureIndicator;

#[path = "indicators/swing.rs"]
pub mod swing;

pub use swing::SwingIndicator;

#[path = "indicators/trend.rs"]
pub mod trend;

pub use trend::TrendIndicator;

#[path = "indicators/high.rs"]
pub mod high;

pub use high::HighIndicator;

pub fn create_indicator(
    name: &str,
    params: &IndicatorParams,
    series: Arc<PriceSeries>,
) -> Result<Box<dyn Indicator>> {
    let kind: IndicatorKind = name.parse()?;
    Ok(match kind {
        IndicatorKind::Sma => Box::new(SmaIndicator::new(params, series)),
        IndicatorKind::Ema => Box::new(EmaIndicator::new(params, series)),
        IndicatorKind::Rsi => Box::new(RsiIndicator::new(params, series)),
        IndicatorKind::Macd => Box::new(MacdIndicator::new(params, series)),
        IndicatorKind::Macd2 => Box::new(Macd2Indicator::new(params, series)),
        IndicatorKind::Gc => Box::new(GcIndicator::new(params, series)),
        IndicatorKind::Adx => Box::new(AdxIndicator::new(params, series)),
        IndicatorKind::Atr => Box::new(AtrIndicator::new(params, series)),
        IndicatorKind::Stochastic => Box::new(StochasticIndicator::new(params, series)),
        IndicatorKind::Candle => Box::new(CandleIndicator::new(params, series)),
        IndicatorKind::Solid => Box::new(SolidIndicator::new(params, series)),
        IndicatorKind::Breakout => Box::new(BreakoutIndicator::new(params, series)),
        IndicatorKind::Pullback => Box::new(PullbackIndicator::new(params, series)),
        IndicatorKind::Divergence => Box::new(DivergenceIndicator::new(params, series)),
        IndicatorKind::Structure => Box::new(StructureIndicator::new(params, series)),
        IndicatorKind::Swing => Box::new(SwingIndicator::new(params, series)),
        IndicatorKind::Trend => Box::new(TrendIndicator::new(params, series)),
        IndicatorKind::High => Box::new(HighIndicator::new(params, series)),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{Candle, PriceSeries};
    use chrono::{Duration, TimeZone, Utc};

    /// Daily series with high/low one unit around the close.
    pub fn series_from_closes(closes: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        PriceSeries {
            symbol: "TEST".to_string(),
            dates: (0..closes.len())
                .map(|i| start + Duration::days(i as i64))
                .collect(),
            opens: closes.to_vec(),
            highs: closes.iter().map(|c| c + 1.0).collect(),
            lows: closes.iter().map(|c| c - 1.0).collect(),
            closes: closes.to_vec(),
            volumes: vec![1_000.0; closes.len()],
        }
    }

    /// Daily candles with a one unit range around the close.
    pub fn candles_from_closes(symbol: &str, closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                ticker: symbol.to_string(),
                date: start + Duration::days(i as i64),
                open: *close,
                high: close + 0.5,
                low: close - 0.5,
                close: *close,
                unadjusted_close: None,
                volume_shares: 10_000,
            })
            .collect()
    }
}
