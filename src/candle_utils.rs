use crate::models::Candle;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Groups owned candles by normalized ticker, each group ascending by date
/// with duplicate dates collapsed to the last row seen. Rows without a usable
/// ticker are dropped.
pub fn group_candles_by_ticker(candles: Vec<Candle>) -> BTreeMap<String, Vec<Candle>> {
    let mut grouped: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
    for mut candle in candles {
        let Some(ticker) = normalize_ticker_symbol(&candle.ticker) else {
            continue;
        };
        candle.ticker = ticker.clone();
        grouped.entry(ticker).or_default().push(candle);
    }

    for values in grouped.values_mut() {
        values.sort_by(|a, b| a.date.cmp(&b.date));
        let mut deduped: Vec<Candle> = Vec::with_capacity(values.len());
        for candle in values.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.date == candle.date => *last = candle,
                _ => deduped.push(candle),
            }
        }
        *values = deduped;
    }
    grouped.retain(|_, values| !values.is_empty());
    grouped
}

/// Candles on or after `since`; all of them when `since` is None. Expects
/// ascending dates.
pub fn candles_since(candles: &[Candle], since: Option<DateTime<Utc>>) -> &[Candle] {
    match since {
        Some(since) => {
            let start = candles.partition_point(|candle| candle.date < since);
            &candles[start..]
        }
        None => candles,
    }
}

/// Number of candles per ticker.
pub fn candle_counts(grouped: &BTreeMap<String, Vec<Candle>>) -> HashMap<String, usize> {
    grouped
        .iter()
        .map(|(ticker, candles)| (ticker.clone(), candles.len()))
        .collect()
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
