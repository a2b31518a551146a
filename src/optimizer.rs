use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::config::RISK_ATR_PERIOD;
use crate::error::{EngineError, SymbolError};
use crate::indicator::{create_indicator, Indicator, IndicatorKind};
use crate::indicators::{calculate_atr, rolling_max, Normalizer};
use crate::models::*;
use crate::risk::{calculate_profit, get_early_trades, set_stoploss_target, Positions};
use crate::signals::{mean_percent, IndicatorSet};

/// Column holding the buy-day close in every feature row.
pub const PRICE_FIELD: &str = "Price";

/// Number of grid points on `start..end` spaced by `stride`.
pub fn axis_cells(start: f64, end: f64, stride: f64) -> usize {
    if stride.is_nan() || stride <= 0.0 || end <= start {
        return 0;
    }
    ((end - start) / stride - 1e-9).ceil().max(0.0) as usize
}

pub fn axis_values(start: f64, end: f64, stride: f64) -> Vec<f64> {
    (0..axis_cells(start, end, stride))
        .map(|k| start + stride * k as f64)
        .collect()
}

pub fn validate_optimize_options(grid: &OptimizeOptions) -> Result<(), EngineError> {
    let axes = [
        ("stoploss", grid.start_stoploss, grid.end_stoploss, grid.stride_stoploss),
        ("ratio", grid.start_ratio, grid.end_ratio, grid.stride_ratio),
    ];
    for (name, start, end, stride) in axes {
        if !(start.is_finite() && end.is_finite() && stride.is_finite()) {
            return Err(EngineError::InvalidOptimizeOptions(format!(
                "{} range must be finite",
                name
            )));
        }
        if stride <= 0.0 {
            return Err(EngineError::InvalidOptimizeOptions(format!(
                "{} stride must be positive (value: {})",
                name, stride
            )));
        }
        if end <= start {
            return Err(EngineError::InvalidOptimizeOptions(format!(
                "{} range is empty ({} to {})",
                name, start, end
            )));
        }
    }
    Ok(())
}

/// Shrinks the ratio axis when it spans more than `max_results` strides.
pub fn cap_ratio_axis(grid: &mut OptimizeOptions, max_results: usize) {
    let total_ratios = (grid.end_ratio - grid.start_ratio) / grid.stride_ratio;
    if total_ratios > max_results as f64 {
        grid.end_ratio =
            grid.start_ratio + grid.stride_ratio * (max_results.saturating_sub(1)) as f64;
    }
}

/// One single-row grid per stoploss value; each row is queued as its own job.
pub fn stoploss_rows(grid: &OptimizeOptions) -> Vec<OptimizeOptions> {
    axis_values(grid.start_stoploss, grid.end_stoploss, grid.stride_stoploss)
        .into_iter()
        .map(|stoploss| OptimizeOptions {
            start_stoploss: stoploss,
            end_stoploss: stoploss + grid.stride_stoploss,
            ..grid.clone()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub stoploss: f64,
    pub ratio: f64,
}

impl GridCell {
    pub fn derived_id(&self, base_id: &str) -> String {
        format!("{}_optimized_{:.2}_{:.2}", base_id, self.stoploss, self.ratio)
    }

    /// Strategy options with this cell's stoploss multiplier and risk/reward ratio.
    pub fn apply(&self, options: &StrategyOptions) -> StrategyOptions {
        StrategyOptions {
            stop_loss_atr: Some(self.stoploss),
            risk_reward_ratio: Some(self.ratio),
            ..options.clone()
        }
    }
}

/// Cells in row-major order: stoploss outer, ratio inner.
pub fn grid_cells(grid: &OptimizeOptions) -> Vec<GridCell> {
    let ratios = axis_values(grid.start_ratio, grid.end_ratio, grid.stride_ratio);
    axis_values(grid.start_stoploss, grid.end_stoploss, grid.stride_stoploss)
        .into_iter()
        .flat_map(|stoploss| {
            ratios
                .iter()
                .map(move |&ratio| GridCell { stoploss, ratio })
        })
        .collect()
}

/// Per-cell results of one symbol, aligned with `grid_cells`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridReplay {
    pub results: Vec<SymbolResult>,
    /// Replayed exits whose reason differs from the base event.
    pub effective: usize,
    /// Event and cell pairs considered.
    pub count: usize,
}

struct CellState {
    options: StrategyOptions,
    events: Vec<Event>,
    profit: f64,
    percent_profit_sum: f64,
}

impl CellState {
    fn record(&mut self, event: Event) {
        self.profit += event.profit;
        self.percent_profit_sum += event.percent_profit;
        self.events.push(event);
    }
}

/// Replays only the exits of `base` under every stoploss/target cell of
/// `grid`. Entry dates stay those of the base run.
pub fn replay_stoploss_target(
    options: &StrategyOptions,
    grid: &OptimizeOptions,
    symbol: &str,
    candles: &[Candle],
    base: &SymbolResult,
) -> Result<GridReplay, SymbolError> {
    let series = Arc::new(PriceSeries::from_candles(symbol, candles));
    if series.is_empty() {
        return Err(SymbolError::MissingPriceData {
            symbol: symbol.to_string(),
        });
    }

    let mut main_sell = IndicatorSet::build(
        symbol,
        &options.sell_indicators,
        &options.main_sell_indicator,
        &series,
    )?
    .main;
    let atr = calculate_atr(&series.highs, &series.lows, &series.closes, RISK_ATR_PERIOD);
    let high_filter = options
        .high_period
        .map(|period| rolling_max(&series.closes, period.max(1)));
    let above_recent_high = |entry: &StoplossTarget, index: usize| match (&high_filter, entry.target) {
        (Some(high), Some(target)) => target > high[index],
        _ => false,
    };

    let mut cells: Vec<CellState> = grid_cells(grid)
        .iter()
        .map(|cell| CellState {
            options: cell.apply(options),
            events: Vec::new(),
            profit: 0.0,
            percent_profit_sum: 0.0,
        })
        .collect();
    let mut effective = 0;
    let mut count = 0;

    for event in &base.events {
        count += cells.len();
        let Some(buy_index) = series.index_of(event.buy_date) else {
            debug!("{}: buy date {} not in series, skipping", symbol, event.buy_date);
            continue;
        };
        if event.reason == EventReason::Indicator {
            for cell in cells.iter_mut() {
                cell.record(event.clone());
            }
            continue;
        }

        let buy_price = series.closes[buy_index];
        let mut open: Vec<Option<Positions>> = cells
            .iter()
            .map(|cell| {
                let entry =
                    set_stoploss_target(&cell.options, buy_price, buy_index, &atr, &series);
                if above_recent_high(&entry, buy_index) {
                    None
                } else {
                    Some(Positions::from([(event.buy_date, entry)]))
                }
            })
            .collect();

        main_sell.reset();
        for day_index in buy_index..series.len() {
            if open.iter().all(Option::is_none) {
                break;
            }
            let day = series.dates[day_index];
            let price = series.closes[day_index];

            if main_sell.action(day_index, true) == Action::Sell {
                for (cell, slot) in cells.iter_mut().zip(open.iter_mut()) {
                    if let Some(mut positions) = slot.take() {
                        if let Some(entry) = positions.remove(&event.buy_date) {
                            let replayed =
                                replayed_event(event, buy_price, day, price, EventReason::Indicator, &entry);
                            if replayed.reason != event.reason {
                                effective += 1;
                            }
                            cell.record(replayed);
                        }
                    }
                }
                break;
            }

            for (cell, slot) in cells.iter_mut().zip(open.iter_mut()) {
                let Some(positions) = slot.as_mut() else {
                    continue;
                };
                let early_trades =
                    get_early_trades(&cell.options, positions, &series, day_index);
                let Some(trade) = early_trades.get(&event.buy_date) else {
                    continue;
                };
                let sell_price = if cell.options.limit_order {
                    trade.price
                } else {
                    price
                };
                if let Some(entry) = positions.remove(&event.buy_date) {
                    let replayed =
                        replayed_event(event, buy_price, day, sell_price, trade.reason, &entry);
                    if replayed.reason != event.reason {
                        effective += 1;
                    }
                    cell.record(replayed);
                }
                *slot = None;
            }
        }
    }

    let results = cells
        .into_iter()
        .map(|cell| {
            let holdings = base
                .holdings
                .iter()
                .filter_map(|holding| match series.index_of(holding.buy_date) {
                    Some(index) => {
                        let entry = set_stoploss_target(
                            &cell.options,
                            series.closes[index],
                            index,
                            &atr,
                            &series,
                        );
                        (!above_recent_high(&entry, index)).then(|| Holding {
                            buy_date: holding.buy_date,
                            stoploss_target: entry,
                        })
                    }
                    None => Some(holding.clone()),
                })
                .collect();
            SymbolResult {
                percent_profit: mean_percent(cell.percent_profit_sum, cell.events.len()),
                events: cell.events,
                holdings,
                profit: cell.profit,
                faulty: false,
            }
        })
        .collect();

    Ok(GridReplay {
        results,
        effective,
        count,
    })
}

fn replayed_event(
    base: &Event,
    buy_price: f64,
    sell_date: chrono::DateTime<chrono::Utc>,
    sell_price: f64,
    reason: EventReason,
    entry: &StoplossTarget,
) -> Event {
    let (profit, percent_profit) = calculate_profit(reason, buy_price, sell_price, entry);
    Event {
        buy_date: base.buy_date,
        sell_date,
        span: (sell_date - base.buy_date).num_days(),
        profit,
        percent_profit,
        reason,
        risk: entry.risk,
    }
}

/// Samples every configured indicator at the buy date of each base event.
pub fn sample_indicators(
    indicator_options: &IndicatorOptions,
    symbol: &str,
    candles: &[Candle],
    base: &SymbolResult,
) -> Result<FeatureSet, SymbolError> {
    let series = Arc::new(PriceSeries::from_candles(symbol, candles));
    if series.is_empty() {
        return Err(SymbolError::MissingPriceData {
            symbol: symbol.to_string(),
        });
    }

    let mut indicators: Vec<(String, Box<dyn Indicator>)> = Vec::new();
    for (name, params) in indicator_options {
        let indicator = create_indicator(name, params, series.clone()).map_err(|err| {
            SymbolError::IndicatorCompute {
                symbol: symbol.to_string(),
                indicator: name.clone(),
                reason: err.to_string(),
            }
        })?;
        indicators.push((name.clone(), indicator));
    }

    let mut fields: Option<Vec<String>> = None;
    let mut data = Vec::new();
    for event in &base.events {
        let Some(index) = series.index_of(event.buy_date) else {
            continue;
        };
        let mut values: BTreeMap<String, f64> = indicators
            .iter()
            .flat_map(|(name, indicator)| indicator.value(index).columns(name))
            .collect();
        values.insert(PRICE_FIELD.to_string(), series.closes[index]);

        // the first sampled event fixes the columns for the symbol
        let fields = fields.get_or_insert_with(|| values.keys().cloned().collect());
        data.push(FeatureRow {
            indicators: fields.iter().map(|field| values.get(field).copied()).collect(),
            percent_profit: event.percent_profit,
            buy_date: event.buy_date,
        });
    }

    Ok(FeatureSet {
        data,
        fields: fields.unwrap_or_default(),
    })
}

/// Kind whose values fill `field`: either the indicator name itself or the
/// prefix of a structured field such as `MACD_Value`.
pub fn field_kind(field: &str) -> Option<IndicatorKind> {
    field
        .parse()
        .ok()
        .or_else(|| field.split('_').next().and_then(|prefix| prefix.parse().ok()))
}

/// Fills `dataset.normalized` with one column per field, each normalized with
/// its source indicator's normalizer over the values present in every symbol.
pub fn normalize_dataset(dataset: &mut IndicatorDataset) {
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for features in dataset.symbols.values() {
        for row in &features.data {
            for (field, value) in features.fields.iter().zip(&row.indicators) {
                if let Some(value) = value.filter(|v| v.is_finite()) {
                    columns.entry(field.clone()).or_default().push(value);
                }
            }
        }
    }

    dataset.normalized = columns
        .into_iter()
        .map(|(field, values)| {
            let normalizer = field_kind(&field)
                .map(|kind| kind.sample_normalizer())
                .unwrap_or(Normalizer::Identity);
            (field, normalizer.apply(&values))
        })
        .collect();
}
