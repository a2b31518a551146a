use crate::indicator::{CallOrder, Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_atr, calculate_sma, crossed, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const PULLBACK_ATR_PERIOD: usize = 12;
/// Days before the dip that must have closed at or above the average.
const PREVIOUS_LENGTH: usize = 26;
/// Buys closer together than this many days extend the current chain.
const BUY_CHAIN_DAYS: i64 = 31;

/// Re-entry after a short dip below SMA + ATR in an established uptrend.
pub struct PullbackIndicator {
    series: Arc<PriceSeries>,
    length: usize,
    sma: Vec<Option<f64>>,
    atr: Vec<Option<f64>>,
    last_buy: Option<DateTime<Utc>>,
    buy_chain: usize,
    order: CallOrder,
}

impl PullbackIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 20);
        let length = get_param_usize(params, "length", 5);
        let sma = calculate_sma(&series.closes, period);
        let atr = calculate_atr(
            &series.highs,
            &series.lows,
            &series.closes,
            PULLBACK_ATR_PERIOD,
        );
        Self {
            series,
            length,
            sma,
            atr,
            last_buy: None,
            buy_chain: 0,
            order: CallOrder::default(),
        }
    }

    /// Number of consecutive pullback signals within a month of each other.
    pub fn buy_chain(&self) -> usize {
        self.buy_chain
    }

    fn band(&self, i: usize, atr_multiple: f64) -> Option<f64> {
        Some(value_at(&self.sma, i)? + value_at(&self.atr, i)? * atr_multiple)
    }

    fn crossed_band(&self, i: usize, up: bool) -> bool {
        if i == 0 {
            return false;
        }
        let prices = &self.series.closes;
        crossed(
            Some(prices[i - 1]),
            Some(prices[i]),
            self.band(i - 1, 1.0),
            self.band(i, 1.0),
            up,
        )
    }

    /// Days without a known average do not break the uptrend.
    fn held_above_average(&self, dip_index: usize) -> bool {
        let prices = &self.series.closes;
        (dip_index.saturating_sub(PREVIOUS_LENGTH)..dip_index).all(|j| {
            value_at(&self.sma, j)
                .map(|sma| prices[j] >= sma)
                .unwrap_or(true)
        })
    }

    fn record_buy(&mut self, date: DateTime<Utc>) {
        let chained = self
            .last_buy
            .map(|last| (date - last).num_days() < BUY_CHAIN_DAYS)
            .unwrap_or(false);
        self.buy_chain = if chained { self.buy_chain + 1 } else { 0 };
        self.last_buy = Some(date);
    }
}

impl Indicator for PullbackIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Pullback
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        self.order.advance(date_index);
        if date_index >= self.series.len() || !self.crossed_band(date_index, true) {
            return Action::NoAction;
        }

        let first = date_index.saturating_sub(self.length);
        let dip = (first..date_index)
            .find(|&i| self.crossed_band(i + 1, false) && self.held_above_average(i));
        if dip.is_none() {
            return Action::NoAction;
        }

        self.record_buy(self.series.dates[date_index]);
        let too_high = self
            .band(date_index, 2.0)
            .map(|ceiling| self.series.closes[date_index] >= ceiling)
            .unwrap_or(false);
        if too_high {
            Action::NoAction
        } else {
            Action::Buy
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.sma, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([("pullback".to_string(), self.sma.clone())])
    }

    fn reset(&mut self) {
        self.last_buy = None;
        self.buy_chain = 0;
        self.order.reset();
    }
}
