use crate::indicator::{CallOrder, Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_atr, calculate_sma, crossed, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

/// Minimum number of days between two counted tests of the average.
const TEST_MARGIN: i64 = 12;
/// How far back a cross down looks for the cross up that started the test.
const TEST_WINDOW: usize = 12;

/// Breakout above SMA + ATR after the price tested the average enough times.
pub struct BreakoutIndicator {
    series: Arc<PriceSeries>,
    tests: usize,
    sma: Vec<Option<f64>>,
    atr: Vec<Option<f64>>,
    test_count: usize,
    last_test: i64,
    order: CallOrder,
}

impl BreakoutIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 20);
        let tests = get_param_usize(params, "tests", 2);
        let sma = calculate_sma(&series.closes, period);
        let atr = calculate_atr(&series.highs, &series.lows, &series.closes, period);
        Self {
            series,
            tests,
            sma,
            atr,
            test_count: 0,
            last_test: 0,
            order: CallOrder::default(),
        }
    }

    fn band(&self, i: usize, atr_offset: f64) -> Option<f64> {
        let sma = value_at(&self.sma, i)?;
        if atr_offset == 0.0 {
            return Some(sma);
        }
        Some(sma + value_at(&self.atr, i)? * atr_offset)
    }

    fn crossed_band(&self, i: usize, atr_offset: f64, up: bool) -> bool {
        if i == 0 {
            return false;
        }
        let prices = &self.series.closes;
        crossed(
            Some(prices[i - 1]),
            Some(prices[i]),
            self.band(i - 1, atr_offset),
            self.band(i, atr_offset),
            up,
        )
    }
}

impl Indicator for BreakoutIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Breakout
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        self.order.advance(date_index);
        if date_index >= self.series.len() {
            return Action::NoAction;
        }

        // a dip back under the average counts the cross up before it as a test
        self.last_test -= 1;
        if self.last_test < 0 && self.crossed_band(date_index, 0.0, false) {
            let first = date_index.saturating_sub(TEST_WINDOW);
            for i in first..date_index {
                if self.crossed_band(i + 1, 0.0, true) {
                    self.test_count += 1;
                    self.last_test = TEST_MARGIN;
                }
            }
        }

        if self.crossed_band(date_index, 1.0, true) {
            if self.test_count >= self.tests {
                return Action::Buy;
            }
            self.test_count = 0;
        }

        let above_band = self
            .band(date_index, 1.0)
            .map(|band| self.series.closes[date_index] > band)
            .unwrap_or(false);
        if above_band {
            self.test_count = 0;
        }
        Action::NoAction
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.sma, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([
            ("sma".to_string(), self.sma.clone()),
            ("atr".to_string(), self.atr.clone()),
        ])
    }

    fn reset(&mut self) {
        self.test_count = 0;
        self.last_test = 0;
        self.order.reset();
    }
}
