use crate::indicator::{CallOrder, Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

const HAMMER_LEG_RATIO: f64 = 2.0;
const HAMMER_HEAD_RATIO: f64 = 1.0;
const MARUBOZU_LEG_RATIO: f64 = 0.1;
const MARUBOZU_HEAD_RATIO: f64 = 0.1;

/// Body and wick measurements of one candle. Ratios are relative to the body
/// and follow IEEE division for doji candles.
#[derive(Debug, Clone, Copy)]
struct CandleShape {
    is_green: bool,
    body: f64,
    leg: f64,
    head: f64,
    leg_ratio: f64,
    head_ratio: f64,
}

impl CandleShape {
    fn measure(series: &PriceSeries, i: usize) -> Self {
        let (open, high, low, close) = (
            series.opens[i],
            series.highs[i],
            series.lows[i],
            series.closes[i],
        );
        let is_green = close > open;
        let body = (close - open).abs();
        let leg = if is_green { open - low } else { close - low };
        let head = if is_green { high - close } else { high - open };
        Self {
            is_green,
            body,
            leg,
            head,
            leg_ratio: leg / body,
            head_ratio: head / body,
        }
    }
}

/// Bullish candlestick patterns with a freshness window: once a pattern is
/// seen, BUY is repeated for `expiration` more days.
pub struct CandleIndicator {
    series: Arc<PriceSeries>,
    expiration: i64,
    shapes: Vec<CandleShape>,
    freshness: i64,
    order: CallOrder,
}

impl CandleIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let expiration = get_param_usize(params, "expiration", 3) as i64;
        let shapes = (0..series.len())
            .map(|i| CandleShape::measure(&series, i))
            .collect();
        Self {
            series,
            expiration,
            shapes,
            freshness: 0,
            order: CallOrder::default(),
        }
    }

    fn bullish_pattern(&self, i: usize) -> bool {
        let candle = self.shapes[i];
        if !candle.is_green {
            return false;
        }
        let yesterday = self.shapes[i - 1];
        let series = &self.series;

        let hammer =
            candle.leg_ratio >= HAMMER_LEG_RATIO && candle.head_ratio <= HAMMER_HEAD_RATIO;
        let marubozu =
            candle.leg_ratio <= MARUBOZU_LEG_RATIO && candle.head_ratio <= MARUBOZU_HEAD_RATIO;
        let engulfing = !yesterday.is_green
            && series.closes[i - 1] >= series.opens[i]
            && series.opens[i - 1] < series.closes[i];
        let close_above_high = series.closes[i] > series.highs[i - 1];

        hammer || marubozu || engulfing || close_above_high
    }
}

impl Indicator for CandleIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Candle
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        self.order.advance(date_index);
        if date_index == 0 || date_index >= self.shapes.len() {
            return Action::NoAction;
        }

        let pattern = self.bullish_pattern(date_index);
        self.freshness -= 1;
        if pattern {
            self.freshness = self.expiration;
            Action::Buy
        } else if self.freshness > 0 {
            Action::Buy
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match self.shapes.get(date_index) {
            Some(shape) if shape.leg_ratio.is_finite() && shape.head_ratio.is_finite() => {
                IndicatorValue::Fields(vec![
                    ("Leg_Ratio".to_string(), shape.leg_ratio),
                    ("Head_Ratio".to_string(), shape.head_ratio),
                ])
            }
            _ => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        let column = |f: fn(&CandleShape) -> f64| -> Vec<Option<f64>> {
            self.shapes.iter().map(|s| Some(f(s))).collect()
        };
        IndicatorGraph::from([
            ("candles".to_string(), column(|s| s.body)),
            ("legs".to_string(), column(|s| s.leg)),
            ("heads".to_string(), column(|s| s.head)),
            ("legRatios".to_string(), column(|s| s.leg_ratio)),
            ("headRatios".to_string(), column(|s| s.head_ratio)),
        ])
    }

    fn reset(&mut self) {
        self.freshness = 0;
        self.order.reset();
    }
}
