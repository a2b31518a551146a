use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_macd, crossed, ema_of_defined, previous, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize_at_least;
use std::sync::Arc;

/// MACD line, signal line and histogram shared by both MACD indicators.
#[derive(Debug, Clone)]
pub struct MacdLines {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdLines {
    pub fn from_params(params: &IndicatorParams, closes: &[f64]) -> Self {
        let ema1 = get_param_usize_at_least(params, "ema1", 12, 1);
        let ema2 = get_param_usize_at_least(params, "ema2", 26, 1);
        let signal_period = get_param_usize_at_least(params, "signalPeriod", 9, 1);

        let macd = calculate_macd(closes, ema1, ema2);
        let signal = ema_of_defined(&macd, signal_period);
        let histogram = macd
            .iter()
            .zip(signal.iter())
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            })
            .collect();
        Self {
            macd,
            signal,
            histogram,
        }
    }

    pub fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([
            ("MACD".to_string(), self.macd.clone()),
            ("Signal".to_string(), self.signal.clone()),
            ("Histogram".to_string(), self.histogram.clone()),
        ])
    }
}

pub struct MacdIndicator {
    lines: MacdLines,
}

impl MacdIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        Self {
            lines: MacdLines::from_params(params, &series.closes),
        }
    }
}

impl Indicator for MacdIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    // Entries always require the cross, main or not.
    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let lines = &self.lines;
        let yesterday_macd = previous(&lines.macd, date_index).flatten();
        let today_macd = value_at(&lines.macd, date_index);
        let yesterday_signal = previous(&lines.signal, date_index).flatten();
        let today_signal = value_at(&lines.signal, date_index);

        let crossed_up = crossed(yesterday_macd, today_macd, yesterday_signal, today_signal, true);
        let crossed_down =
            crossed(yesterday_macd, today_macd, yesterday_signal, today_signal, false);
        let today_macd = today_macd.unwrap_or(0.0);

        if crossed_up && today_macd < 0.0 {
            Action::Buy
        } else if crossed_down && today_macd > 0.0 {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match (
            value_at(&self.lines.histogram, date_index),
            value_at(&self.lines.macd, date_index),
        ) {
            (Some(histogram), Some(macd)) => IndicatorValue::Fields(vec![
                ("MACD_Histogram".to_string(), histogram),
                ("MACD_Value".to_string(), macd),
            ]),
            _ => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        self.lines.graph()
    }
}
