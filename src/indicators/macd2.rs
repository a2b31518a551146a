use super::macd::MacdLines;
use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{crossed, previous, value_at};
use crate::models::*;
use crate::param_utils::get_param_f64;
use std::sync::Arc;

/// MACD variant that buys on a threshold cross and sells while the histogram
/// is red.
pub struct Macd2Indicator {
    lines: MacdLines,
    buy_threshold: f64,
}

impl Macd2Indicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        Self {
            lines: MacdLines::from_params(params, &series.closes),
            buy_threshold: get_param_f64(params, "buyThreshold", 0.0),
        }
    }
}

impl Indicator for Macd2Indicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd2
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let threshold = Some(self.buy_threshold);
        let crossed_threshold = crossed(
            previous(&self.lines.macd, date_index).flatten(),
            value_at(&self.lines.macd, date_index),
            threshold,
            threshold,
            true,
        );
        let red = value_at(&self.lines.histogram, date_index)
            .map(|h| h < 0.0)
            .unwrap_or(false);

        if crossed_threshold {
            Action::Buy
        } else if red {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.lines.macd, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        self.lines.graph()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn sells_while_histogram_is_red() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * (i as f64 / 10.0)).collect();
        let mut indicator = Macd2Indicator::new(
            &params_of(&[
                ("ema1", 3.0),
                ("ema2", 6.0),
                ("signalPeriod", 4.0),
                ("buyThreshold", 0.0),
            ]),
            Arc::new(series_from_closes(&closes)),
        );

        assert_eq!(indicator.action(30, true), Action::Sell);
    }
}
