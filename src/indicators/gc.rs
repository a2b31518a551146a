use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_sma, crossed, previous, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

/// Golden cross of a fast and a slow moving average.
pub struct GcIndicator {
    ma1_period: usize,
    ma2_period: usize,
    ma1: Vec<Option<f64>>,
    ma2: Vec<Option<f64>>,
}

impl GcIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let ma1_period = get_param_usize(params, "ma1Period", 50);
        let ma2_period = get_param_usize(params, "ma2Period", 200);
        Self {
            ma1_period,
            ma2_period,
            ma1: calculate_sma(&series.closes, ma1_period),
            ma2: calculate_sma(&series.closes, ma2_period),
        }
    }
}

impl Indicator for GcIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Gc
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let a1 = previous(&self.ma1, date_index).flatten();
        let a2 = value_at(&self.ma1, date_index);
        let b1 = previous(&self.ma2, date_index).flatten();
        let b2 = value_at(&self.ma2, date_index);

        if crossed(a1, a2, b1, b2, true) {
            Action::Buy
        } else if crossed(a1, a2, b1, b2, false) {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match (value_at(&self.ma1, date_index), value_at(&self.ma2, date_index)) {
            (Some(fast), Some(slow)) => IndicatorValue::Scalar(fast - slow),
            _ => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([
            (format!("GC_MA({})", self.ma1_period), self.ma1.clone()),
            (format!("GC_MA({})", self.ma2_period), self.ma2.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn fast_average_crossing_slow_average() {
        let closes = [10.0, 10.0, 10.0, 10.0, 8.0, 14.0, 14.0];
        let mut indicator = GcIndicator::new(
            &params_of(&[("ma1Period", 2.0), ("ma2Period", 4.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        assert_eq!(indicator.action(4, true), Action::Sell);
        assert_eq!(indicator.action(5, true), Action::Buy);
        assert_eq!(indicator.value(5), IndicatorValue::Scalar(11.0 - 10.5));
    }
}
