use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize};
use std::sync::Arc;

/// Run of green candles with short upper wicks.
pub struct SolidIndicator {
    series: Arc<PriceSeries>,
    min_length: usize,
    max_ratio: f64,
}

impl SolidIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        Self {
            series,
            min_length: get_param_usize(params, "minLength", 3),
            max_ratio: get_param_f64(params, "maxRatio", 0.2),
        }
    }
}

impl Indicator for SolidIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Solid
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        if date_index >= self.series.len() {
            return Action::NoAction;
        }
        let first = (date_index + 1).saturating_sub(self.min_length);
        let series = &self.series;
        let solid = (first..=date_index).all(|i| {
            let body = series.closes[i] - series.opens[i];
            let head = series.highs[i] - series.closes[i];
            !(body < 0.0 || head / body > self.max_ratio)
        });
        if solid {
            Action::Buy
        } else {
            Action::NoAction
        }
    }

    fn value(&self, _date_index: usize) -> IndicatorValue {
        IndicatorValue::Scalar(0.0)
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn requires_green_candles_with_short_heads() {
        let mut series = series_from_closes(&[10.0, 11.0, 12.0, 13.0]);
        series.opens = vec![9.0, 10.0, 11.0, 13.5];
        series.highs = vec![10.1, 11.1, 12.1, 14.0];
        let mut indicator = SolidIndicator::new(
            &params_of(&[("minLength", 3.0), ("maxRatio", 0.2)]),
            Arc::new(series),
        );

        assert_eq!(indicator.action(2, true), Action::Buy);
        assert_eq!(indicator.action(3, true), Action::NoAction);
    }
}
