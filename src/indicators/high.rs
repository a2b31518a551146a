use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::rolling_max;
use crate::models::*;
use crate::param_utils::get_param_usize_at_least;
use std::sync::Arc;

/// Rolling highest close; backs the `highPeriod` entry filter.
pub struct HighIndicator {
    high: Vec<f64>,
}

impl HighIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 20, 1);
        Self {
            high: rolling_max(&series.closes, period),
        }
    }

    pub fn high_at(&self, date_index: usize) -> Option<f64> {
        self.high.get(date_index).copied()
    }
}

impl Indicator for HighIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::High
    }

    fn action(&mut self, _date_index: usize, _is_main: bool) -> Action {
        Action::NoAction
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(self.high_at(date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([(
            "High".to_string(),
            self.high.iter().copied().map(Some).collect(),
        )])
    }
}
