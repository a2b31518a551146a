use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_atr, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize_at_least;
use std::sync::Arc;

/// Average true range. Informational only; it never trades.
pub struct AtrIndicator {
    atr: Vec<Option<f64>>,
}

impl AtrIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 14, 1);
        Self {
            atr: calculate_atr(&series.highs, &series.lows, &series.closes, period),
        }
    }
}

impl Indicator for AtrIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Atr
    }

    fn action(&mut self, _date_index: usize, _is_main: bool) -> Action {
        Action::NoAction
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.atr, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([("ATR".to_string(), self.atr.clone())])
    }
}
