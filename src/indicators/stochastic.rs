use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_stochastic, crossed, previous, value_at};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use std::sync::Arc;

pub struct StochasticIndicator {
    underbought: f64,
    overbought: f64,
    stochastic: Vec<Option<f64>>,
}

impl StochasticIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 14, 1);
        Self {
            underbought: get_param_f64(params, "underbought", 20.0),
            overbought: get_param_f64(params, "overbought", 80.0),
            stochastic: calculate_stochastic(&series.lows, &series.closes, &series.highs, period),
        }
    }
}

impl Indicator for StochasticIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Stochastic
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let yesterday = previous(&self.stochastic, date_index).flatten();
        let today = value_at(&self.stochastic, date_index);
        let under = Some(self.underbought);
        let over = Some(self.overbought);

        if crossed(yesterday, today, under, under, true) {
            Action::Buy
        } else if crossed(yesterday, today, over, over, false) {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.stochastic, date_index).map(|v| v / 100.0))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([("Stochastic".to_string(), self.stochastic.clone())])
    }
}
