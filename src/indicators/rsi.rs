use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_rsi, crossed, previous, value_at};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use std::sync::Arc;

pub struct RsiIndicator {
    underbought: f64,
    overbought: f64,
    rsi: Vec<Option<f64>>,
}

impl RsiIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 14, 1);
        let underbought = get_param_f64(params, "underbought", 30.0);
        let overbought = get_param_f64(params, "overbought", 70.0);
        Self {
            underbought,
            overbought,
            rsi: calculate_rsi(&series.closes, period),
        }
    }

    pub fn rsi(&self) -> &[Option<f64>] {
        &self.rsi
    }
}

impl Indicator for RsiIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let yesterday = previous(&self.rsi, date_index).flatten();
        let today = value_at(&self.rsi, date_index);
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
        IndicatorValue::from_option(value_at(&self.rsi, date_index).map(|v| v / 100.0))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([("RSI".to_string(), self.rsi.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn buys_when_leaving_oversold_zone() {
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64 * 3.0).collect();
        closes.extend((0..10).map(|i| 73.0 + i as f64 * 3.0));
        let mut indicator = RsiIndicator::new(
            &params_of(&[("period", 3.0), ("underbought", 30.0), ("overbought", 70.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        let actions: Vec<Action> = (1..closes.len())
            .map(|i| indicator.action(i, true))
            .collect();
        assert!(actions.contains(&Action::Buy));
        assert!(!actions.contains(&Action::Sell));
        match indicator.value(15) {
            IndicatorValue::Scalar(v) => assert!((0.0..=1.0).contains(&v)),
            other => panic!("unexpected value {:?}", other),
        }
    }
}
