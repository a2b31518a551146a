use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_adx, crossed, previous, value_at, AdxOutput};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use std::sync::Arc;

pub struct AdxIndicator {
    threshold: f64,
    output: AdxOutput,
}

impl AdxIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 14, 1);
        let threshold = get_param_f64(params, "threshold", 25.0);
        Self {
            threshold,
            output: calculate_adx(&series.highs, &series.lows, &series.closes, period),
        }
    }
}

impl Indicator for AdxIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Adx
    }

    fn action(&mut self, date_index: usize, is_main: bool) -> Action {
        let out = &self.output;
        let a1 = previous(&out.pdi, date_index).flatten();
        let a2 = value_at(&out.pdi, date_index);
        let b1 = previous(&out.ndi, date_index).flatten();
        let b2 = value_at(&out.ndi, date_index);

        let directional_buy = if is_main {
            crossed(a1, a2, b1, b2, true)
        } else {
            matches!((a2, b2), (Some(pdi), Some(ndi)) if pdi > ndi)
        };
        let trending = value_at(&out.adx, date_index)
            .map(|adx| adx > self.threshold)
            .unwrap_or(false);

        if trending && directional_buy {
            Action::Buy
        } else if crossed(a1, a2, b1, b2, false) {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match (
            value_at(&self.output.adx, date_index),
            value_at(&self.output.histogram, date_index),
        ) {
            (Some(adx), Some(histogram)) => IndicatorValue::Fields(vec![
                ("ADX_Value".to_string(), adx / 100.0),
                ("ADX_Histogram".to_string(), histogram / 100.0),
            ]),
            _ => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([
            ("ADX".to_string(), self.output.adx.clone()),
            ("PDI".to_string(), self.output.pdi.clone()),
            ("NDI".to_string(), self.output.ndi.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn supporting_buy_in_strong_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let mut indicator = AdxIndicator::new(
            &params_of(&[("period", 5.0), ("threshold", 25.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        assert_eq!(indicator.action(8, false), Action::NoAction);
        assert_eq!(indicator.action(20, false), Action::Buy);
        // no cross in a steady trend
        assert_eq!(indicator.action(21, true), Action::NoAction);
        match indicator.value(20) {
            IndicatorValue::Fields(fields) => {
                assert_eq!(fields[0].0, "ADX_Value");
                assert!((fields[0].1 - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }
}
