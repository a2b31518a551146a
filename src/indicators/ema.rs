use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_ema, crossed, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

pub struct EmaIndicator {
    series: Arc<PriceSeries>,
    period: usize,
    min_duration: usize,
    ema: Vec<Option<f64>>,
}

impl EmaIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 20);
        let min_duration = get_param_usize(params, "minDuration", 1);
        let ema = calculate_ema(&series.closes, period);
        Self {
            series,
            period,
            min_duration,
            ema,
        }
    }
}

impl Indicator for EmaIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        if date_index == 0 {
            return Action::NoAction;
        }
        let prices = &self.series.closes;
        let first = (date_index + 1).saturating_sub(self.min_duration).max(1);

        // price above a rising average on every checked day
        let rising_above = (first..=date_index).all(|i| {
            match (value_at(&self.ema, i - 1), value_at(&self.ema, i)) {
                (Some(yesterday), Some(today)) => prices[i] >= today && today >= yesterday,
                _ => false,
            }
        });

        let crossed_down = crossed(
            Some(prices[date_index - 1]),
            Some(prices[date_index]),
            value_at(&self.ema, date_index - 1),
            value_at(&self.ema, date_index),
            false,
        );

        if rising_above {
            Action::Buy
        } else if crossed_down {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.ema, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([(format!("EMA({})", self.period), self.ema.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn buys_above_rising_average_and_sells_on_cross_down() {
        let closes = [10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 9.0];
        let mut indicator = EmaIndicator::new(
            &params_of(&[("period", 3.0), ("minDuration", 2.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        assert_eq!(indicator.action(3, true), Action::NoAction);
        assert_eq!(indicator.action(5, true), Action::Buy);
        assert_eq!(indicator.action(6, true), Action::Sell);
    }
}
