use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{calculate_sma, crossed, value_at};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

pub struct SmaIndicator {
    series: Arc<PriceSeries>,
    period: usize,
    min_duration: usize,
    sma: Vec<Option<f64>>,
}

impl SmaIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 20);
        let min_duration = get_param_usize(params, "minDuration", 1);
        let sma = calculate_sma(&series.closes, period);
        Self {
            series,
            period,
            min_duration,
            sma,
        }
    }

    fn first_checked_day(&self, date_index: usize) -> usize {
        (date_index + 1).saturating_sub(self.min_duration).max(1)
    }
}

impl Indicator for SmaIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn action(&mut self, date_index: usize, is_main: bool) -> Action {
        if date_index == 0 {
            return Action::NoAction;
        }
        let prices = &self.series.closes;

        // supporting buy: price held at or above the average every checked day
        let holds_above = (self.first_checked_day(date_index)..=date_index).all(|i| {
            value_at(&self.sma, i)
                .map(|sma| prices[i] >= sma)
                .unwrap_or(false)
        });

        let yesterday_price = Some(prices[date_index - 1]);
        let today_price = Some(prices[date_index]);
        let yesterday_sma = value_at(&self.sma, date_index - 1);
        let today_sma = value_at(&self.sma, date_index);
        let crossed_up = crossed(yesterday_price, today_price, yesterday_sma, today_sma, true);
        let crossed_down = crossed(yesterday_price, today_price, yesterday_sma, today_sma, false);

        if (is_main && crossed_up) || (!is_main && holds_above) {
            Action::Buy
        } else if crossed_down {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        IndicatorValue::from_option(value_at(&self.sma, date_index))
    }

    fn graph(&self) -> IndicatorGraph {
        IndicatorGraph::from([(format!("SMA({})", self.period), self.sma.clone())])
    }

    /// STOP when, on each checked day, the whole candle sat below the average
    /// and the price kept falling.
    fn should_stop(&self, date_index: usize) -> Action {
        if date_index == 0 {
            return Action::NoAction;
        }
        let first = (date_index + 1)
            .saturating_sub(self.min_duration.max(1))
            .max(1);
        let series = &self.series;
        let descending_below = (first..=date_index).all(|i| {
            value_at(&self.sma, i)
                .map(|sma| sma > series.highs[i] && series.closes[i] < series.closes[i - 1])
                .unwrap_or(false)
        });
        if descending_below {
            Action::Stop
        } else {
            Action::NoAction
        }
    }
}
