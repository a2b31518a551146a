use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{
    calculate_atr, crossed, realized_pivots, swing_pivots, value_at, Pivot, PivotKind,
};
use crate::models::*;
use crate::param_utils::{get_param_usize, get_param_usize_at_least};
use std::sync::Arc;

/// Days scanned for the dip back into a previous high's zone.
const ZONE_SCAN_DAYS: usize = 5;

/// Trend continuation: after a fresh swing high, buy when the price leaves
/// the zone around an earlier high upward after a shallow dip into it.
pub struct TrendIndicator {
    series: Arc<PriceSeries>,
    lookback: usize,
    pivots: Vec<Pivot>,
    realized: Vec<Option<usize>>,
    atr: Vec<Option<f64>>,
}

impl TrendIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 5, 1);
        let lookback = get_param_usize(params, "lookback", 3);
        let pivots = swing_pivots(&series.closes, period);
        let realized = realized_pivots(&pivots, series.len());
        let atr = calculate_atr(&series.highs, &series.lows, &series.closes, period);
        Self {
            series,
            lookback,
            pivots,
            realized,
            atr,
        }
    }

    fn price_crossed(&self, i: usize, level: f64, up: bool) -> bool {
        if i == 0 {
            return false;
        }
        let prices = &self.series.closes;
        crossed(
            Some(prices[i - 1]),
            Some(prices[i]),
            Some(level),
            Some(level),
            up,
        )
    }

    fn rebounds_from_zone(&self, high: &Pivot, date_index: usize) -> bool {
        let Some(high_atr) = value_at(&self.atr, high.index) else {
            return false;
        };
        let upper_zone = high.price + high_atr / 2.0;
        let lower_zone = high.price - high_atr / 2.0;
        if !self.price_crossed(date_index, upper_zone, true) {
            return false;
        }

        let mut entered_zone = false;
        for i in date_index.saturating_sub(ZONE_SCAN_DAYS)..date_index {
            if !entered_zone && self.price_crossed(i, upper_zone, false) {
                entered_zone = true;
            }
            if self.price_crossed(i, lower_zone, false) {
                return false;
            }
        }
        entered_zone
    }
}

impl Indicator for TrendIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Trend
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let Some(Some(realized)) = self.realized.get(date_index).copied() else {
            return Action::NoAction;
        };
        // a realized low means the move already happened
        if self.pivots[realized].kind == PivotKind::Low {
            return Action::NoAction;
        }

        let mut high_cursor = realized;
        let mut remaining = self.lookback;
        while high_cursor >= 4 && remaining > 0 {
            let earlier_high = &self.pivots[high_cursor - 2];
            if self.rebounds_from_zone(earlier_high, date_index) {
                return Action::Buy;
            }
            remaining -= 1;
            high_cursor -= 2;
        }
        Action::NoAction
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match self.realized.get(date_index).copied().flatten() {
            Some(position) => IndicatorValue::Scalar(self.pivots[position].price),
            None => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        let realized_prices = self
            .realized
            .iter()
            .map(|r| r.map(|position| self.pivots[position].price))
            .collect();
        IndicatorGraph::from([("Trend".to_string(), realized_prices)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn quiet_without_enough_highs() {
        let closes: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let mut indicator = TrendIndicator::new(
            &params_of(&[("period", 3.0), ("lookback", 3.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        for i in 0..closes.len() {
            assert_eq!(indicator.action(i, true), Action::NoAction);
        }
        assert_eq!(indicator.value(0), IndicatorValue::Missing);
    }
}
