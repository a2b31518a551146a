use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{
    calculate_atr, calculate_rsi, is_high_low, realized_pivots, swing_pivots, value_at, Pivot,
    PivotKind,
};
use crate::models::*;
use crate::param_utils::{get_param_usize, get_param_usize_at_least};
use std::sync::Arc;

const DIVERGENCE_RSI_PERIOD: usize = 14;
const MAX_RSI: f64 = 35.0;
const MIN_ATR: f64 = 0.0;

/// Bullish RSI divergence: a fresh price low above an earlier swing low while
/// RSI prints lower.
pub struct DivergenceIndicator {
    series: Arc<PriceSeries>,
    period: usize,
    lookback: usize,
    pivots: Vec<Pivot>,
    realized: Vec<Option<usize>>,
    rsi: Vec<Option<f64>>,
    atr: Vec<Option<f64>>,
}

impl DivergenceIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize_at_least(params, "period", 5, 1);
        let lookback = get_param_usize(params, "lookback", 3);
        let pivots = swing_pivots(&series.closes, period);
        let realized = realized_pivots(&pivots, series.len());
        let rsi = calculate_rsi(&series.closes, DIVERGENCE_RSI_PERIOD);
        let atr = calculate_atr(&series.highs, &series.lows, &series.closes, period);
        Self {
            series,
            period,
            lookback,
            pivots,
            realized,
            rsi,
            atr,
        }
    }

    fn diverges_from(&self, low: &Pivot, date_index: usize, price: f64, rsi: f64) -> bool {
        let (Some(low_rsi), Some(low_atr)) =
            (value_at(&self.rsi, low.index), value_at(&self.atr, low.index))
        else {
            return false;
        };
        price > low.price + low_atr * MIN_ATR
            && rsi < low_rsi
            && rsi < MAX_RSI
            && is_high_low(&self.series.closes, self.period, date_index).low
    }
}

impl Indicator for DivergenceIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Divergence
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        let Some(Some(realized)) = self.realized.get(date_index).copied() else {
            return Action::NoAction;
        };
        let Some(rsi) = value_at(&self.rsi, date_index) else {
            return Action::NoAction;
        };
        let price = self.series.closes[date_index];

        // walk back over lows only, skipping the highs in between
        let mut low_cursor = realized as i64;
        if self.pivots[realized].kind == PivotKind::High {
            low_cursor -= 1;
        }
        let mut remaining = self.lookback;
        while low_cursor >= 2 && remaining > 0 {
            let low = &self.pivots[low_cursor as usize];
            if self.diverges_from(low, date_index, price, rsi) {
                return Action::Buy;
            }
            remaining -= 1;
            low_cursor -= 2;
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
        IndicatorGraph::from([("Divergence".to_string(), realized_prices)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    #[test]
    fn no_signal_before_any_pivot_is_realized() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let mut indicator = DivergenceIndicator::new(
            &params_of(&[("period", 3.0), ("lookback", 2.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        for i in 0..closes.len() {
            assert_eq!(indicator.action(i, true), Action::NoAction);
        }
    }
}
