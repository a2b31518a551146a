use crate::indicator::{Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{swing_pivots, Pivot};
use crate::models::*;
use crate::param_utils::get_param_usize;
use std::sync::Arc;

/// Swing highs and lows. Informational only.
pub struct SwingIndicator {
    len: usize,
    pivots: Vec<Pivot>,
}

impl SwingIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 5);
        Self {
            len: series.len(),
            pivots: swing_pivots(&series.closes, period),
        }
    }

    pub fn pivots(&self) -> &[Pivot] {
        &self.pivots
    }

    fn pivot_on(&self, date_index: usize) -> Option<&Pivot> {
        self.pivots
            .binary_search_by_key(&date_index, |p| p.index)
            .ok()
            .map(|i| &self.pivots[i])
    }
}

impl Indicator for SwingIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Swing
    }

    fn action(&mut self, _date_index: usize, _is_main: bool) -> Action {
        Action::NoAction
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        match self.pivot_on(date_index) {
            Some(pivot) => IndicatorValue::Fields(vec![("Swing_Price".to_string(), pivot.price)]),
            None => IndicatorValue::Missing,
        }
    }

    fn graph(&self) -> IndicatorGraph {
        let mut pivots = vec![None; self.len];
        for pivot in &self.pivots {
            pivots[pivot.index] = Some(pivot.price);
        }
        IndicatorGraph::from([("pivots".to_string(), pivots)])
    }
}
