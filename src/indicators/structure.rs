use crate::indicator::{CallOrder, Indicator, IndicatorGraph, IndicatorKind, IndicatorValue};
use crate::indicators::{crossed, swing_pivots, Pivot, PivotKind};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize};
use std::collections::HashMap;
use std::sync::Arc;

/// Days a price level stays relevant after it was last touched by a pivot.
const LEVEL_FRESHNESS: i64 = 720;

#[derive(Debug, Clone)]
struct PriceLevel {
    average: f64,
    count: usize,
    support: bool,
    resistance: bool,
    freshness: i64,
}

impl PriceLevel {
    fn from_pivot(pivot: &Pivot) -> Self {
        Self {
            average: pivot.price,
            count: 1,
            support: pivot.kind == PivotKind::Low,
            resistance: pivot.kind == PivotKind::High,
            freshness: LEVEL_FRESHNESS,
        }
    }

    fn absorb(&self, pivot: &Pivot) -> Self {
        let count = self.count + 1;
        Self {
            average: (self.average * self.count as f64 + pivot.price) / count as f64,
            count,
            support: self.support || pivot.kind == PivotKind::Low,
            resistance: self.resistance || pivot.kind == PivotKind::High,
            freshness: LEVEL_FRESHNESS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SupportResistance {
    support: Option<f64>,
    resistance: Option<f64>,
}

/// Level hit by the most pivots; the earliest wins ties.
fn strongest<'a>(candidates: impl Iterator<Item = &'a PriceLevel>) -> Option<f64> {
    let mut best: Option<&PriceLevel> = None;
    for level in candidates {
        if best.map(|b| level.count > b.count).unwrap_or(true) {
            best = Some(level);
        }
    }
    best.map(|level| level.average)
}

/// Support and resistance levels built from clustered swing pivots, traded
/// on breakouts through the nearest level.
pub struct StructureIndicator {
    series: Arc<PriceSeries>,
    pivots: Vec<Pivot>,
    levels: Vec<SupportResistance>,
    limit_level: Option<f64>,
    order: CallOrder,
}

impl StructureIndicator {
    pub fn new(params: &IndicatorParams, series: Arc<PriceSeries>) -> Self {
        let period = get_param_usize(params, "period", 5);
        let volatility = get_param_f64(params, "volatility", 0.02);
        let min_count = get_param_usize(params, "minCount", 1);
        let pivots = swing_pivots(&series.closes, period);
        let levels = Self::compute_levels(&series.closes, &pivots, volatility, min_count);
        Self {
            series,
            pivots,
            levels,
            limit_level: None,
            order: CallOrder::default(),
        }
    }

    fn compute_levels(
        prices: &[f64],
        pivots: &[Pivot],
        volatility: f64,
        min_count: usize,
    ) -> Vec<SupportResistance> {
        // realization day to pivot; a later pivot realized the same day wins
        let mut realized: HashMap<usize, &Pivot> = HashMap::new();
        for pivot in pivots {
            realized.insert(pivot.realized, pivot);
        }

        let mut merged: Vec<PriceLevel> = Vec::new();
        let mut output = Vec::with_capacity(prices.len());
        for (day, &price) in prices.iter().enumerate() {
            if let Some(pivot) = realized.get(&day) {
                let matched = merged.iter().position(|level| {
                    level.average * (1.0 + volatility) > pivot.price
                        && level.average * (1.0 - volatility) < pivot.price
                });
                match matched {
                    Some(position) => {
                        let level = merged.remove(position).absorb(pivot);
                        merged.push(level);
                    }
                    None => merged.push(PriceLevel::from_pivot(pivot)),
                }
            }

            for level in merged.iter_mut() {
                level.freshness -= 1;
            }
            merged.retain(|level| level.freshness > 0);

            output.push(Self::nearest_levels(&merged, price, min_count));
        }
        output
    }

    fn nearest_levels(merged: &[PriceLevel], price: f64, min_count: usize) -> SupportResistance {
        // levels tested from both sides are preferred; otherwise any level
        let tested = |level: &&PriceLevel| {
            level.support && level.resistance && level.count > min_count
        };
        let averages = || merged.iter().map(|level| level.average);

        let support = strongest(merged.iter().filter(tested).filter(|l| l.average < price))
            .or_else(|| averages().filter(|&avg| avg < price).reduce(f64::min));
        let resistance = strongest(merged.iter().filter(tested).filter(|l| l.average > price))
            .or_else(|| averages().filter(|&avg| avg > price).reduce(f64::max));
        SupportResistance {
            support,
            resistance,
        }
    }

    fn price_at(&self, index: Option<usize>) -> Option<f64> {
        index.and_then(|i| self.series.closes.get(i).copied())
    }
}

impl Indicator for StructureIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Structure
    }

    fn action(&mut self, date_index: usize, _is_main: bool) -> Action {
        self.order.advance(date_index);
        let Some(levels) = self.levels.get(date_index).copied() else {
            return Action::NoAction;
        };
        let before_yesterday = self.price_at(date_index.checked_sub(2));
        let yesterday = self.price_at(date_index.checked_sub(1));
        let today = Some(self.series.closes[date_index]);

        let lines: Vec<f64> = [levels.support, levels.resistance]
            .into_iter()
            .flatten()
            .collect();
        let crossing = |a1: Option<f64>, a2: Option<f64>, up: bool| {
            lines
                .iter()
                .copied()
                .find(|&level| crossed(a1, a2, Some(level), Some(level), up))
        };
        let yesterday_cross_up = crossing(before_yesterday, yesterday, true);
        let yesterday_cross_down = crossing(before_yesterday, yesterday, false);
        let today_cross_up = crossing(yesterday, today, true);

        let limit_reached = levels.resistance.is_none()
            && self
                .limit_level
                .map(|limit| crossed(yesterday, today, Some(limit), Some(limit), true))
                .unwrap_or(false);

        if today_cross_up.is_some() {
            return Action::Sell;
        }

        let price = self.series.closes[date_index];
        if yesterday_cross_up.map(|level| price > level).unwrap_or(false) {
            if let (Some(support), Some(resistance)) = (levels.support, levels.resistance) {
                if price > (resistance + support) / 2.0 {
                    return Action::NoAction;
                }
            }
            if let Some(support) = levels.support {
                self.limit_level = Some(price + (price - support));
            }
            return Action::Buy;
        }

        let falling = yesterday.map(|y| y > price).unwrap_or(false);
        if (yesterday_cross_down.is_some() && falling) || limit_reached {
            Action::Sell
        } else {
            Action::NoAction
        }
    }

    fn value(&self, date_index: usize) -> IndicatorValue {
        let Some(levels) = self.levels.get(date_index) else {
            return IndicatorValue::Missing;
        };
        let mut fields = Vec::new();
        if let Some(support) = levels.support {
            fields.push(("Structure_Support".to_string(), support));
        }
        if let Some(resistance) = levels.resistance {
            fields.push(("Structure_Resistance".to_string(), resistance));
        }
        if fields.is_empty() {
            IndicatorValue::Missing
        } else {
            IndicatorValue::Fields(fields)
        }
    }

    fn graph(&self) -> IndicatorGraph {
        let mut pivots = vec![None; self.series.len()];
        for pivot in &self.pivots {
            pivots[pivot.index] = Some(pivot.price);
        }
        IndicatorGraph::from([
            (
                "support".to_string(),
                self.levels.iter().map(|l| l.support).collect(),
            ),
            (
                "resistance".to_string(),
                self.levels.iter().map(|l| l.resistance).collect(),
            ),
            ("pivots".to_string(), pivots),
        ])
    }

    fn reset(&mut self) {
        self.limit_level = None;
        self.order.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::param_utils::params_of;

    fn oscillating(cycles: usize) -> Vec<f64> {
        let mut closes = Vec::new();
        for _ in 0..cycles {
            closes.extend([10.0, 11.0, 12.0, 13.0, 14.0, 13.0, 12.0, 11.0]);
        }
        closes
    }

    #[test]
    fn range_builds_support_below_and_resistance_above() {
        let closes = oscillating(6);
        let indicator = StructureIndicator::new(
            &params_of(&[("period", 3.0), ("volatility", 0.02), ("minCount", 1.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        let mid = closes.len() - 2; // price 12
        let levels = indicator.levels[mid];
        assert!((levels.support.unwrap() - 10.0).abs() < 1e-9);
        assert!((levels.resistance.unwrap() - 14.0).abs() < 1e-9);
        assert!(indicator.levels[0].support.is_none());
    }

    #[test]
    fn crossing_the_limit_without_resistance_sells() {
        let mut closes = oscillating(6);
        closes.extend([13.0, 15.0]);
        let mut indicator = StructureIndicator::new(
            &params_of(&[("period", 3.0), ("volatility", 0.02), ("minCount", 1.0)]),
            Arc::new(series_from_closes(&closes)),
        );

        let last = closes.len() - 1;
        for i in 0..last {
            indicator.action(i, true);
        }
        assert_eq!(indicator.action(last, true), Action::Sell);
    }
}
