use crate::models::*;
use rayon::prelude::*;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub struct PerformanceCalculator;

/// Per-symbol tallies folded together by the parallel reduction.
#[derive(Debug, Clone, Default)]
struct Tally {
    events: usize,
    holdings: usize,
    faulty: usize,
    wins: usize,
    profit: f64,
    spans: f64,
    percent_profits: Vec<f64>,
    reasons: BTreeMap<EventReason, usize>,
}

impl Tally {
    fn of(result: &SymbolResult) -> Self {
        let mut tally = Tally {
            events: result.events.len(),
            holdings: result.holdings.len(),
            faulty: usize::from(result.faulty),
            ..Default::default()
        };
        for event in &result.events {
            if event.profit > 0.0 {
                tally.wins += 1;
            }
            tally.profit += event.profit;
            tally.spans += event.span as f64;
            tally.percent_profits.push(event.percent_profit);
            *tally.reasons.entry(event.reason).or_default() += 1;
        }
        tally
    }

    fn merge(mut self, other: Tally) -> Tally {
        self.events += other.events;
        self.holdings += other.holdings;
        self.faulty += other.faulty;
        self.wins += other.wins;
        self.profit += other.profit;
        self.spans += other.spans;
        self.percent_profits.extend(other.percent_profits);
        for (reason, count) in other.reasons {
            *self.reasons.entry(reason).or_default() += count;
        }
        self
    }
}

impl PerformanceCalculator {
    pub fn summarize(symbol_data: &BTreeMap<String, SymbolResult>) -> BacktestSummary {
        let results: Vec<&SymbolResult> = symbol_data.values().collect();
        let tally = results
            .par_iter()
            .map(|result| Tally::of(result))
            .reduce(Tally::default, Tally::merge);

        let average_percent_profit = Self::average(&tally.percent_profits);
        let percent_profit_std_dev = Self::population_std_dev(&tally.percent_profits);
        let sharpe = if percent_profit_std_dev > 0.0 {
            average_percent_profit / percent_profit_std_dev
        } else {
            0.0
        };

        BacktestSummary {
            symbols: symbol_data.len(),
            events: tally.events,
            holdings: tally.holdings,
            faulty_symbols: tally.faulty,
            win_rate: if tally.events > 0 {
                tally.wins as f64 / tally.events as f64
            } else {
                0.0
            },
            total_profit: tally.profit,
            average_percent_profit,
            percent_profit_std_dev,
            sharpe,
            average_span: if tally.events > 0 {
                tally.spans / tally.events as f64
            } else {
                0.0
            },
            reasons: tally.reasons,
        }
    }

    fn average(values: &[f64]) -> f64 {
        let filtered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if filtered.is_empty() {
            return 0.0;
        }
        filtered.mean()
    }

    fn population_std_dev(values: &[f64]) -> f64 {
        let filtered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if filtered.len() < 2 {
            return 0.0;
        }
        filtered.population_std_dev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn event(profit: f64, percent_profit: f64, span: i64, reason: EventReason) -> Event {
        let buy_date = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Event {
            buy_date,
            sell_date: buy_date + Duration::days(span),
            span,
            profit,
            percent_profit,
            reason,
            risk: None,
        }
    }

    #[test]
    fn summary_aggregates_across_symbols() {
        let mut symbol_data = BTreeMap::new();
        symbol_data.insert(
            "AAA".to_string(),
            SymbolResult {
                events: vec![
                    event(2.0, 0.2, 4, EventReason::Target),
                    event(-1.0, -0.1, 2, EventReason::Stoploss),
                ],
                profit: 1.0,
                ..Default::default()
            },
        );
        symbol_data.insert(
            "BBB".to_string(),
            SymbolResult {
                events: vec![event(1.0, 0.2, 6, EventReason::Indicator)],
                faulty: true,
                ..Default::default()
            },
        );

        let summary = PerformanceCalculator::summarize(&symbol_data);
        assert_eq!(summary.symbols, 2);
        assert_eq!(summary.events, 3);
        assert_eq!(summary.faulty_symbols, 1);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((summary.total_profit - 2.0).abs() < 1e-12);
        assert!((summary.average_percent_profit - 0.1).abs() < 1e-12);
        assert!((summary.average_span - 4.0).abs() < 1e-12);
        assert_eq!(summary.reasons[&EventReason::Stoploss], 1);
        assert!(summary.sharpe > 0.0);
    }

    #[test]
    fn empty_results_give_zeroed_summary() {
        let summary = PerformanceCalculator::summarize(&BTreeMap::new());
        assert_eq!(summary, BacktestSummary::default());
    }
}
