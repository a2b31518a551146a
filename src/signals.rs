use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::config::RISK_ATR_PERIOD;
use crate::error::{EngineError, SymbolError};
use crate::indicator::{create_indicator, Indicator, IndicatorKind, SmaIndicator};
use crate::indicators::{calculate_atr, rolling_max};
use crate::models::*;
use crate::param_utils::params_of;
use crate::risk::{calculate_profit, get_early_trades, set_stoploss_target, EarlyTrade, Positions};

/// Main indicator plus the supporting indicators that must all agree before
/// the main signal is acted upon.
pub struct IndicatorSet {
    pub main: Box<dyn Indicator>,
    pub supporting: Vec<(String, Box<dyn Indicator>)>,
}

impl IndicatorSet {
    pub fn build(
        symbol: &str,
        indicators: &IndicatorOptions,
        main_name: &str,
        series: &Arc<PriceSeries>,
    ) -> Result<Self, SymbolError> {
        let mut main = None;
        let mut supporting = Vec::new();
        for (name, params) in indicators {
            let indicator = create_indicator(name, params, series.clone()).map_err(|err| {
                SymbolError::IndicatorCompute {
                    symbol: symbol.to_string(),
                    indicator: name.clone(),
                    reason: err.to_string(),
                }
            })?;
            if name == main_name {
                main = Some(indicator);
            } else {
                supporting.push((name.clone(), indicator));
            }
        }
        let main = main.ok_or_else(|| SymbolError::IndicatorCompute {
            symbol: symbol.to_string(),
            indicator: main_name.to_string(),
            reason: "main indicator is not configured".to_string(),
        })?;
        Ok(Self { main, supporting })
    }
}

/// Once-true agreement flags of the supporting indicators, with the
/// expiration countdown of the armed signal.
struct SignalGate {
    armed: bool,
    flags: BTreeMap<String, bool>,
    expiration: i64,
    remaining: i64,
}

impl SignalGate {
    fn new(set: &IndicatorSet, expiration: usize) -> Self {
        Self {
            armed: false,
            flags: set
                .supporting
                .iter()
                .map(|(name, _)| (name.clone(), false))
                .collect(),
            expiration: expiration as i64,
            remaining: expiration as i64,
        }
    }

    fn poll(&mut self, set: &mut IndicatorSet, date_index: usize, wanted: Action) -> bool {
        for (name, indicator) in set.supporting.iter_mut() {
            if indicator.action(date_index, false) == wanted {
                self.flags.insert(name.clone(), true);
            }
        }
        self.flags.values().all(|agreed| *agreed)
    }

    fn disarm(&mut self) {
        self.armed = false;
        self.remaining = self.expiration;
        for agreed in self.flags.values_mut() {
            *agreed = false;
        }
    }

    fn count_down(&mut self) {
        self.remaining -= 1;
        if self.remaining == 0 {
            self.disarm();
        }
    }
}

/// Result of an earlier run that an incremental update continues from.
#[derive(Debug, Clone, Copy)]
pub struct PreviousRun<'a> {
    pub result: &'a SymbolResult,
    pub last_updated: DateTime<Utc>,
}

/// Rejects options the engine cannot run: unknown indicator names or a main
/// indicator missing from its own group.
pub fn validate_strategy_options(options: &StrategyOptions) -> Result<(), EngineError> {
    for name in options
        .buy_indicators
        .keys()
        .chain(options.sell_indicators.keys())
    {
        name.parse::<IndicatorKind>()
            .map_err(|err| EngineError::InvalidStrategyOptions(err.to_string()))?;
    }
    if !options.buy_indicators.contains_key(&options.main_buy_indicator) {
        return Err(EngineError::InvalidStrategyOptions(format!(
            "main buy indicator {} is not among the buy indicators",
            options.main_buy_indicator
        )));
    }
    if !options
        .sell_indicators
        .contains_key(&options.main_sell_indicator)
    {
        return Err(EngineError::InvalidStrategyOptions(format!(
            "main sell indicator {} is not among the sell indicators",
            options.main_sell_indicator
        )));
    }
    if let Some(stop) = &options.stop_indicator {
        if stop.period == 0 {
            return Err(EngineError::InvalidStrategyOptions(
                "stop indicator period must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

/// First index of the bars loaded for an incremental update: the warm-up
/// margin before the last bar already covered, pulled back further to the
/// oldest open holding.
pub fn incremental_window_start(
    options: &StrategyOptions,
    series: &PriceSeries,
    previous: &PreviousRun<'_>,
) -> usize {
    let cutoff = series
        .dates
        .iter()
        .rposition(|date| *date < previous.last_updated)
        .unwrap_or(0);
    let mut start = cutoff.saturating_sub(options.warmup_margin());
    for holding in &previous.result.holdings {
        if let Some(index) = series.index_of(holding.buy_date) {
            start = start.min(index);
        }
    }
    start
}

/// Index of the first bar not covered by the previous run; `None` when
/// nothing new arrived since.
pub fn resume_index(series: &PriceSeries, last_updated: DateTime<Utc>) -> Option<usize> {
    series
        .dates
        .iter()
        .position(|date| *date + Duration::days(1) > last_updated)
}

/// Runs the buy/sell state machine over one symbol's bars.
///
/// With `previous`, only bars after its `last_updated` are simulated; earlier
/// events, holdings and accumulators are carried over.
pub fn find_intersections(
    options: &StrategyOptions,
    symbol: &str,
    candles: &[Candle],
    previous: Option<PreviousRun<'_>>,
) -> Result<SymbolResult, SymbolError> {
    let full = PriceSeries::from_candles(symbol, candles);

    let mut events: Vec<Event> = Vec::new();
    let mut profit = 0.0;
    let mut percent_profit_sum = 0.0;
    let mut carried: Vec<Holding> = Vec::new();
    if let Some(previous) = &previous {
        events = previous.result.events.clone();
        profit = previous.result.profit;
        percent_profit_sum = previous.result.percent_profit * events.len() as f64;
        carried = previous.result.holdings.clone();
    }

    if full.is_empty() {
        return Ok(SymbolResult {
            percent_profit: mean_percent(percent_profit_sum, events.len()),
            events,
            holdings: carried,
            profit,
            faulty: true,
        });
    }

    let (window_start, resume) = match &previous {
        Some(previous) => (
            incremental_window_start(options, &full, previous),
            resume_index(&full, previous.last_updated),
        ),
        None => (0, Some(0)),
    };
    let series = Arc::new(full.slice_from(window_start));
    let resume = resume.map(|index| index.saturating_sub(window_start));

    let mut buy_set = IndicatorSet::build(
        symbol,
        &options.buy_indicators,
        &options.main_buy_indicator,
        &series,
    )?;
    let mut sell_set = IndicatorSet::build(
        symbol,
        &options.sell_indicators,
        &options.main_sell_indicator,
        &series,
    )?;
    let risk_atr = calculate_atr(&series.highs, &series.lows, &series.closes, RISK_ATR_PERIOD);
    let high_filter = options
        .high_period
        .map(|period| rolling_max(&series.closes, period.max(1)));
    let stop_indicator = options.stop_indicator.as_ref().map(|stop| {
        SmaIndicator::new(
            &params_of(&[
                ("period", stop.period as f64),
                ("minDuration", stop.min_duration as f64),
            ]),
            series.clone(),
        )
    });

    // holdings outside the loaded window cannot be evaluated; keep them as-is
    let mut positions = Positions::new();
    let mut orphans = Vec::new();
    for holding in carried {
        if series.index_of(holding.buy_date).is_some() {
            positions.insert(holding.buy_date, holding.stoploss_target);
        } else {
            orphans.push(holding);
        }
    }

    let mut buy_gate = SignalGate::new(&buy_set, options.expiration);
    let mut sell_gate = SignalGate::new(&sell_set, options.expiration);
    let mut faulty = false;

    let start = resume.unwrap_or(series.len());
    for i in start..series.len() {
        if !series.has_price(i) {
            debug!("{}: missing price on {}, stopping", symbol, series.dates[i]);
            faulty = true;
            break;
        }
        let day = series.dates[i];
        let price = series.closes[i];

        if buy_set.main.action(i, true) == Action::Buy && series.volumes[i] > options.min_volume {
            buy_gate.armed = true;
        }
        if buy_gate.armed {
            let all_agree = buy_gate.poll(&mut buy_set, i, Action::Buy);
            if all_agree && (positions.is_empty() || options.multiple_buys) {
                let entry = set_stoploss_target(options, price, i, &risk_atr, &series);
                let above_recent_high = match (&high_filter, entry.target) {
                    (Some(high), Some(target)) => target > high[i],
                    _ => false,
                };
                // the signal stays armed and the rest of the day is skipped
                if above_recent_high {
                    continue;
                }
                positions.insert(day, entry);
                buy_gate.disarm();
            } else {
                buy_gate.count_down();
            }
        }

        let mut early_trades = get_early_trades(options, &mut positions, &series, i);
        if let Some(stop) = &stop_indicator {
            if stop.should_stop(i) == Action::Stop {
                early_trades = positions
                    .keys()
                    .map(|buy_date| {
                        (
                            *buy_date,
                            EarlyTrade {
                                price,
                                reason: EventReason::Indicator,
                            },
                        )
                    })
                    .collect();
            }
        }
        let has_early_trades = !early_trades.is_empty();
        let main_sell = sell_set.main.action(i, true);

        if has_early_trades || (main_sell == Action::Sell && !positions.is_empty()) {
            sell_gate.armed = true;
        }
        if !sell_gate.armed {
            continue;
        }

        let all_agree = sell_gate.poll(&mut sell_set, i, Action::Sell);
        if !(all_agree || has_early_trades) {
            sell_gate.count_down();
            continue;
        }

        let mut kept = Positions::new();
        for (buy_date, entry) in std::mem::take(&mut positions) {
            let mut sell_price = price;
            let reason = if has_early_trades {
                match early_trades.get(&buy_date) {
                    Some(trade) => {
                        if options.limit_order {
                            sell_price = trade.price;
                        }
                        trade.reason
                    }
                    None if main_sell != Action::Sell => {
                        kept.insert(buy_date, entry);
                        continue;
                    }
                    None => EventReason::Indicator,
                }
            } else {
                EventReason::Indicator
            };

            let buy_price = series
                .index_of(buy_date)
                .map(|index| series.closes[index])
                .unwrap_or(price);
            let (event_profit, event_percent) =
                calculate_profit(reason, buy_price, sell_price, &entry);
            profit += event_profit;
            percent_profit_sum += event_percent;
            events.push(Event {
                buy_date,
                sell_date: day,
                span: (day - buy_date).num_days(),
                profit: event_profit,
                percent_profit: event_percent,
                reason,
                risk: entry.stoploss.and(entry.risk),
            });
        }
        positions = kept;
        sell_gate.disarm();
    }

    let mut holdings: Vec<Holding> = orphans;
    holdings.extend(positions.into_iter().map(|(buy_date, stoploss_target)| Holding {
        buy_date,
        stoploss_target,
    }));
    holdings.sort_by_key(|holding| holding.buy_date);

    Ok(SymbolResult {
        percent_profit: mean_percent(percent_profit_sum, events.len()),
        events,
        holdings,
        profit,
        faulty,
    })
}

pub(crate) fn mean_percent(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        test_support::candles_from_closes("AAA", closes)
    }

    fn sma_options(period: f64) -> StrategyOptions {
        serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": period, "minDuration": 1 } },
            "sellIndicators": { "SMA": { "period": period, "minDuration": 1 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 3
        }))
        .unwrap()
    }

    /// Flat at 10, jumps above the average on day 10, collapses on day 20.
    fn crossing_closes() -> Vec<f64> {
        let mut closes = vec![10.0; 10];
        closes.extend((10..20).map(|i| 11.0 + (i - 10) as f64 * 0.1));
        closes.extend(vec![8.0; 5]);
        closes
    }

    #[test]
    fn single_round_trip_on_average_crosses() {
        let closes = crossing_closes();
        let result = find_intersections(
            &sma_options(5.0),
            "AAA",
            &candles_from_closes(&closes),
            None,
        )
        .unwrap();

        assert!(!result.faulty);
        assert_eq!(result.events.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.reason, EventReason::Indicator);
        assert_eq!(event.span, 10);
        assert!((event.profit - (closes[20] - closes[10])).abs() < 1e-9);
        assert!((result.percent_profit - event.profit / closes[10]).abs() < 1e-9);
        assert!(result.holdings.is_empty());
    }

    #[test]
    fn open_position_at_the_end_becomes_a_holding() {
        let closes: Vec<f64> = crossing_closes().into_iter().take(18).collect();
        let result = find_intersections(
            &sma_options(5.0),
            "AAA",
            &candles_from_closes(&closes),
            None,
        )
        .unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.percent_profit, 0.0);
        assert_eq!(result.holdings.len(), 1);
    }

    #[test]
    fn missing_price_marks_symbol_faulty() {
        let mut closes = crossing_closes();
        closes[15] = 0.0;
        let result = find_intersections(
            &sma_options(5.0),
            "AAA",
            &candles_from_closes(&closes),
            None,
        )
        .unwrap();
        assert!(result.faulty);
        assert!(result.events.is_empty());

        let empty = find_intersections(&sma_options(5.0), "AAA", &[], None).unwrap();
        assert!(empty.faulty);
    }

    #[test]
    fn atr_stoploss_closes_position_early() {
        let mut closes = vec![10.0; 20];
        closes.extend([11.0, 11.1, 11.2, 11.3, 9.0, 9.0]);
        let mut options = sma_options(5.0);
        options.stop_loss_atr = Some(0.5);
        options.limit_order = true;

        let result =
            find_intersections(&options, "AAA", &candles_from_closes(&closes), None).unwrap();
        let event = &result.events[0];
        assert_eq!(event.reason, EventReason::Stoploss);
        assert!(event.risk.unwrap() > 0.0);
        assert!(event.profit < 0.0);
    }

    #[test]
    fn buy_above_recent_high_defers_exits_of_that_day() {
        // 20 early on keeps the recent high out of reach of the first target only
        let mut closes = vec![20.0];
        closes.extend(vec![10.0; 9]);
        closes.extend([11.0, 10.6, 10.2, 10.9, 10.4]);
        let mut options: StrategyOptions = serde_json::from_value(serde_json::json!({
            "buyIndicators": { "SMA": { "period": 3, "minDuration": 1 } },
            "sellIndicators": { "SMA": { "period": 1000, "minDuration": 1 } },
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 3,
            "targetRatio": 0.05,
            "maxDays": 2,
            "highPeriod": 12,
            "multipleBuys": true
        }))
        .unwrap();

        let candles = candles_from_closes(&closes);
        let result = find_intersections(&options, "AAA", &candles, None).unwrap();

        // overdue from day 13, but day 13 rejects a buy above the recent high
        assert_eq!(result.events.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.reason, EventReason::Overdue);
        assert_eq!(event.buy_date, candles[10].date);
        assert_eq!(event.sell_date, candles[14].date);
        assert_eq!(result.holdings.len(), 1);
        assert_eq!(result.holdings[0].buy_date, candles[14].date);

        options.high_period = None;
        let unfiltered = find_intersections(&options, "AAA", &candles, None).unwrap();
        assert_eq!(unfiltered.events[0].sell_date, candles[13].date);
    }

    #[test]
    fn validation_rejects_unknown_and_missing_main_indicators() {
        let mut options = sma_options(5.0);
        assert!(validate_strategy_options(&options).is_ok());

        options.main_sell_indicator = "RSI".to_string();
        assert!(matches!(
            validate_strategy_options(&options),
            Err(EngineError::InvalidStrategyOptions(_))
        ));

        let mut options = sma_options(5.0);
        options
            .buy_indicators
            .insert("Bogus".to_string(), IndicatorParams::new());
        let err = validate_strategy_options(&options).unwrap_err();
        assert!(err.to_string().contains("Unknown indicator: Bogus"));
    }

    #[test]
    fn update_without_new_bars_changes_nothing() {
        let closes = crossing_closes();
        let candles = candles_from_closes(&closes);
        let options = sma_options(5.0);
        let first = find_intersections(&options, "AAA", &candles, None).unwrap();

        let last_updated = candles.last().unwrap().date + Duration::days(1);
        let again = find_intersections(
            &options,
            "AAA",
            &candles,
            Some(PreviousRun {
                result: &first,
                last_updated,
            }),
        )
        .unwrap();
        assert_eq!(again, first);
    }
}
