use crate::config::SWING_RANGE;
use crate::indicators::value_at;
use crate::models::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Open positions keyed by buy date, with their live exit levels.
pub type Positions = BTreeMap<DateTime<Utc>, StoplossTarget>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyTrade {
    pub price: f64,
    pub reason: EventReason,
}

/// Exit levels for a position bought at `date_index`. `atr` is the risk ATR
/// series aligned with `series`.
pub fn set_stoploss_target(
    options: &StrategyOptions,
    buy_price: f64,
    date_index: usize,
    atr: &[Option<f64>],
    series: &PriceSeries,
) -> StoplossTarget {
    let buy_atr = value_at(atr, date_index);
    let prior_days = date_index.saturating_sub(SWING_RANGE)..date_index;

    let atr_stoploss = match (options.stop_loss_atr, buy_atr) {
        (Some(multiplier), Some(atr)) => {
            let mut low = series.lows[date_index];
            if options.stop_loss_swing {
                low = series.lows[prior_days.clone()]
                    .iter()
                    .copied()
                    .fold(low, f64::min);
            }
            Some(low - multiplier * atr)
        }
        _ => None,
    };
    let stoploss = atr_stoploss.or_else(|| {
        options
            .stop_loss_ratio
            .map(|ratio| buy_price * (1.0 - ratio))
    });

    let risk_reward_target = match (options.risk_reward_ratio, stoploss) {
        (Some(ratio), Some(stoploss)) => Some(buy_price + ratio * (buy_price - stoploss)),
        _ => None,
    };
    let mut target = risk_reward_target
        .or_else(|| match (options.target_atr, buy_atr) {
            (Some(multiplier), Some(atr)) => Some(buy_price + multiplier * atr),
            _ => None,
        })
        .or_else(|| {
            options
                .target_ratio
                .map(|ratio| buy_price * (1.0 + ratio))
        });

    if options.target_swing {
        let swing_high = series.highs[prior_days]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if swing_high > buy_price {
            target = target.map(|t| t.min(swing_high));
        }
    }

    if stoploss.is_none() && target.is_none() {
        return StoplossTarget::default();
    }

    let mut entry = StoplossTarget {
        init_stoploss: stoploss,
        stoploss,
        target,
        risk: stoploss.map(|sl| (buy_price - sl) / buy_price * 100.0),
        ..Default::default()
    };
    if let (Some(target), true) = (target, options.trailing_stop_loss) {
        entry.mid_point = Some((target + buy_price) / 2.0);
        entry.mid_point_reached = Some(false);
    }
    entry
}

/// Positions that leave the market today through their exit levels, keyed by
/// buy date. Also ratchets trailing stops that reached their midpoint.
pub fn get_early_trades(
    options: &StrategyOptions,
    positions: &mut Positions,
    series: &PriceSeries,
    date_index: usize,
) -> BTreeMap<DateTime<Utc>, EarlyTrade> {
    let mut early_trades = BTreeMap::new();
    let day = series.dates[date_index];
    let price = series.closes[date_index];
    let high = series.highs[date_index];
    let low = series.lows[date_index];

    for (buy_date, entry) in positions.iter_mut() {
        if *buy_date == day {
            continue;
        }
        if let Some(target) = entry.target.filter(|&target| high >= target) {
            early_trades.insert(
                *buy_date,
                EarlyTrade {
                    price: target,
                    reason: EventReason::Target,
                },
            );
        }
        // stoploss wins a tie with the target
        if let Some(stoploss) = entry.stoploss.filter(|&stoploss| low <= stoploss) {
            early_trades.insert(
                *buy_date,
                EarlyTrade {
                    price: stoploss,
                    reason: EventReason::Stoploss,
                },
            );
        }
        if let Some(mid_point) = entry.mid_point {
            if !entry.midpoint_reached() && high > mid_point {
                entry.mid_point_reached = Some(true);
                if let Some(buy_index) = series.index_of(*buy_date) {
                    entry.stoploss = Some(series.closes[buy_index]);
                }
            }
        }
    }

    if let Some(max_days) = options.max_days.filter(|&days| days > 0) {
        for buy_date in positions.keys() {
            if (day - *buy_date).num_days() > max_days {
                early_trades.insert(
                    *buy_date,
                    EarlyTrade {
                        price,
                        reason: EventReason::Overdue,
                    },
                );
            }
        }
    }

    early_trades
}

/// Profit and percent profit of a closed trade, blending in the trailing
/// stop once its midpoint was reached.
pub fn calculate_profit(
    reason: EventReason,
    buy_price: f64,
    sell_price: f64,
    entry: &StoplossTarget,
) -> (f64, f64) {
    let simple = sell_price - buy_price;
    let profit = match entry.mid_point {
        Some(mid_point) => match reason {
            EventReason::Target => simple * 0.75,
            EventReason::Stoploss if entry.midpoint_reached() => (mid_point - buy_price) * 0.5,
            EventReason::Indicator | EventReason::Overdue if entry.midpoint_reached() => {
                (simple + mid_point - buy_price) * 0.5
            }
            _ => simple,
        },
        None => simple,
    };
    (profit, profit / buy_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::series_from_closes;
    use crate::indicators::calculate_atr;

    fn options() -> StrategyOptions {
        serde_json::from_value(serde_json::json!({
            "buyIndicators": {},
            "sellIndicators": {},
            "mainBuyIndicator": "SMA",
            "mainSellIndicator": "SMA",
            "expiration": 0
        }))
        .unwrap()
    }

    fn rising_series() -> PriceSeries {
        series_from_closes(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn atr_stoploss_sits_below_buy_and_sets_risk_reward_target() {
        let series = rising_series();
        let atr = calculate_atr(&series.highs, &series.lows, &series.closes, 12);
        let mut opts = options();
        opts.stop_loss_atr = Some(1.0);
        opts.risk_reward_ratio = Some(2.0);
        opts.trailing_stop_loss = true;

        let buy = series.closes[20];
        let entry = set_stoploss_target(&opts, buy, 20, &atr, &series);
        let stoploss = entry.stoploss.unwrap();

        assert!(stoploss < buy);
        assert_eq!(entry.init_stoploss, entry.stoploss);
        assert!((entry.target.unwrap() - (buy + 2.0 * (buy - stoploss))).abs() < 1e-9);
        assert_eq!(entry.mid_point, Some((entry.target.unwrap() + buy) / 2.0));
        assert_eq!(entry.mid_point_reached, Some(false));
        assert!(entry.risk.unwrap() > 0.0);
    }

    #[test]
    fn ratio_fallbacks_and_swing_cap() {
        let series = rising_series();
        let atr = vec![None; series.len()];
        let mut opts = options();
        opts.stop_loss_ratio = Some(0.1);
        opts.target_ratio = Some(0.5);

        let entry = set_stoploss_target(&opts, 100.0, 20, &atr, &series);
        assert!((entry.stoploss.unwrap() - 90.0).abs() < 1e-9);
        assert!((entry.target.unwrap() - 150.0).abs() < 1e-9);

        // prior highs top out at 120 above a buy at 110
        opts.target_swing = true;
        let entry = set_stoploss_target(&opts, 110.0, 20, &atr, &series);
        assert!((entry.target.unwrap() - 120.0).abs() < 1e-9);

        assert!(set_stoploss_target(&options(), 100.0, 20, &atr, &series).is_empty());
    }

    #[test]
    fn stoploss_wins_ties_and_midpoint_ratchets() {
        let mut series = series_from_closes(&[100.0, 100.0, 100.0]);
        series.highs[1] = 111.0;
        series.lows[1] = 94.0;
        let buy_date = series.dates[0];

        let mut positions = Positions::new();
        positions.insert(
            buy_date,
            StoplossTarget {
                stoploss: Some(95.0),
                target: Some(110.0),
                ..Default::default()
            },
        );
        let trades = get_early_trades(&options(), &mut positions, &series, 1);
        assert_eq!(trades[&buy_date].reason, EventReason::Stoploss);
        assert_eq!(trades[&buy_date].price, 95.0);

        let mut positions = Positions::new();
        positions.insert(
            buy_date,
            StoplossTarget {
                stoploss: Some(90.0),
                target: Some(120.0),
                mid_point: Some(110.0),
                mid_point_reached: Some(false),
                ..Default::default()
            },
        );
        let trades = get_early_trades(&options(), &mut positions, &series, 1);
        assert!(trades.is_empty());
        assert!(positions[&buy_date].midpoint_reached());
        assert_eq!(positions[&buy_date].stoploss, Some(100.0));
    }

    #[test]
    fn same_day_positions_are_skipped_and_overdue_uses_calendar_days() {
        let series = series_from_closes(&[100.0, 100.0, 100.0, 100.0]);
        let mut opts = options();
        opts.max_days = Some(2);

        let mut positions = Positions::new();
        positions.insert(
            series.dates[3],
            StoplossTarget {
                stoploss: Some(200.0),
                ..Default::default()
            },
        );
        positions.insert(series.dates[0], StoplossTarget::default());

        let trades = get_early_trades(&opts, &mut positions, &series, 3);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[&series.dates[0]].reason, EventReason::Overdue);
    }

    #[test]
    fn profit_without_trailing_is_plain_difference() {
        let entry = StoplossTarget::default();
        assert_eq!(
            calculate_profit(EventReason::Indicator, 10.0, 12.5, &entry),
            (2.5, 0.25)
        );
    }

    #[test]
    fn trailing_profit_blends_with_midpoint() {
        let mut entry = StoplossTarget {
            mid_point: Some(110.0),
            mid_point_reached: Some(false),
            ..Default::default()
        };
        assert_eq!(calculate_profit(EventReason::Target, 100.0, 120.0, &entry).0, 15.0);
        assert_eq!(calculate_profit(EventReason::Stoploss, 100.0, 95.0, &entry).0, -5.0);

        entry.mid_point_reached = Some(true);
        assert_eq!(calculate_profit(EventReason::Stoploss, 100.0, 100.0, &entry).0, 5.0);
        assert_eq!(calculate_profit(EventReason::Indicator, 100.0, 106.0, &entry).0, 8.0);
    }
}
