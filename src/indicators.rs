use statrs::statistics::Statistics;

/// Treats (a1 -> a2) and (b1 -> b2) as two lines sampled one step apart.
pub fn is_crossed(a1: f64, a2: f64, b1: f64, b2: f64, cross_up: bool) -> bool {
    if cross_up {
        a1 <= b1 && a2 > b2
    } else {
        a1 >= b1 && a2 < b2
    }
}

/// `is_crossed` over warm-up aware values; a missing operand never crosses.
pub fn crossed(
    a1: Option<f64>,
    a2: Option<f64>,
    b1: Option<f64>,
    b2: Option<f64>,
    cross_up: bool,
) -> bool {
    match (a1, a2, b1, b2) {
        (Some(a1), Some(a2), Some(b1), Some(b2)) => is_crossed(a1, a2, b1, b2, cross_up),
        _ => false,
    }
}

/// Value at `index - 1`, or None on the first day.
pub fn previous<T: Copy>(values: &[T], index: usize) -> Option<T> {
    index.checked_sub(1).and_then(|i| values.get(i).copied())
}

pub fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

/// Rolling mean over `values[start..]`, aligned to `values`. Defined from
/// `start + period - 1` onward. Each window is summed on its own so a flat
/// stretch averages to exactly its price; a window with a non-finite value
/// repeats the last finite mean.
pub fn sma_over(values: &[f64], start: usize, period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if period == 0 || values.len() < start + period {
        return result;
    }

    let mut last_mean = None;
    for i in (start + period - 1)..values.len() {
        let window_sum: f64 = values[i + 1 - period..=i].iter().sum();
        if window_sum.is_finite() {
            last_mean = Some(window_sum / period as f64);
        }
        result[i] = last_mean;
    }

    result
}

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    sma_over(prices, 0, period)
}

/// Exponential mean over `values[start..]`, seeded with the mean of the first
/// `period` values and defined from `start + period` onward.
pub fn ema_over(values: &[f64], start: usize, period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if period == 0 || values.len() <= start + period {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = values[start..start + period].iter().sum::<f64>() / period as f64;
    let mut last = seed;
    for i in (start + period)..values.len() {
        let ema = values[i] * multiplier + last * (1.0 - multiplier);
        result[i] = Some(ema);
        last = ema;
    }

    result
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    ema_over(prices, 0, period)
}

/// Wilder's running average over `values[start..]`, defined from
/// `start + period` onward.
pub fn wilder_smoothing(values: &[f64], start: usize, period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if period == 0 || values.len() <= start + period {
        return result;
    }

    let p = period as f64;
    let mut avg = values[start..start + period].iter().sum::<f64>() / p;
    for i in (start + period)..values.len() {
        avg = avg * ((p - 1.0) / p) + values[i] / p;
        result[i] = Some(avg);
    }

    result
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = prices.len();
    let mut ups = vec![0.0; n];
    let mut downs = vec![0.0; n];
    for i in 1..n {
        let delta = prices[i] - prices[i - 1];
        ups[i] = delta.max(0.0);
        downs[i] = (-delta).max(0.0);
    }

    let avg_up = wilder_smoothing(&ups, 1, period);
    let avg_down = wilder_smoothing(&downs, 1, period);
    avg_up
        .iter()
        .zip(avg_down.iter())
        .map(|(up, down)| match (up, down) {
            (Some(up), Some(down)) => Some(rsi_from_avgs(*up, *down)),
            _ => None,
        })
        .collect()
}

/// MACD line (`EMA(fast) - EMA(slow)`); defined where both averages are.
pub fn calculate_macd(prices: &[f64], fast_period: usize, slow_period: usize) -> Vec<Option<f64>> {
    let fast = calculate_ema(prices, fast_period);
    let slow = calculate_ema(prices, slow_period);
    fast.iter()
        .zip(slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect()
}

/// EMA over the defined, contiguous tail of a warm-up aware series.
pub fn ema_of_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let Some(start) = values.iter().position(|v| v.is_some()) else {
        return vec![None; values.len()];
    };
    let dense: Vec<f64> = values.iter().map(|v| v.unwrap_or(0.0)).collect();
    ema_over(&dense, start, period)
}

/// True range from index 1; index 0 has no previous close and stays 0.
pub fn calculate_true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let mut tr = vec![0.0; highs.len()];
    for i in 1..highs.len() {
        tr[i] = (highs[i] - lows[i])
            .max(highs[i] - closes[i - 1])
            .max(lows[i] - closes[i - 1]);
    }
    tr
}

/// Simple average of the true range, defined from index `period`.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = calculate_true_range(highs, lows, closes);
    sma_over(&tr, 1, period)
}

pub fn calculate_directional_movement(highs: &[f64], lows: &[f64], positive: bool) -> Vec<f64> {
    let mut dm = vec![0.0; highs.len()];
    for i in 1..highs.len() {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        dm[i] = if positive {
            if up_move > down_move && up_move > 0.0 {
                up_move
            } else {
                0.0
            }
        } else if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
    }
    dm
}

#[derive(Clone, Debug, Default)]
pub struct AdxOutput {
    pub adx: Vec<Option<f64>>,
    pub pdi: Vec<Option<f64>>,
    pub ndi: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn calculate_adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> AdxOutput {
    let n = highs.len();
    let mut output = AdxOutput {
        adx: vec![None; n],
        pdi: vec![None; n],
        ndi: vec![None; n],
        histogram: vec![None; n],
    };
    if period == 0 {
        return output;
    }

    let tr = calculate_true_range(highs, lows, closes);
    let pdm = calculate_directional_movement(highs, lows, true);
    let ndm = calculate_directional_movement(highs, lows, false);
    let atr = wilder_smoothing(&tr, 1, period);
    let apdm = wilder_smoothing(&pdm, 1, period);
    let andm = wilder_smoothing(&ndm, 1, period);

    let mut dx = vec![None; n];
    for i in (1 + period)..n {
        let (Some(atr), Some(apdm), Some(andm)) = (atr[i], apdm[i], andm[i]) else {
            continue;
        };
        let pdi = if atr > 0.0 { apdm / atr * 100.0 } else { 0.0 };
        let ndi = if atr > 0.0 { andm / atr * 100.0 } else { 0.0 };
        let di_sum = pdi + ndi;
        output.pdi[i] = Some(pdi);
        output.ndi[i] = Some(ndi);
        output.histogram[i] = Some(pdi - ndi);
        dx[i] = Some(if di_sum.abs() > 0.0 {
            (pdi - ndi).abs() / di_sum.abs() * 100.0
        } else {
            0.0
        });
    }

    // First ADX is the mean of `period` DX values, then Wilder-smoothed.
    let p = period as f64;
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut prev = 0.0;
    for i in 0..n {
        let Some(dx) = dx[i] else {
            continue;
        };
        if count < period {
            sum += dx;
        } else if count == period {
            prev = sum / count as f64;
            output.adx[i] = Some(prev);
        } else {
            prev = (prev * (p - 1.0) + dx) / p;
            output.adx[i] = Some(prev);
        }
        count += 1;
    }

    output
}

/// Position of the price inside the `period` high/low range, scaled to 0..100.
pub fn calculate_stochastic(
    lows: &[f64],
    prices: &[f64],
    highs: &[f64],
    period: usize,
) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| {
            let first = (i + 1).saturating_sub(period.max(1));
            let low = lows[first..=i].iter().copied().fold(f64::INFINITY, f64::min);
            let high = highs[first..=i]
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            let range = high - low;
            if range > 0.0 && range.is_finite() {
                Some((prices[i] - low) / range * 100.0)
            } else {
                None
            }
        })
        .collect()
}

/// Highest value in the trailing window of `period` entries, including today.
pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    let window = period.max(1);
    let mut queue: std::collections::VecDeque<usize> = std::collections::VecDeque::new();
    let mut result = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        while queue.back().map(|&j| values[j] <= values[i]).unwrap_or(false) {
            queue.pop_back();
        }
        queue.push_back(i);
        if queue.front().map(|&j| j + window <= i).unwrap_or(false) {
            queue.pop_front();
        }
        if let Some(&j) = queue.front() {
            result.push(values[j]);
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighLow {
    pub high: bool,
    pub low: bool,
}

/// Whether today's price is the highest and/or lowest of the prior `period` days.
pub fn is_high_low(prices: &[f64], period: usize, index: usize) -> HighLow {
    let current = prices[index];
    let mut result = HighLow {
        high: true,
        low: true,
    };
    let stop = index.saturating_sub(period);
    for i in (stop..index).rev() {
        if prices[i] > current {
            result.high = false;
        } else if prices[i] < current {
            result.low = false;
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub kind: PivotKind,
    pub index: usize,
    pub price: f64,
    /// Index of the day the pivot becomes known.
    pub realized: usize,
}

/// Alternating swing lows and highs, ordered by date.
pub fn swing_pivots(prices: &[f64], period: usize) -> Vec<Pivot> {
    let mut pivots: std::collections::BTreeMap<usize, Pivot> = std::collections::BTreeMap::new();
    if prices.is_empty() {
        return Vec::new();
    }
    let last = prices.len() - 1;
    let mut mode = PivotKind::Low;
    let mut swing = 0usize;

    for i in 0..prices.len() {
        let high_low = is_high_low(prices, period, i);
        if high_low.high {
            if mode == PivotKind::Low {
                pivots.insert(
                    swing,
                    Pivot {
                        kind: PivotKind::Low,
                        index: swing,
                        price: prices[swing],
                        realized: (i + 1).min(last),
                    },
                );
                mode = PivotKind::High;
            }
            swing = i;
        }
        if high_low.low {
            if mode == PivotKind::High {
                pivots.insert(
                    swing,
                    Pivot {
                        kind: PivotKind::High,
                        index: swing,
                        price: prices[swing],
                        realized: (i + 1).min(last),
                    },
                );
                mode = PivotKind::Low;
            }
            swing = i;
        }
    }

    pivots.into_values().collect()
}

/// For each day, the position in `pivots` of the latest pivot already realized.
pub fn realized_pivots(pivots: &[Pivot], len: usize) -> Vec<Option<usize>> {
    let mut result = vec![None; len];
    let mut latest: Option<usize> = None;
    for (day, slot) in result.iter_mut().enumerate() {
        for (position, pivot) in pivots.iter().enumerate() {
            if pivot.realized == day && latest.map(|l| position > l).unwrap_or(true) {
                latest = Some(position);
            }
        }
        *slot = latest;
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    /// Rescale to [0, 1] by the window's min and max.
    ClampRange,
    /// Zero mean, unit population standard deviation.
    ZScore,
    /// Oscillators on a 0..100 scale.
    Percent,
    Identity,
}

impl Normalizer {
    pub fn apply(self, values: &[f64]) -> Vec<f64> {
        match self {
            Normalizer::ClampRange => {
                if values.len() <= 1 {
                    return values.to_vec();
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let range = max - min;
                values
                    .iter()
                    .map(|v| if range > 0.0 { (v - min) / range } else { 0.0 })
                    .collect()
            }
            Normalizer::ZScore => {
                if values.is_empty() {
                    return Vec::new();
                }
                let mean = values.iter().mean();
                let sd = values.iter().population_std_dev();
                values
                    .iter()
                    .map(|v| if sd > 0.0 { (v - mean) / sd } else { 0.0 })
                    .collect()
            }
            Normalizer::Percent => values.iter().map(|v| v / 100.0).collect(),
            Normalizer::Identity => values.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn is_crossed_truth_table() {
        let samples = [-2.0, -1.0, 0.0, 0.5, 1.0, 3.0];
        for &a1 in &samples {
            for &a2 in &samples {
                for &b1 in &samples {
                    for &b2 in &samples {
                        assert_eq!(is_crossed(a1, a2, b1, b2, true), a1 <= b1 && a2 > b2);
                        assert_eq!(is_crossed(a1, a2, b1, b2, false), a1 >= b1 && a2 < b2);
                    }
                }
            }
        }
        assert!(!crossed(None, Some(2.0), Some(1.0), Some(1.0), true));
    }

    #[test]
    fn sma_is_defined_from_period_and_matches_trailing_mean() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let sma = calculate_sma(&prices, 3);

        assert_eq!(sma[0], None);
        assert_eq!(sma[1], None);
        assert!(approx(sma[2].unwrap(), 2.0));
        assert!(approx(sma[5].unwrap(), 5.0));
    }

    #[test]
    fn sma_of_constant_series_is_constant() {
        let prices = vec![42.0; 20];
        let sma = calculate_sma(&prices, 5);
        for value in sma.iter().skip(4) {
            assert!(approx(value.unwrap(), 42.0));
        }
    }

    #[test]
    fn sma_of_flat_stretch_after_a_ramp_is_exact() {
        let mut prices: Vec<f64> = (0..10).map(|i| 11.0 + i as f64 * 0.1).collect();
        prices.extend(vec![8.0; 10]);
        let sma = calculate_sma(&prices, 5);
        for value in sma.iter().skip(14) {
            assert_eq!(value.unwrap(), 8.0);
        }
    }

    #[test]
    fn ema_is_seeded_with_sma() {
        let prices = [2.0, 4.0, 6.0, 8.0];
        let ema = calculate_ema(&prices, 3);

        assert_eq!(ema[2], None);
        // seed = 4, multiplier = 0.5
        assert!(approx(ema[3].unwrap(), 6.0));
    }

    #[test]
    fn rsi_stays_in_bounds_and_needs_enough_data() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.iter().take(15).all(|v| v.is_none()));
        for value in rsi.iter().flatten() {
            assert!((0.0..=100.0).contains(value));
        }

        let short = calculate_rsi(&prices[..14], 14);
        assert!(short.iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_of_rising_series_is_maximal() {
        let prices: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        let rsi = calculate_rsi(&prices, 14);
        assert!(approx(rsi[29].unwrap(), 100.0));
    }

    #[test]
    fn atr_averages_true_range_from_second_bar() {
        let highs = [11.0, 12.0, 13.0, 14.0];
        let lows = [9.0, 10.0, 11.0, 12.0];
        let closes = [10.0, 11.0, 12.0, 13.0];
        let atr = calculate_atr(&highs, &lows, &closes, 2);

        assert_eq!(atr[1], None);
        assert!(approx(atr[2].unwrap(), 2.0));
    }

    #[test]
    fn adx_is_defined_after_two_smoothing_windows() {
        let n = 40;
        let highs: Vec<f64> = (0..n).map(|i| 10.0 + i as f64).collect();
        let lows: Vec<f64> = highs.iter().map(|h| h - 2.0).collect();
        let closes: Vec<f64> = highs.iter().map(|h| h - 1.0).collect();
        let output = calculate_adx(&highs, &lows, &closes, 5);

        assert!(output.adx.iter().take(11).all(|v| v.is_none()));
        assert!(output.adx[11].is_some());
        // pure uptrend: +DI dominates
        assert!(output.pdi[20].unwrap() > output.ndi[20].unwrap());
        assert!(approx(output.adx[20].unwrap(), 100.0));
    }

    #[test]
    fn rolling_max_tracks_window() {
        let values = [1.0, 3.0, 2.0, 1.0, 0.5, 4.0];
        assert_eq!(rolling_max(&values, 3), vec![1.0, 3.0, 3.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn swing_pivots_alternate_and_realize_next_day() {
        let prices = [5.0, 4.0, 3.0, 4.0, 5.0, 6.0, 5.0, 4.0, 3.0, 4.0, 5.0];
        let pivots = swing_pivots(&prices, 2);

        for pair in pivots.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
            assert!(pair[0].index < pair[1].index);
        }
        let low = pivots.iter().find(|p| p.index == 2).unwrap();
        assert_eq!(low.kind, PivotKind::Low);
        assert_eq!(low.realized, 4);
        let high = pivots.iter().find(|p| p.index == 5).unwrap();
        assert_eq!(high.kind, PivotKind::High);

        let realized = realized_pivots(&pivots, prices.len());
        assert_eq!(realized.len(), prices.len());
        let position = pivots.iter().position(|p| p.index == 2).unwrap();
        assert_eq!(realized[5], Some(position));
    }

    #[test]
    fn normalizers_rescale() {
        let clamped = Normalizer::ClampRange.apply(&[2.0, 4.0, 6.0]);
        assert_eq!(clamped, vec![0.0, 0.5, 1.0]);

        let z = Normalizer::ZScore.apply(&[1.0, 3.0]);
        assert!(approx(z[0], -1.0) && approx(z[1], 1.0));

        assert_eq!(Normalizer::Percent.apply(&[50.0]), vec![0.5]);
        assert_eq!(Normalizer::ClampRange.apply(&[7.0]), vec![7.0]);
    }
}
