use crate::models::Bar;

pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    let high_low = bar.high - bar.low;
    match prev_close {
        Some(prev) => high_low
            .max((bar.high - prev).abs())
            .max((bar.low - prev).abs()),
        None => high_low,
    }
}

/// Wilder ATR aligned to bar indices.
///
/// The first defined value sits at index `period` and is the mean of the true
/// ranges of bars `1..=period`; later values use Wilder smoothing. Indices with
/// fewer than `period` prior bars are `None`.
pub fn compute_atr_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut atr = vec![None; n];
    if period == 0 || n == 0 {
        return atr;
    }

    let mut tr_sum = 0.0f64;
    let mut prev_close = bars[0].close;
    for i in 1..n {
        let tr = true_range(&bars[i], Some(prev_close));

        if i <= period {
            tr_sum += tr;
            if i == period {
                atr[i] = Some(tr_sum / period as f64);
            }
        } else if let Some(prev_atr) = atr[i - 1] {
            atr[i] = Some(((prev_atr * (period as f64 - 1.0)) + tr) / period as f64);
        }
        prev_close = bars[i].close;
    }

    atr
}

/// Recomputes the Wilder ATR at `index` from the start of the series.
pub fn atr_at(bars: &[Bar], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= bars.len() || index < period {
        return None;
    }

    let seed: f64 = (1..=period)
        .map(|i| true_range(&bars[i], Some(bars[i - 1].close)))
        .sum::<f64>()
        / period as f64;

    let mut atr = seed;
    for i in period + 1..=index {
        let tr = true_range(&bars[i], Some(bars[i - 1].close));
        atr = ((atr * (period as f64 - 1.0)) + tr) / period as f64;
    }
    Some(atr)
}

/// Rolling simple moving average including the value at each index.
pub fn rolling_sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma_values = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    sma_values[period - 1] = Some(window_sum / period as f64);
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        sma_values[i] = Some(window_sum / period as f64);
    }

    sma_values
}

pub fn sma_at(values: &[f64], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= values.len() || index + 1 < period {
        return None;
    }
    let window = &values[index + 1 - period..=index];
    Some(window.iter().sum::<f64>() / period as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationRange {
    pub high: f64,
    pub low: f64,
}

/// Highest high and lowest low of the `lookback` bars strictly before `index`.
pub fn consolidation_range(
    bars: &[Bar],
    index: usize,
    lookback: usize,
) -> Option<ConsolidationRange> {
    if lookback == 0 || index > bars.len() || index < lookback {
        return None;
    }

    let window = &bars[index - lookback..index];
    let high = window
        .iter()
        .map(|bar| bar.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = window
        .iter()
        .map(|bar| bar.low)
        .fold(f64::INFINITY, f64::min);
    Some(ConsolidationRange { high, low })
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndicatorSnapshot {
    pub atr: Option<f64>,
    pub volume_ma: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn is_ready(&self) -> bool {
        self.atr.is_some() && self.volume_ma.is_some()
    }
}

/// Precomputed indicator columns for one bar series.
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    atr: Vec<Option<f64>>,
    volume_ma: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn compute(bars: &[Bar], atr_period: usize, volume_ma_period: usize) -> Self {
        let volumes = volume_column(bars);
        Self {
            atr: compute_atr_series(bars, atr_period),
            volume_ma: rolling_sma(&volumes, volume_ma_period),
        }
    }

    pub fn snapshot(&self, index: usize) -> IndicatorSnapshot {
        IndicatorSnapshot {
            atr: self.atr.get(index).copied().flatten(),
            volume_ma: self.volume_ma.get(index).copied().flatten(),
        }
    }
}

/// Builds the snapshot at `index` without any precomputed state.
pub fn snapshot_at(
    bars: &[Bar],
    index: usize,
    atr_period: usize,
    volume_ma_period: usize,
) -> IndicatorSnapshot {
    let volumes = volume_column(bars);
    IndicatorSnapshot {
        atr: atr_at(bars, index, atr_period),
        volume_ma: sma_at(&volumes, index, volume_ma_period),
    }
}

fn volume_column(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.volume as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(day: i64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar {
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
            open: close.clamp(low, high),
            high,
            low,
            close,
            volume,
        }
    }

    fn wavy_bars(count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let mid = 100.0 + ((i as f64) * 0.7).sin() * 5.0 + i as f64 * 0.1;
                let spread = 1.0 + (i % 4) as f64 * 0.5;
                bar(
                    i as i64,
                    mid + spread,
                    mid - spread,
                    mid + spread * 0.3,
                    1_000 + (i as u64 * 37) % 400,
                )
            })
            .collect()
    }

    #[test]
    fn true_range_uses_previous_close_gaps() {
        let b = bar(0, 105.0, 100.0, 104.0, 1);
        assert_eq!(true_range(&b, None), 5.0);
        assert_eq!(true_range(&b, Some(95.0)), 10.0);
        assert_eq!(true_range(&b, Some(112.0)), 12.0);
    }

    #[test]
    fn atr_is_undefined_before_period_and_seeded_with_mean() {
        let bars: Vec<Bar> = (0..6).map(|i| bar(i, 102.0, 98.0, 100.0, 1)).collect();
        let atr = compute_atr_series(&bars, 3);
        assert_eq!(&atr[..3], &[None, None, None]);
        assert!((atr[3].unwrap() - 4.0).abs() < 1e-12);
        assert!((atr[5].unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn atr_applies_wilder_smoothing() {
        let mut bars: Vec<Bar> = (0..4).map(|i| bar(i, 102.0, 98.0, 100.0, 1)).collect();
        bars.push(bar(4, 110.0, 100.0, 108.0, 1));
        let atr = compute_atr_series(&bars, 3);
        // (4 * 2 + 10) / 3
        assert!((atr[4].unwrap() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn incremental_series_match_from_scratch_recomputation() {
        let bars = wavy_bars(120);
        let series = IndicatorSeries::compute(&bars, 14, 20);
        for index in 0..bars.len() {
            let incremental = series.snapshot(index);
            let scratch = snapshot_at(&bars, index, 14, 20);
            assert_eq!(incremental.atr.is_some(), scratch.atr.is_some());
            assert_eq!(incremental.volume_ma.is_some(), scratch.volume_ma.is_some());
            if let (Some(a), Some(b)) = (incremental.atr, scratch.atr) {
                assert!((a - b).abs() < 1e-9, "atr mismatch at {}", index);
            }
            if let (Some(a), Some(b)) = (incremental.volume_ma, scratch.volume_ma) {
                assert!((a - b).abs() < 1e-6, "volume ma mismatch at {}", index);
            }
        }
    }

    #[test]
    fn rolling_sma_includes_current_value() {
        let sma = rolling_sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(sma, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
        assert!(rolling_sma(&[1.0], 2).iter().all(Option::is_none));
    }

    #[test]
    fn consolidation_range_excludes_current_bar() {
        let bars = vec![
            bar(0, 101.0, 99.0, 100.0, 1),
            bar(1, 103.0, 97.0, 100.0, 1),
            bar(2, 120.0, 90.0, 115.0, 1),
        ];
        assert_eq!(consolidation_range(&bars, 1, 2), None);
        let range = consolidation_range(&bars, 2, 2).unwrap();
        assert_eq!(range.high, 103.0);
        assert_eq!(range.low, 97.0);
    }

    #[test]
    fn snapshot_reports_readiness() {
        let bars = wavy_bars(30);
        let series = IndicatorSeries::compute(&bars, 14, 20);
        assert!(!series.snapshot(13).is_ready());
        assert!(!series.snapshot(18).is_ready());
        assert!(series.snapshot(19).is_ready());
        assert!(!series.snapshot(500).is_ready());
    }
}
