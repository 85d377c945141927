//! Daily OHLCV resampling and simple moving averages for charting.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::db::models::{DailyBar, MarketSnapshot};

pub const SMA_SHORT: usize = 50;
pub const SMA_LONG: usize = 200;

#[derive(Default)]
struct DayBucket {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl DayBucket {
    fn observe(&mut self, price: Option<f64>, volume: Option<f64>) {
        if let Some(p) = price {
            self.open.get_or_insert(p);
            self.high = Some(self.high.map_or(p, |h| h.max(p)));
            self.low = Some(self.low.map_or(p, |l| l.min(p)));
            self.close = Some(p);
        }
        if let Some(v) = volume {
            self.volume = Some(self.volume.map_or(v, |m| m.max(v)));
        }
    }
}

/// Resamples snapshots into one bar per UTC calendar day.
///
/// Per day: open = first price, high = max, low = min, close = last price,
/// volume = max observed total volume. Every day between the first and last
/// observation gets a bar; a day with no price carries the previous close in
/// all four price fields, and volume is carried forward the same way.
/// Moving averages run over the filled closes.
pub fn resample_daily(rows: &[MarketSnapshot]) -> Vec<DailyBar> {
    let mut ordered: Vec<&MarketSnapshot> = rows.iter().collect();
    ordered.sort_by_key(|r| r.collected_at);

    let mut buckets: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    for row in &ordered {
        buckets
            .entry(row.collected_at.date_naive())
            .or_default()
            .observe(row.current_price, row.total_volume);
    }

    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };

    let mut bars = Vec::new();
    let mut prev_close: Option<f64> = None;
    let mut prev_volume: Option<f64> = None;

    for date in first.iter_days().take_while(|d| *d <= last) {
        let bucket = buckets.remove(&date).unwrap_or_default();

        let mut bar = if bucket.close.is_some() {
            DailyBar {
                date,
                open: bucket.open,
                high: bucket.high,
                low: bucket.low,
                close: bucket.close,
                volume: bucket.volume,
                sma_50: None,
                sma_200: None,
            }
        } else {
            DailyBar {
                date,
                open: prev_close,
                high: prev_close,
                low: prev_close,
                close: prev_close,
                volume: bucket.volume,
                sma_50: None,
                sma_200: None,
            }
        };
        if bar.volume.is_none() {
            bar.volume = prev_volume;
        }

        prev_close = bar.close;
        prev_volume = bar.volume;
        bars.push(bar);
    }

    let closes: Vec<Option<f64>> = bars.iter().map(|b| b.close).collect();
    let short = simple_moving_average(&closes, SMA_SHORT);
    let long = simple_moving_average(&closes, SMA_LONG);

    for ((bar, s), l) in bars.iter_mut().zip(short).zip(long) {
        bar.sma_50 = s;
        bar.sma_200 = l;
    }

    bars
}

/// Mean of each trailing window of `period` values, summed per window.
///
/// The first `period - 1` outputs are `None`, as is any window that contains
/// a missing value.
pub fn simple_moving_average(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return result;
    }

    for (i, window) in values.windows(period).enumerate() {
        let sum: Option<f64> = window.iter().copied().sum();
        result[i + period - 1] = sum.map(|s| s / period as f64);
    }

    result
}
