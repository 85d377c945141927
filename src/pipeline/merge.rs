//! Exact-timestamp merge of the three historical series a provider returns
//! for one coin (price, market cap, volume).
//!
//! The series are paginated independently upstream and need not share a
//! timestamp set. The price series defines the instants; market cap and volume
//! are joined onto those on identical timestamps only, and leave the field
//! `None` where they have no point.

use std::collections::BTreeMap;

/// `(unix milliseconds, value)`
pub type SeriesPoint = (i64, f64);

/// One instant of a coin's history after merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalPoint {
    pub timestamp_ms: i64,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
}

impl HistoricalPoint {
    fn priced(timestamp_ms: i64, price: f64) -> Self {
        Self {
            timestamp_ms,
            price: Some(price),
            market_cap: None,
            volume: None,
        }
    }
}

/// Merges the three series into one record per price timestamp, ascending.
///
/// Market-cap and volume points at instants with no price are dropped, so a
/// range without price points yields nothing. When a series repeats a
/// timestamp, its last value wins.
pub fn merge_series(
    prices: &[SeriesPoint],
    market_caps: &[SeriesPoint],
    volumes: &[SeriesPoint],
) -> Vec<HistoricalPoint> {
    if prices.is_empty() {
        return Vec::new();
    }

    let mut merged: BTreeMap<i64, HistoricalPoint> = BTreeMap::new();

    for &(ts, price) in prices {
        merged.insert(ts, HistoricalPoint::priced(ts, price));
    }
    for &(ts, mcap) in market_caps {
        if let Some(point) = merged.get_mut(&ts) {
            point.market_cap = Some(mcap);
        }
    }
    for &(ts, volume) in volumes {
        if let Some(point) = merged.get_mut(&ts) {
            point.volume = Some(volume);
        }
    }

    merged.into_values().collect()
}
