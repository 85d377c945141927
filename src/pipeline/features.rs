//! Feature derivation: raw provider records into typed, enriched draft rows.
//!
//! The deriver never fills absent values with defaults. A field missing from
//! the source (or unparseable) stays `None`, and a derived metric is only
//! computed when every one of its inputs is present. A zero denominator yields
//! `NaN` rather than an error.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::db::models::MarketSnapshot;
use crate::pipeline::merge::HistoricalPoint;
use crate::utils::{
    millis_to_datetime, parse_timestamp, value_to_f64, value_to_i32, value_to_string,
};

/// One record as returned by the provider: a JSON object with arbitrary keys.
pub type RawRecord = serde_json::Map<String, Value>;

/// Numeric source columns copied verbatim (after coercion).
const NUMERIC_COLUMNS: [&str; 12] = [
    "current_price",
    "market_cap",
    "total_volume",
    "high_24h",
    "low_24h",
    "price_change_24h",
    "price_change_percentage_24h",
    "circulating_supply",
    "total_supply",
    "max_supply",
    "ath",
    "atl",
];

const DATE_COLUMNS: [&str; 3] = ["ath_date", "atl_date", "last_updated"];

/// Derived metrics and the source columns each one needs.
const DERIVED_COLUMNS: [(&str, &[&str]); 4] = [
    ("volatility_24h", &["high_24h", "low_24h", "current_price"]),
    ("distance_from_ath", &["current_price", "ath"]),
    ("distance_from_atl", &["current_price", "atl"]),
    ("volume_to_mcap_ratio", &["total_volume", "market_cap"]),
];

/// A row that has been derived but not yet checked against the data contract.
///
/// Required identity fields are optional here so the contract can report
/// exactly which rows lack them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDraft {
    pub coin_id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,

    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<i32>,
    pub total_volume: Option<f64>,

    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,

    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,

    pub ath: Option<f64>,
    pub ath_date: Option<DateTime<Utc>>,
    pub atl: Option<f64>,
    pub atl_date: Option<DateTime<Utc>>,

    pub volatility_24h: Option<f64>,
    pub distance_from_ath: Option<f64>,
    pub distance_from_atl: Option<f64>,
    pub volume_to_mcap_ratio: Option<f64>,

    pub last_updated: Option<DateTime<Utc>>,
    pub collected_at: Option<DateTime<Utc>>,
}

impl SnapshotDraft {
    /// Converts into a storable row. Returns `None` if any required field is absent.
    pub fn into_snapshot(self) -> Option<MarketSnapshot> {
        let (Some(coin_id), Some(symbol), Some(name), Some(collected_at)) =
            (self.coin_id, self.symbol, self.name, self.collected_at)
        else {
            return None;
        };

        Some(MarketSnapshot {
            coin_id,
            symbol,
            name,
            current_price: self.current_price,
            market_cap: self.market_cap,
            market_cap_rank: self.market_cap_rank,
            total_volume: self.total_volume,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            price_change_24h: self.price_change_24h,
            price_change_percentage_24h: self.price_change_percentage_24h,
            circulating_supply: self.circulating_supply,
            total_supply: self.total_supply,
            max_supply: self.max_supply,
            ath: self.ath,
            ath_date: self.ath_date,
            atl: self.atl,
            atl_date: self.atl_date,
            volatility_24h: self.volatility_24h,
            distance_from_ath: self.distance_from_ath,
            distance_from_atl: self.distance_from_atl,
            volume_to_mcap_ratio: self.volume_to_mcap_ratio,
            last_updated: self.last_updated,
            collected_at,
        })
    }
}

/// A derived table: rows plus the set of columns the table carries.
///
/// A column is present when at least one source record supplied it (or, for
/// derived metrics, when all of its input columns are present). The contract
/// uses this to tell a structurally missing column apart from null values.
#[derive(Debug, Clone, Default)]
pub struct DerivedBatch {
    pub columns: BTreeSet<&'static str>,
    pub rows: Vec<SnapshotDraft>,
}

impl DerivedBatch {
    pub fn new(columns: BTreeSet<&'static str>, rows: Vec<SnapshotDraft>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds every derived column whose inputs are all present.
    fn add_derived_columns(&mut self) {
        for (derived, inputs) in DERIVED_COLUMNS {
            if inputs.iter().all(|c| self.columns.contains(c)) {
                self.columns.insert(derived);
            }
        }
    }
}

/// Derives a batch from raw provider records.
///
/// `collected_at` is stamped on every row (truncated to microseconds, the
/// resolution the store keeps) and never read from the payload.
pub fn derive_batch(raw: &[RawRecord], collected_at: DateTime<Utc>) -> DerivedBatch {
    let collected_at = collected_at.trunc_subsecs(6);
    let mut columns = BTreeSet::from(["collected_at"]);

    let rows = raw
        .iter()
        .map(|record| {
            note_columns(record, &mut columns);
            derive_record(record, collected_at)
        })
        .collect();

    let mut batch = DerivedBatch::new(columns, rows);
    batch.add_derived_columns();
    batch
}

/// Derives a batch from one coin's merged history.
///
/// Each point becomes a row collected at the point's own timestamp. Symbol and
/// name are back-filled from `identity`, the coin's record in the reference
/// list, since history payloads carry neither.
pub fn derive_history(identity: &RawRecord, points: &[HistoricalPoint]) -> DerivedBatch {
    let mut columns = BTreeSet::from(["collected_at", "current_price", "market_cap", "total_volume"]);
    note_identity_columns(identity, &mut columns);

    let template = identity_draft(identity);
    let rows = points
        .iter()
        .map(|point| {
            let mut draft = SnapshotDraft {
                current_price: point.price,
                market_cap: point.market_cap,
                total_volume: point.volume,
                collected_at: millis_to_datetime(point.timestamp_ms).map(|ts| ts.trunc_subsecs(6)),
                ..template.clone()
            };
            apply_derived_metrics(&mut draft);
            draft
        })
        .collect();

    let mut batch = DerivedBatch::new(columns, rows);
    batch.add_derived_columns();
    batch
}

fn note_identity_columns(record: &RawRecord, columns: &mut BTreeSet<&'static str>) {
    if record.contains_key("id") || record.contains_key("coin_id") {
        columns.insert("coin_id");
    }
    for col in ["symbol", "name"] {
        if record.contains_key(col) {
            columns.insert(col);
        }
    }
}

fn identity_draft(record: &RawRecord) -> SnapshotDraft {
    SnapshotDraft {
        coin_id: record
            .get("id")
            .or_else(|| record.get("coin_id"))
            .and_then(value_to_string),
        symbol: record
            .get("symbol")
            .and_then(value_to_string)
            .map(|s| s.to_uppercase()),
        name: record.get("name").and_then(value_to_string),
        ..Default::default()
    }
}

fn note_columns(record: &RawRecord, columns: &mut BTreeSet<&'static str>) {
    note_identity_columns(record, columns);
    for col in ["market_cap_rank"]
        .into_iter()
        .chain(NUMERIC_COLUMNS)
        .chain(DATE_COLUMNS)
    {
        if record.contains_key(col) {
            columns.insert(col);
        }
    }
}

fn derive_record(record: &RawRecord, collected_at: DateTime<Utc>) -> SnapshotDraft {
    let num = |key: &str| record.get(key).and_then(value_to_f64);
    let date = |key: &str| record.get(key).and_then(parse_timestamp);

    let mut draft = SnapshotDraft {
        current_price: num("current_price"),
        market_cap: num("market_cap"),
        market_cap_rank: record.get("market_cap_rank").and_then(value_to_i32),
        total_volume: num("total_volume"),
        high_24h: num("high_24h"),
        low_24h: num("low_24h"),
        price_change_24h: num("price_change_24h"),
        price_change_percentage_24h: num("price_change_percentage_24h"),
        circulating_supply: num("circulating_supply"),
        total_supply: num("total_supply"),
        max_supply: num("max_supply"),
        ath: num("ath"),
        ath_date: date("ath_date"),
        atl: num("atl"),
        atl_date: date("atl_date"),
        last_updated: date("last_updated"),
        collected_at: Some(collected_at),
        ..identity_draft(record)
    };

    apply_derived_metrics(&mut draft);
    draft
}

/// Fills the derived metric fields from whatever inputs the draft carries.
pub fn apply_derived_metrics(draft: &mut SnapshotDraft) {
    draft.volatility_24h = match (draft.high_24h, draft.low_24h, draft.current_price) {
        (Some(high), Some(low), Some(price)) => Some(percent_of(high - low, price)),
        _ => None,
    };

    draft.distance_from_ath = match (draft.current_price, draft.ath) {
        (Some(price), Some(ath)) => Some(percent_of(price - ath, ath)),
        _ => None,
    };

    draft.distance_from_atl = match (draft.current_price, draft.atl) {
        (Some(price), Some(atl)) => Some(percent_of(price - atl, atl)),
        _ => None,
    };

    draft.volume_to_mcap_ratio = match (draft.total_volume, draft.market_cap) {
        (Some(volume), Some(mcap)) => Some(ratio(volume, mcap)),
        _ => None,
    };
}

#[inline]
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        f64::NAN
    } else {
        numerator / denominator
    }
}

#[inline]
fn percent_of(numerator: f64, denominator: f64) -> f64 {
    ratio(numerator, denominator) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
    }

    fn bitcoin() -> RawRecord {
        record(json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 50000.0,
            "market_cap": 1_000_000_000.0,
            "market_cap_rank": 1,
            "total_volume": 50_000_000.0,
            "high_24h": 51000.0,
            "low_24h": 49000.0,
            "price_change_24h": 1000.0,
            "price_change_percentage_24h": 2.0,
            "circulating_supply": 19_000_000.0,
            "total_supply": 21_000_000.0,
            "max_supply": 21_000_000.0,
            "ath": 100000.0,
            "ath_date": "2021-11-10T14:24:11.849Z",
            "atl": 67.81,
            "atl_date": "2013-07-06T00:00:00.000Z",
            "last_updated": "2024-01-31T12:00:00.000Z",
        }))
    }

    #[test]
    fn test_volatility_and_distance_from_ath() {
        let batch = derive_batch(&[bitcoin()], now());
        let row = &batch.rows[0];

        assert!((row.volatility_24h.unwrap() - 4.0).abs() < 1e-9);
        assert!((row.distance_from_ath.unwrap() + 50.0).abs() < 1e-9);
        assert!((row.volume_to_mcap_ratio.unwrap() - 0.05).abs() < 1e-12);
        let expected_atl = (50000.0 - 67.81) / 67.81 * 100.0;
        assert!((row.distance_from_atl.unwrap() - expected_atl).abs() < 1e-9);
    }

    #[test]
    fn test_identity_is_normalized() {
        let batch = derive_batch(&[bitcoin()], now());
        let row = &batch.rows[0];

        assert_eq!(row.coin_id.as_deref(), Some("bitcoin"));
        assert_eq!(row.symbol.as_deref(), Some("BTC"));
        assert_eq!(row.name.as_deref(), Some("Bitcoin"));
        assert_eq!(row.market_cap_rank, Some(1));
        assert_eq!(row.collected_at, Some(now()));
    }

    #[test]
    fn test_dates_parse_and_bad_dates_become_missing() {
        let mut raw = bitcoin();
        raw.insert("atl_date".into(), json!("not a date"));
        let batch = derive_batch(&[raw], now());
        let row = &batch.rows[0];

        assert_eq!(
            row.ath_date,
            Some(Utc.with_ymd_and_hms(2021, 11, 10, 14, 24, 11).unwrap()
                + chrono::Duration::milliseconds(849))
        );
        assert_eq!(row.atl_date, None);
    }

    #[test]
    fn test_absent_max_supply_stays_absent() {
        let mut raw = bitcoin();
        raw.insert("max_supply".into(), Value::Null);
        raw.remove("total_supply");
        let batch = derive_batch(&[raw], now());

        assert_eq!(batch.rows[0].max_supply, None);
        assert_eq!(batch.rows[0].total_supply, None);
    }

    #[test]
    fn test_derived_metric_needs_all_inputs() {
        let raw = record(json!({
            "id": "newcoin",
            "symbol": "new",
            "name": "New Coin",
            "current_price": 2.0,
            "total_volume": 10.0,
            "market_cap": null,
        }));
        let batch = derive_batch(&[raw], now());
        let row = &batch.rows[0];

        assert_eq!(row.volatility_24h, None);
        assert_eq!(row.distance_from_ath, None);
        assert_eq!(row.volume_to_mcap_ratio, None);
        assert!(batch.columns.contains("volume_to_mcap_ratio"));
        assert!(!batch.columns.contains("volatility_24h"));
    }

    #[test]
    fn test_zero_denominator_yields_nan() {
        let raw = record(json!({
            "id": "dead",
            "symbol": "dead",
            "name": "Dead Coin",
            "current_price": 0.0,
            "high_24h": 1.0,
            "low_24h": 0.0,
            "total_volume": 5.0,
            "market_cap": 0.0,
            "ath": 0.0,
        }));
        let batch = derive_batch(&[raw], now());
        let row = &batch.rows[0];

        assert!(row.volatility_24h.unwrap().is_nan());
        assert!(row.volume_to_mcap_ratio.unwrap().is_nan());
        assert!(row.distance_from_ath.unwrap().is_nan());
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let raw = record(json!({
            "id": "stringy",
            "symbol": "str",
            "name": "Stringy",
            "current_price": "12.5",
            "market_cap": "lots",
        }));
        let batch = derive_batch(&[raw], now());

        assert_eq!(batch.rows[0].current_price, Some(12.5));
        assert_eq!(batch.rows[0].market_cap, None);
    }

    #[test]
    fn test_columns_track_source_keys() {
        let raw = record(json!({ "id": "x", "current_price": 1.0 }));
        let batch = derive_batch(&[raw], now());

        assert!(batch.columns.contains("coin_id"));
        assert!(batch.columns.contains("collected_at"));
        assert!(!batch.columns.contains("symbol"));
        assert!(!batch.columns.contains("name"));
    }

    #[test]
    fn test_collected_at_truncated_to_micros() {
        let ts = now() + chrono::Duration::nanoseconds(1_234_567);
        let batch = derive_batch(&[bitcoin()], ts);

        assert_eq!(
            batch.rows[0].collected_at,
            Some(now() + chrono::Duration::microseconds(1_234))
        );
    }

    #[test]
    fn test_history_backfills_identity_and_uses_point_time() {
        let identity = record(json!({ "id": "ethereum", "symbol": "eth", "name": "Ethereum" }));
        let points = [
            HistoricalPoint {
                timestamp_ms: 1_704_067_200_000,
                price: Some(2000.0),
                market_cap: Some(2.4e11),
                volume: None,
            },
            HistoricalPoint {
                timestamp_ms: 1_704_070_800_000,
                price: Some(2010.0),
                market_cap: Some(2.5e11),
                volume: Some(5.0e9),
            },
        ];
        let batch = derive_history(&identity, &points);

        assert_eq!(batch.len(), 2);
        assert!(batch.columns.contains("symbol"));
        assert!(batch.columns.contains("volume_to_mcap_ratio"));

        let first = &batch.rows[0];
        assert_eq!(first.coin_id.as_deref(), Some("ethereum"));
        assert_eq!(first.symbol.as_deref(), Some("ETH"));
        assert_eq!(first.name.as_deref(), Some("Ethereum"));
        assert_eq!(first.collected_at, Utc.timestamp_millis_opt(1_704_067_200_000).single());
        assert_eq!(first.volume_to_mcap_ratio, None);
        assert_eq!(batch.rows[1].volume_to_mcap_ratio, Some(0.02));
    }
}
