//! Data contract applied to every derived batch before it may be stored.
//!
//! Rules:
//! - `coin_id`, `symbol`, `name` present and non-blank
//! - `current_price`, `market_cap`, `total_volume` null or a finite value >= 0
//! - `collected_at` present and a valid timestamp
//!
//! Extra columns are allowed. Validation is all-or-nothing: every violation in
//! the batch is collected, and a batch with any violation yields no rows.

use std::fmt;

use crate::db::models::MarketSnapshot;
use crate::error::SchemaViolation;
use crate::pipeline::features::{DerivedBatch, SnapshotDraft};

pub const REQUIRED_COLUMNS: [&str; 4] = ["coin_id", "symbol", "name", "collected_at"];

pub const NON_NEGATIVE_COLUMNS: [&str; 3] = ["current_price", "market_cap", "total_volume"];

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    /// Structural: no record in the batch carries this column
    MissingColumn,
    Null,
    Blank,
    Negative(f64),
    NotFinite,
    InvalidTimestamp,
}

/// One failed check. `row` is `None` for column-level (structural) failures.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: Option<usize>,
    pub field: &'static str,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn is_structural(&self) -> bool {
        self.kind == ViolationKind::MissingColumn
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match &self.kind {
            ViolationKind::MissingColumn => "required column missing".to_string(),
            ViolationKind::Null => "required value is null".to_string(),
            ViolationKind::Blank => "required value is blank".to_string(),
            ViolationKind::Negative(v) => format!("must be >= 0, got {}", v),
            ViolationKind::NotFinite => "must be a finite number".to_string(),
            ViolationKind::InvalidTimestamp => "missing or invalid timestamp".to_string(),
        };
        match self.row {
            Some(row) => write!(f, "row {} `{}`: {}", row, self.field, reason),
            None => write!(f, "`{}`: {}", self.field, reason),
        }
    }
}

/// Outcome of checking a batch against the contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Vec<MarketSnapshot>),
    Invalid(Vec<Violation>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    pub fn into_result(self) -> Result<Vec<MarketSnapshot>, SchemaViolation> {
        match self {
            Validation::Valid(rows) => Ok(rows),
            Validation::Invalid(violations) => Err(SchemaViolation { violations }),
        }
    }
}

/// Checks a derived batch. An empty batch is trivially valid.
pub fn validate(batch: DerivedBatch) -> Validation {
    if batch.rows.is_empty() {
        return Validation::Valid(Vec::new());
    }

    let mut violations: Vec<Violation> = REQUIRED_COLUMNS
        .into_iter()
        .filter(|col| !batch.columns.contains(col))
        .map(|col| Violation {
            row: None,
            field: col,
            kind: ViolationKind::MissingColumn,
        })
        .collect();

    // Row checks skip columns already reported as structurally missing
    let present = |col: &str| batch.columns.contains(col);

    for (idx, draft) in batch.rows.iter().enumerate() {
        check_row(idx, draft, &present, &mut violations);
    }

    if !violations.is_empty() {
        return Validation::Invalid(violations);
    }

    let rows: Vec<MarketSnapshot> = batch
        .rows
        .into_iter()
        .filter_map(SnapshotDraft::into_snapshot)
        .collect();

    Validation::Valid(rows)
}

fn check_row(
    idx: usize,
    draft: &SnapshotDraft,
    present: &dyn Fn(&str) -> bool,
    violations: &mut Vec<Violation>,
) {
    let mut push = |field: &'static str, kind: ViolationKind| {
        violations.push(Violation {
            row: Some(idx),
            field,
            kind,
        })
    };

    let identity = [
        ("coin_id", &draft.coin_id),
        ("symbol", &draft.symbol),
        ("name", &draft.name),
    ];
    for (field, value) in identity {
        if !present(field) {
            continue;
        }
        match value {
            None => push(field, ViolationKind::Null),
            Some(s) if s.trim().is_empty() => push(field, ViolationKind::Blank),
            Some(_) => {},
        }
    }

    let amounts = [
        ("current_price", draft.current_price),
        ("market_cap", draft.market_cap),
        ("total_volume", draft.total_volume),
    ];
    for (field, value) in amounts {
        match value {
            Some(v) if !v.is_finite() => push(field, ViolationKind::NotFinite),
            Some(v) if v < 0.0 => push(field, ViolationKind::Negative(v)),
            _ => {},
        }
    }

    if present("collected_at") && draft.collected_at.is_none() {
        push("collected_at", ViolationKind::InvalidTimestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::features::{derive_batch, RawRecord};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::collections::BTreeSet;

    fn records(values: Value) -> Vec<RawRecord> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn derive(values: Value) -> DerivedBatch {
        derive_batch(
            &records(values),
            Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_valid_batch_passes() {
        let batch = derive(json!([{
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 50000.0,
            "market_cap": 1000.0,
            "total_volume": 500.0,
            "some_future_field": {"nested": true},
        }]));

        match validate(batch) {
            Validation::Valid(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].coin_id, "bitcoin");
                assert_eq!(rows[0].symbol, "BTC");
            },
            Validation::Invalid(v) => panic!("unexpected violations: {:?}", v),
        }
    }

    #[test]
    fn test_negative_price_rejected_with_row_and_field() {
        let batch = derive(json!([
            { "id": "good", "symbol": "g", "name": "Good", "current_price": 1.0 },
            { "id": "bad", "symbol": "b", "name": "Bad", "current_price": -100.0 },
        ]));

        let violations = match validate(batch) {
            Validation::Invalid(v) => v,
            Validation::Valid(_) => panic!("negative price must be rejected"),
        };

        assert_eq!(
            violations,
            vec![Violation {
                row: Some(1),
                field: "current_price",
                kind: ViolationKind::Negative(-100.0),
            }]
        );
    }

    #[test]
    fn test_missing_symbol_and_name_columns_are_structural() {
        let batch = derive(json!([{ "id": "bitcoin", "current_price": 50000.0 }]));

        let violations = validate(batch).into_result().unwrap_err().violations;

        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(Violation::is_structural));
        let fields: Vec<&str> = violations.iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["symbol", "name"]);
    }

    #[test]
    fn test_all_violations_collected() {
        let batch = derive(json!([
            { "id": "a", "symbol": "a", "name": null, "market_cap": -1.0 },
            { "id": "b", "symbol": "  ", "name": "B", "total_volume": -2.0 },
            { "id": "c", "symbol": "c", "name": "C" },
        ]));

        let violations = validate(batch).into_result().unwrap_err().violations;

        assert_eq!(violations.len(), 4);
        assert!(violations.contains(&Violation {
            row: Some(0),
            field: "name",
            kind: ViolationKind::Null,
        }));
        assert!(violations.contains(&Violation {
            row: Some(0),
            field: "market_cap",
            kind: ViolationKind::Negative(-1.0),
        }));
        assert!(violations.contains(&Violation {
            row: Some(1),
            field: "symbol",
            kind: ViolationKind::Blank,
        }));
        assert!(violations.iter().all(|v| v.row != Some(2)));
    }

    #[test]
    fn test_null_amounts_are_allowed() {
        let batch = derive(json!([{
            "id": "tiny",
            "symbol": "tny",
            "name": "Tiny",
            "current_price": null,
            "market_cap": null,
        }]));

        assert!(validate(batch).is_valid());
    }

    #[test]
    fn test_missing_collected_at_is_invalid_timestamp() {
        let draft = SnapshotDraft {
            coin_id: Some("bitcoin".into()),
            symbol: Some("BTC".into()),
            name: Some("Bitcoin".into()),
            ..Default::default()
        };
        let columns = BTreeSet::from(REQUIRED_COLUMNS);
        let violations = validate(DerivedBatch::new(columns, vec![draft]))
            .into_result()
            .unwrap_err()
            .violations;

        assert_eq!(violations[0].field, "collected_at");
        assert_eq!(violations[0].kind, ViolationKind::InvalidTimestamp);
    }

    #[test]
    fn test_non_finite_amount_rejected() {
        let draft = SnapshotDraft {
            coin_id: Some("x".into()),
            symbol: Some("X".into()),
            name: Some("X".into()),
            total_volume: Some(f64::INFINITY),
            collected_at: Some(Utc::now()),
            ..Default::default()
        };
        let columns = BTreeSet::from(REQUIRED_COLUMNS);
        let validation = validate(DerivedBatch::new(columns, vec![draft]));

        assert!(!validation.is_valid());
    }

    #[test]
    fn test_empty_batch_is_valid() {
        assert_eq!(validate(DerivedBatch::default()), Validation::Valid(vec![]));
    }

    #[test]
    fn test_schema_violation_message_lists_offenders() {
        let batch = derive(json!([{ "id": "x", "symbol": "x", "name": "X", "current_price": -5.0 }]));
        let err = validate(batch).into_result().unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("1 violation"));
        assert!(msg.contains("row 0 `current_price`"));
    }
}
