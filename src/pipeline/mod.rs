//! Pure transformation stages between the provider and the store.
//!
//! - [`features`] - raw records into typed drafts with derived metrics
//! - [`contract`] - data contract check producing storable rows
//! - [`merge`] - exact-timestamp merge of historical series
//! - [`ohlc`] - daily OHLCV resampling and moving averages

pub mod contract;
pub mod features;
pub mod merge;
pub mod ohlc;

pub use contract::{validate, Validation, Violation, ViolationKind};
pub use features::{
    apply_derived_metrics, derive_batch, derive_history, DerivedBatch, RawRecord, SnapshotDraft,
};
pub use merge::{merge_series, HistoricalPoint, SeriesPoint};
pub use ohlc::{resample_daily, simple_moving_average};
