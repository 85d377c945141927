use chrono::{DateTime, Utc};

/// Table-wide summary returned by `statistics()`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SnapshotStatistics {
    pub total_rows: i64,
    pub distinct_coins: i64,
    pub first_collected_at: Option<DateTime<Utc>>,
    pub last_collected_at: Option<DateTime<Utc>>,
    /// Mean over rows with a known market cap
    pub avg_market_cap: Option<f64>,
}
