use chrono::{DateTime, Utc};

/// One coin's market state at one collection instant (PostgreSQL).
///
/// Unique Key: (coin_id, collected_at)
/// Query Patterns:
///   - "Latest rows across all coins"
///   - "History of coin X over the last N days"
///   - "Most recent row per coin, ranked by market cap"
///
/// Rows are immutable once written and only leave the table through
/// retention pruning.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MarketSnapshot {
    // Identity
    pub coin_id: String,
    pub symbol: String,
    pub name: String,

    // Pricing
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<i32>,
    pub total_volume: Option<f64>,

    // 24h window
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,

    // Supply (None for uncapped coins, never zero-filled)
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,

    // Extremes
    pub ath: Option<f64>,
    pub ath_date: Option<DateTime<Utc>>,
    pub atl: Option<f64>,
    pub atl_date: Option<DateTime<Utc>>,

    // Derived metrics (NaN when a denominator was zero)
    pub volatility_24h: Option<f64>,
    pub distance_from_ath: Option<f64>,
    pub distance_from_atl: Option<f64>,
    pub volume_to_mcap_ratio: Option<f64>,

    // Provenance
    pub last_updated: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Constructor for just the identity columns; every metric starts absent
    pub fn new(
        coin_id: String,
        symbol: String,
        name: String,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            coin_id,
            symbol,
            name,
            current_price: None,
            market_cap: None,
            market_cap_rank: None,
            total_volume: None,
            high_24h: None,
            low_24h: None,
            price_change_24h: None,
            price_change_percentage_24h: None,
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
            ath: None,
            ath_date: None,
            atl: None,
            atl_date: None,
            volatility_24h: None,
            distance_from_ath: None,
            distance_from_atl: None,
            volume_to_mcap_ratio: None,
            last_updated: None,
            collected_at,
        }
    }
}
