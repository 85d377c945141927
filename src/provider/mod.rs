//! Upstream market data capability.
//!
//! The orchestrator only sees [`MarketDataProvider`]; transport details stay in
//! the concrete clients.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::pipeline::{merge_series, HistoricalPoint, RawRecord, SeriesPoint};

mod coingecko;

pub use coingecko::CoinGeckoClient;

/// The three independently paginated series of a historical range response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalSeries {
    pub prices: Vec<SeriesPoint>,
    pub market_caps: Vec<SeriesPoint>,
    pub total_volumes: Vec<SeriesPoint>,
}

impl HistoricalSeries {
    /// Price timestamps decide which instants exist
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn merge(&self) -> Vec<HistoricalPoint> {
        merge_series(&self.prices, &self.market_caps, &self.total_volumes)
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One page of the top `limit` coins by market cap, as raw records
    async fn fetch_top_markets(
        &self,
        limit: u32,
        vs_currency: &str,
    ) -> Result<Vec<RawRecord>, ProviderError>;

    /// Price, market cap and volume series for one coin over `[from, to]`
    async fn fetch_historical_range(
        &self,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        vs_currency: &str,
    ) -> Result<HistoricalSeries, ProviderError>;
}
