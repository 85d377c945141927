use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::pipeline::{RawRecord, SeriesPoint};
use crate::provider::{HistoricalSeries, MarketDataProvider};

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// `/coins/{id}/market_chart/range` payload. Each entry is `[unix_ms, value]`
/// and the value may be null.
#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    market_caps: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    total_volumes: Vec<(f64, Option<f64>)>,
}

/// REST client for CoinGecko-compatible APIs.
///
/// Never retries on its own. Rate limiting and failures are reported as
/// [`ProviderError`] so the caller can decide.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| ProviderError::Unavailable(format!("invalid api key header: {}", e)))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        // Validate once so endpoint building can't fail on the base
        Url::parse(&settings.base_url)
            .map_err(|e| ProviderError::Unavailable(format!("invalid base url: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ProviderError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse_with_params(&raw, params)
            .map_err(|e| ProviderError::Unavailable(format!("invalid endpoint {}: {}", raw, e)))
    }

    async fn get(&self, url: Url, coin_id: Option<&str>) -> Result<Response, ProviderError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        Err(classify_status(status, retry_after, coin_id))
    }

    fn coin_url(&self, coin_id: &str) -> Result<Url, ProviderError> {
        self.endpoint(
            &format!("/coins/{}", coin_id),
            &[
                ("localization", "false".into()),
                ("tickers", "false".into()),
                ("market_data", "true".into()),
                ("community_data", "false".into()),
                ("developer_data", "false".into()),
            ],
        )
    }

    /// Detail record for one coin (market data only)
    pub async fn fetch_coin(&self, coin_id: &str) -> Result<RawRecord, ProviderError> {
        let url = self.coin_url(coin_id)?;

        let body: Value = self
            .get(url, Some(coin_id))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        record_from_detail(body, coin_id)
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_top_markets(
        &self,
        limit: u32,
        vs_currency: &str,
    ) -> Result<Vec<RawRecord>, ProviderError> {
        let url = self.endpoint(
            "/coins/markets",
            &[
                ("vs_currency", vs_currency.to_string()),
                ("order", "market_cap_desc".into()),
                ("per_page", limit.to_string()),
                ("page", "1".into()),
                ("sparkline", "false".into()),
                ("price_change_percentage", "24h".into()),
            ],
        )?;

        let body: Value = self
            .get(url, None)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let records = records_from_page(body)?;
        info!("Fetched {} market records from {}", records.len(), self.name());
        Ok(records)
    }

    async fn fetch_historical_range(
        &self,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        vs_currency: &str,
    ) -> Result<HistoricalSeries, ProviderError> {
        let url = self.endpoint(
            &format!("/coins/{}/market_chart/range", coin_id),
            &[
                ("vs_currency", vs_currency.to_string()),
                ("from", from.timestamp().to_string()),
                ("to", to.timestamp().to_string()),
            ],
        )?;

        let chart: MarketChartResponse = self
            .get(url, Some(coin_id))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let series = series_from_chart(chart);
        debug!(
            "{}: {} prices, {} market caps, {} volumes",
            coin_id,
            series.prices.len(),
            series.market_caps.len(),
            series.total_volumes.len()
        );
        Ok(series)
    }
}

// ==================== HELPER FUNCTIONS ====================

fn classify_status(status: StatusCode, retry_after: Option<u64>, coin_id: Option<&str>) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after_secs: retry_after,
        },
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            coin_id: coin_id.unwrap_or_default().to_string(),
        },
        other => ProviderError::Unavailable(format!("HTTP {}", other)),
    }
}

/// Only the delta-seconds form is honoured
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn records_from_page(body: Value) -> Result<Vec<RawRecord>, ProviderError> {
    let Value::Array(items) = body else {
        return Err(ProviderError::Decode(format!(
            "expected array of markets, got {}",
            json_kind(&body)
        )));
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => records.push(map),
            other => warn!("Skipping non-object market entry: {}", json_kind(&other)),
        }
    }
    Ok(records)
}

fn record_from_detail(body: Value, coin_id: &str) -> Result<RawRecord, ProviderError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::Decode(format!(
            "expected object for coin '{}', got {}",
            coin_id,
            json_kind(&other)
        ))),
    }
}

fn series_from_chart(chart: MarketChartResponse) -> HistoricalSeries {
    HistoricalSeries {
        prices: to_points(chart.prices),
        market_caps: to_points(chart.market_caps),
        total_volumes: to_points(chart.total_volumes),
    }
}

/// Drops null and non-finite values; timestamps are unix milliseconds
fn to_points(raw: Vec<(f64, Option<f64>)>) -> Vec<SeriesPoint> {
    raw.into_iter()
        .filter_map(|(ts, value)| {
            let value = value.filter(|v| v.is_finite())?;
            ts.is_finite().then_some((ts as i64, value))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(30), None),
            ProviderError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, Some("ghost-coin")),
            ProviderError::NotFound { coin_id } if coin_id == "ghost-coin"
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, None),
            ProviderError::Unavailable(_)
        ));
    }

    #[test]
    fn test_retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 120 "), Some(120));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_chart_decoding_drops_null_values() {
        let chart: MarketChartResponse = serde_json::from_value(json!({
            "prices": [[1700000000000u64, 35000.5], [1700003600000u64, null]],
            "market_caps": [[1700000000000u64, 6.8e11]],
            "total_volumes": []
        }))
        .unwrap();

        let series = series_from_chart(chart);
        assert_eq!(series.prices, vec![(1_700_000_000_000, 35000.5)]);
        assert_eq!(series.market_caps, vec![(1_700_000_000_000, 6.8e11)]);
        assert!(series.total_volumes.is_empty());
    }

    #[test]
    fn test_chart_decoding_tolerates_missing_series() {
        let chart: MarketChartResponse =
            serde_json::from_value(json!({ "prices": [] })).unwrap();
        assert!(series_from_chart(chart).is_empty());
    }

    #[test]
    fn test_markets_page_requires_array() {
        let records = records_from_page(json!([{"id": "bitcoin"}, 42])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "bitcoin");

        assert!(matches!(
            records_from_page(json!({"error": "nope"})),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_endpoint_encodes_params() {
        let client = CoinGeckoClient::new(&ProviderSettings {
            base_url: "https://api.example.com/v3/".into(),
            ..ProviderSettings::default()
        })
        .unwrap();

        let url = client
            .endpoint("/coins/markets", &[("vs_currency", "usd".into()), ("per_page", "5".into())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v3/coins/markets?vs_currency=usd&per_page=5"
        );
    }

    #[test]
    fn test_coin_detail_requests_market_data_only() {
        let client = CoinGeckoClient::new(&ProviderSettings {
            base_url: "https://api.example.com/v3/".into(),
            ..ProviderSettings::default()
        })
        .unwrap();

        let url = client.coin_url("bitcoin").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v3/coins/bitcoin?localization=false&tickers=false\
             &market_data=true&community_data=false&developer_data=false"
        );
    }

    #[test]
    fn test_coin_detail_requires_object() {
        let record = record_from_detail(json!({"id": "bitcoin", "market_data": {}}), "bitcoin").unwrap();
        assert_eq!(record["id"], "bitcoin");

        assert!(matches!(
            record_from_detail(json!([]), "bitcoin"),
            Err(ProviderError::Decode(msg)) if msg.contains("bitcoin")
        ));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = CoinGeckoClient::new(&ProviderSettings {
            base_url: "not a url".into(),
            ..ProviderSettings::default()
        });
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }
}
