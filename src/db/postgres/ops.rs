use chrono::NaiveDate;
use log::{debug, error, info, warn};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

use crate::db::models::{DailyBar, MarketSnapshot, SnapshotStatistics};
use crate::db::postgres::PostgresClient;
use crate::error::StorageError;
use crate::pipeline::resample_daily;
use crate::utils::sanitize_string;

/// Every stored column except the surrogate id, in insert order
const SNAPSHOT_COLUMNS: &str = "coin_id, symbol, name, \
    current_price, market_cap, market_cap_rank, total_volume, \
    high_24h, low_24h, price_change_24h, price_change_percentage_24h, \
    circulating_supply, total_supply, max_supply, \
    ath, ath_date, atl, atl_date, \
    volatility_24h, distance_from_ath, distance_from_atl, volume_to_mcap_ratio, \
    last_updated, collected_at";

const COLS_PER_ROW: usize = 24;

/// 24 params per row keeps a chunk far below PostgreSQL's 65535 bind limit
const INSERT_CHUNK_SIZE: usize = 500;

fn days_param(days: u32) -> i32 {
    i32::try_from(days).unwrap_or(i32::MAX)
}

fn limit_param(limit: u32) -> i64 {
    i64::from(limit)
}

impl PostgresClient {
    // ==================== WRITES ====================

    /// Idempotent append of validated snapshots.
    ///
    /// Runs in one transaction. Rows whose `(coin_id, collected_at)` already
    /// exists are skipped, and the returned count only covers rows that were
    /// actually written. Any other failure rolls the whole batch back.
    pub async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            debug!("Empty batch, nothing to insert");
            return Ok(0);
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let table = self.table();
        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            // Build VALUES placeholders: ($1,...,$24), ($25,...,$48), ...
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                "INSERT INTO {} ({}) VALUES {} ON CONFLICT (coin_id, collected_at) DO NOTHING",
                table,
                SNAPSHOT_COLUMNS,
                values_clauses.join(", ")
            );

            let sanitized: Vec<[String; 3]> = chunk
                .iter()
                .map(|r| {
                    [
                        sanitize_string(&r.coin_id),
                        sanitize_string(&r.symbol),
                        sanitize_string(&r.name),
                    ]
                })
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (row, [coin_id, symbol, name]) in chunk.iter().zip(&sanitized) {
                params.push(coin_id);
                params.push(symbol);
                params.push(name);
                params.push(&row.current_price);
                params.push(&row.market_cap);
                params.push(&row.market_cap_rank);
                params.push(&row.total_volume);
                params.push(&row.high_24h);
                params.push(&row.low_24h);
                params.push(&row.price_change_24h);
                params.push(&row.price_change_percentage_24h);
                params.push(&row.circulating_supply);
                params.push(&row.total_supply);
                params.push(&row.max_supply);
                params.push(&row.ath);
                params.push(&row.ath_date);
                params.push(&row.atl);
                params.push(&row.atl_date);
                params.push(&row.volatility_24h);
                params.push(&row.distance_from_ath);
                params.push(&row.distance_from_atl);
                params.push(&row.volume_to_mcap_ratio);
                params.push(&row.last_updated);
                params.push(&row.collected_at);
            }

            match tx.execute(&query, &params).await {
                Ok(n) => inserted += n,
                Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                    // Transaction is dropped (rolled back) on return
                    warn!("Uniqueness conflict while inserting snapshots, nothing stored: {}", e);
                    return Ok(0);
                },
                Err(e) => {
                    error!("Failed to batch insert {} snapshots: {:?}", chunk.len(), e);
                    return Err(e.into());
                },
            }
        }

        tx.commit().await?;

        info!(
            "Stored {} of {} snapshot rows ({} duplicates skipped)",
            inserted,
            rows.len(),
            rows.len() as u64 - inserted
        );
        Ok(inserted)
    }

    /// Delete rows collected more than `days_to_keep` days ago
    pub async fn prune(&self, days_to_keep: u32) -> Result<u64, StorageError> {
        let client = self.pool.get().await?;
        let query = format!(
            "DELETE FROM {} WHERE collected_at < NOW() - make_interval(days => $1)",
            self.table()
        );

        let deleted = client.execute(&query, &[&days_param(days_to_keep)]).await?;

        info!(
            "Pruned {} snapshot rows older than {} days",
            deleted, days_to_keep
        );
        Ok(deleted)
    }

    // ==================== READS ====================

    /// Most recent rows across all coins
    pub async fn latest(&self, limit: u32) -> Result<Vec<MarketSnapshot>, StorageError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {}
            FROM {}
            ORDER BY collected_at DESC, market_cap_rank ASC NULLS LAST
            LIMIT $1
            "#,
            SNAPSHOT_COLUMNS,
            self.table()
        );

        let rows = client.query(&query, &[&limit_param(limit)]).await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    /// Rows for one coin within the trailing `days` window, oldest first
    pub async fn history(
        &self,
        coin_id: &str,
        days: u32,
    ) -> Result<Vec<MarketSnapshot>, StorageError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {}
            FROM {}
            WHERE coin_id = $1
              AND collected_at >= NOW() - make_interval(days => $2)
            ORDER BY collected_at ASC
            "#,
            SNAPSHOT_COLUMNS,
            self.table()
        );

        let rows = client
            .query(&query, &[&coin_id, &days_param(days)])
            .await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    /// Enriched history: daily OHLCV bars with 50/200-day moving averages
    pub async fn history_daily(
        &self,
        coin_id: &str,
        days: u32,
    ) -> Result<Vec<DailyBar>, StorageError> {
        let rows = self.history(coin_id, days).await?;
        Ok(resample_daily(&rows))
    }

    /// Ranking by market cap.
    ///
    /// With `date`, each coin's last snapshot on that UTC calendar day; without
    /// it, each coin's most recent snapshot overall. Ordered by rank.
    pub async fn top_by_market_cap(
        &self,
        limit: u32,
        date: Option<NaiveDate>,
    ) -> Result<Vec<MarketSnapshot>, StorageError> {
        let client = self.pool.get().await?;
        let limit = limit_param(limit);

        let rows = match date {
            Some(day) => {
                let query = format!(
                    r#"
                    SELECT {cols} FROM (
                        SELECT DISTINCT ON (coin_id) {cols}
                        FROM {table}
                        WHERE (collected_at AT TIME ZONE 'UTC')::date = $1
                        ORDER BY coin_id, collected_at DESC
                    ) AS on_day
                    ORDER BY market_cap_rank ASC NULLS LAST
                    LIMIT $2
                    "#,
                    cols = SNAPSHOT_COLUMNS,
                    table = self.table()
                );
                client.query(&query, &[&day, &limit]).await?
            },
            None => {
                let query = format!(
                    r#"
                    SELECT {cols} FROM (
                        SELECT DISTINCT ON (coin_id) {cols}
                        FROM {table}
                        ORDER BY coin_id, collected_at DESC
                    ) AS latest
                    ORDER BY market_cap_rank ASC NULLS LAST
                    LIMIT $1
                    "#,
                    cols = SNAPSHOT_COLUMNS,
                    table = self.table()
                );
                client.query(&query, &[&limit]).await?
            },
        };

        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    /// Latest snapshot per coin whose 24h change magnitude is at least
    /// `min_change_pct`, biggest movers first
    pub async fn price_movers(
        &self,
        min_change_pct: f64,
    ) -> Result<Vec<MarketSnapshot>, StorageError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {cols} FROM (
                SELECT DISTINCT ON (coin_id) {cols}
                FROM {table}
                ORDER BY coin_id, collected_at DESC
            ) AS latest
            WHERE ABS(price_change_percentage_24h) >= $1
            ORDER BY ABS(price_change_percentage_24h) DESC
            "#,
            cols = SNAPSHOT_COLUMNS,
            table = self.table()
        );

        let rows = client.query(&query, &[&min_change_pct]).await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    /// Table-wide counts, collection range and mean market cap
    pub async fn statistics(&self) -> Result<SnapshotStatistics, StorageError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT
                COUNT(*) AS total_rows,
                COUNT(DISTINCT coin_id) AS distinct_coins,
                MIN(collected_at) AS first_collected_at,
                MAX(collected_at) AS last_collected_at,
                AVG(market_cap) AS avg_market_cap
            FROM {}
            "#,
            self.table()
        );

        let row = client.query_one(&query, &[]).await?;

        Ok(SnapshotStatistics {
            total_rows: row.get("total_rows"),
            distinct_coins: row.get("distinct_coins"),
            first_collected_at: row.get("first_collected_at"),
            last_collected_at: row.get("last_collected_at"),
            avg_market_cap: row.get("avg_market_cap"),
        })
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_snapshot(row: &tokio_postgres::Row) -> MarketSnapshot {
    MarketSnapshot {
        coin_id: row.get("coin_id"),
        symbol: row.get("symbol"),
        name: row.get("name"),
        current_price: row.get("current_price"),
        market_cap: row.get("market_cap"),
        market_cap_rank: row.get("market_cap_rank"),
        total_volume: row.get("total_volume"),
        high_24h: row.get("high_24h"),
        low_24h: row.get("low_24h"),
        price_change_24h: row.get("price_change_24h"),
        price_change_percentage_24h: row.get("price_change_percentage_24h"),
        circulating_supply: row.get("circulating_supply"),
        total_supply: row.get("total_supply"),
        max_supply: row.get("max_supply"),
        ath: row.get("ath"),
        ath_date: row.get("ath_date"),
        atl: row.get("atl"),
        atl_date: row.get("atl_date"),
        volatility_24h: row.get("volatility_24h"),
        distance_from_ath: row.get("distance_from_ath"),
        distance_from_atl: row.get("distance_from_atl"),
        volume_to_mcap_ratio: row.get("volume_to_mcap_ratio"),
        last_updated: row.get("last_updated"),
        collected_at: row.get("collected_at"),
    }
}
