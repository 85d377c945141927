use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::config::PostgresSettings;
use crate::db::models::MarketSnapshot;
use crate::error::StorageError;

pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

/// Write side of the snapshot store as seen by the ingestion orchestrator.
///
/// Implementations must be idempotent on `(coin_id, collected_at)` and
/// all-or-nothing per call.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the number of newly persisted rows; duplicates count as zero.
    async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64, StorageError>;
}

#[async_trait]
impl SnapshotStore for PostgresClient {
    async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64, StorageError> {
        PostgresClient::upsert_batch(self, rows).await
    }
}

/// Shared handle to the migrated snapshot store.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: PostgresSettings) -> Result<Self, StorageError> {
        let postgres = PostgresClient::new(settings).await?;

        // Run migrations
        postgres.migrate().await?;

        info!("Snapshot store ready at {}", postgres.table());

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64, StorageError> {
        self.postgres.upsert_batch(rows).await
    }
}
