//! Error taxonomy shared by the provider, pipeline, storage and ingestion layers.
//!
//! Duplicate `(coin_id, collected_at)` rows have no variant here. The storage
//! layer absorbs them and reports zero inserted rows.

use thiserror::Error;

use crate::pipeline::contract::Violation;

/// Failure reported by a market data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("no data for coin '{coin_id}' in the requested range")]
    NotFound { coin_id: String },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected provider payload: {0}")]
    Decode(String),
}

/// A batch failed the data contract. Carries every offending row/field.
#[derive(Debug, Error)]
#[error("batch failed data contract with {} violation(s): {}", .violations.len(), summarize(.violations))]
pub struct SchemaViolation {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    const SHOWN: usize = 5;

    let mut parts: Vec<String> = violations.iter().take(SHOWN).map(|v| v.to_string()).collect();
    if violations.len() > SHOWN {
        parts.push(format!("... {} more", violations.len() - SHOWN));
    }
    parts.join("; ")
}

/// Transactional or connectivity failure in the snapshot store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Fatal failure of one ingestion batch or run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
