pub mod alert;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod provider;
pub mod utils;

pub use alert::{Alerter, LogAlerter};
pub use config::Settings;
pub use cron::CronScheduler;
pub use db::{Database, SnapshotStore};
pub use error::{IngestError, ProviderError, SchemaViolation, StorageError};
pub use ingest::{Ingestor, RunMode, RunOutcome, RunSummary};
pub use provider::{CoinGeckoClient, MarketDataProvider};
