use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL connection configuration.
///
/// All snapshot tables live inside `schema`, which lets tests and parallel
/// deployments share one server without touching each other's rows.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pg_database")]
    pub database: String,
    #[serde(default = "default_pg_schema")]
    pub schema: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: String::new(),
            database: default_pg_database(),
            schema: default_pg_schema(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_database() -> String {
    "coinflow".to_string()
}

fn default_pg_schema() -> String {
    "market".to_string()
}

fn default_pool_size() -> usize {
    // A run only ever holds one connection; the rest serve the CLI read paths.
    4
}

/// Market data REST provider configuration (CoinGecko-compatible API).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Optional demo/pro key, sent as `x-cg-demo-api-key`
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            vs_currency: default_vs_currency(),
            user_agent: default_user_agent(),
            api_key: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_vs_currency() -> String {
    "usd".to_string()
}

fn default_user_agent() -> String {
    "coinflow/1.0".to_string()
}

/// Ingestion limits and rate-limit cooldowns.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Coins per realtime page
    #[serde(default = "default_top_limit")]
    pub top_limit: u32,
    /// Trailing window fetched by a backfill run
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
    /// Size of the reference coin list a backfill iterates over
    #[serde(default = "default_backfill_coins")]
    pub backfill_coins: u32,
    /// Pause between successive per-coin fetches
    #[serde(default = "default_coin_cooldown_ms")]
    pub coin_cooldown_ms: u64,
    /// Pause after the provider answers 429 before retrying the same coin
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Retries after a rate-limit signal; clamped to 1..=2
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            top_limit: default_top_limit(),
            backfill_days: default_backfill_days(),
            backfill_coins: default_backfill_coins(),
            coin_cooldown_ms: default_coin_cooldown_ms(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

fn default_top_limit() -> u32 {
    10
}

fn default_backfill_days() -> u32 {
    30
}

fn default_backfill_coins() -> u32 {
    10
}

fn default_coin_cooldown_ms() -> u64 {
    1_500
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

fn default_rate_limit_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSettings {
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days_to_keep: default_days_to_keep(),
        }
    }
}

fn default_days_to_keep() -> u32 {
    30
}

/// Daemon mode job intervals.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSettings {
    #[serde(default = "default_collect_interval_secs")]
    pub collect_interval_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            collect_interval_secs: default_collect_interval_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

fn default_collect_interval_secs() -> u64 {
    3_600 // 1 hour
}

fn default_prune_interval_secs() -> u64 {
    86_400 // 1 day
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertSettings {
    /// File that alert lines are appended to, in addition to the error log
    #[serde(default)]
    pub fallback_log: Option<String>,
}

/// Root application configuration.
///
/// Loaded from an optional `config.{yaml,toml,json}` in the working directory,
/// then overlaid with `COINFLOW__SECTION__KEY` environment variables.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub alert: AlertSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("COINFLOW").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_falls_back_to_defaults() {
        let settings: Settings = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.postgres.schema, "market");
        assert_eq!(settings.provider.vs_currency, "usd");
        assert_eq!(settings.ingest.top_limit, 10);
        assert_eq!(settings.ingest.rate_limit_retries, 1);
        assert_eq!(settings.retention.days_to_keep, 30);
        assert!(settings.alert.fallback_log.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: Settings = Config::builder()
            .set_override("ingest.top_limit", 25)
            .unwrap()
            .set_override("postgres.host", "db.internal")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.ingest.top_limit, 25);
        assert_eq!(settings.ingest.backfill_days, 30);
        assert_eq!(settings.postgres.host, "db.internal");
        assert_eq!(settings.postgres.port, 5432);
    }
}
