use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::alert::Alerter;
use crate::config::IngestSettings;
use crate::db::SnapshotStore;
use crate::error::{IngestError, ProviderError};
use crate::ingest::summary::{CoinOutcome, RunOutcome, RunSummary};
use crate::pipeline::{derive_batch, derive_history, validate, RawRecord};
use crate::provider::{HistoricalSeries, MarketDataProvider};
use crate::utils::value_to_string;

/// Label used in the outcome log for the single realtime batch
const REALTIME_UNIT: &str = "top-markets";

/// Label for the coin list a backfill iterates over
const REFERENCE_UNIT: &str = "reference-list";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One page of the top `limit` coins, one batch
    Realtime { limit: u32 },
    /// Trailing `days` of history for each of the top `coins` coins
    Historical { days: u32, coins: u32 },
}

/// Sequences fetch, derive, validate and store for both run modes.
///
/// Everything runs on the calling task, one coin at a time. Cancellation is
/// honoured between coins and during cooldowns; whatever was committed before
/// it stays committed.
pub struct Ingestor {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn SnapshotStore>,
    alerter: Arc<dyn Alerter>,
    settings: IngestSettings,
    vs_currency: String,
}

impl Ingestor {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn SnapshotStore>,
        alerter: Arc<dyn Alerter>,
        settings: IngestSettings,
        vs_currency: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            alerter,
            settings,
            vs_currency: vs_currency.into(),
        }
    }

    /// Runs one ingestion and never propagates its failure.
    ///
    /// Errors and interrupts are logged, sent to the alerter and folded into a
    /// [`RunOutcome`] that maps onto a process exit code.
    pub async fn run(&self, mode: RunMode, cancellation_token: &CancellationToken) -> RunOutcome {
        let start = Instant::now();
        info!("Starting {:?} run against {}", mode, self.provider.name());

        let result = match mode {
            RunMode::Realtime { limit } => self.run_realtime(limit, cancellation_token).await,
            RunMode::Historical { days, coins } => {
                self.run_historical(days, coins, cancellation_token).await
            },
        };

        match result {
            Ok(summary) if summary.interrupted => {
                warn!("Run interrupted after {:?}: {}", start.elapsed(), summary);
                self.alerter
                    .alert("Ingestion interrupted", &summary.to_string())
                    .await;
                RunOutcome::Interrupted(summary)
            },
            Ok(summary) => {
                info!("Run completed in {:?}: {}", start.elapsed(), summary);
                if summary.rows_stored == 0 {
                    self.alerter
                        .alert("Ingestion stored no rows", &summary.to_string())
                        .await;
                }
                RunOutcome::Completed(summary)
            },
            Err(e) => {
                error!("Run failed after {:?}: {:#}", start.elapsed(), e);
                self.alerter.alert("Ingestion failed", &e.to_string()).await;
                RunOutcome::Failed(e.to_string())
            },
        }
    }

    /// Fetches one page of top coins and stores it as a single batch.
    ///
    /// A fetch failure is logged and leaves the run with zero rows. A contract
    /// or storage failure fails the run.
    pub async fn run_realtime(
        &self,
        limit: u32,
        cancellation_token: &CancellationToken,
    ) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::default();

        if cancellation_token.is_cancelled() {
            summary.interrupted = true;
            return Ok(summary);
        }

        let records = match self
            .with_rate_limit_retry(REALTIME_UNIT, cancellation_token, || {
                self.provider.fetch_top_markets(limit, &self.vs_currency)
            })
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to fetch top {} markets: {}", limit, e);
                summary.record(REALTIME_UNIT, CoinOutcome::Failed(e.to_string()));
                summary.interrupted = cancellation_token.is_cancelled();
                return Ok(summary);
            },
        };

        if records.is_empty() {
            info!("Provider returned no markets");
            summary.record(REALTIME_UNIT, CoinOutcome::Empty);
            return Ok(summary);
        }

        let batch = derive_batch(&records, Utc::now());
        let rows = match validate(batch).into_result() {
            Ok(rows) => rows,
            Err(violation) => {
                self.alerter
                    .alert("Market batch failed data contract", &violation.to_string())
                    .await;
                return Err(violation.into());
            },
        };

        let inserted = self.store.upsert_batch(&rows).await?;
        summary.record(REALTIME_UNIT, CoinOutcome::Stored(inserted));
        Ok(summary)
    }

    /// Backfills the trailing `days` for each coin in the top-`coins` reference list.
    ///
    /// Fetch failures (of the coin list or of one coin) and contract rejections
    /// are recorded and skipped. A storage failure aborts the run; coins stored
    /// before it stay stored.
    pub async fn run_historical(
        &self,
        days: u32,
        coins: u32,
        cancellation_token: &CancellationToken,
    ) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::default();

        if cancellation_token.is_cancelled() {
            summary.interrupted = true;
            return Ok(summary);
        }

        let reference = match self
            .with_rate_limit_retry(REFERENCE_UNIT, cancellation_token, || {
                self.provider.fetch_top_markets(coins, &self.vs_currency)
            })
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                warn!("Failed to fetch reference list of {} coins: {}", coins, e);
                summary.record(REFERENCE_UNIT, CoinOutcome::Failed(e.to_string()));
                summary.interrupted = cancellation_token.is_cancelled();
                return Ok(summary);
            },
        };

        let to = Utc::now();
        let from = to - chrono::Duration::days(i64::from(days));
        let coin_cooldown = Duration::from_millis(self.settings.coin_cooldown_ms);

        info!(
            "Backfilling {} coins from {} to {}",
            reference.len(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        for (i, identity) in reference.iter().enumerate() {
            // Check cancellation at the start of each coin
            if cancellation_token.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            if i > 0 && !pause(coin_cooldown, cancellation_token).await {
                summary.interrupted = true;
                break;
            }

            let Some(coin_id) = identity.get("id").and_then(value_to_string) else {
                warn!("Skipping reference record without an id");
                summary.record(
                    format!("#{}", i + 1),
                    CoinOutcome::Failed("missing coin id".into()),
                );
                continue;
            };

            let outcome = self
                .backfill_coin(&coin_id, identity, from, to, cancellation_token)
                .await?;

            info!("[{}/{}] {}: {}", i + 1, reference.len(), coin_id, outcome);
            summary.record(coin_id, outcome);
        }

        Ok(summary)
    }

    async fn backfill_coin(
        &self,
        coin_id: &str,
        identity: &RawRecord,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancellation_token: &CancellationToken,
    ) -> Result<CoinOutcome, IngestError> {
        let fetched = self
            .with_rate_limit_retry(coin_id, cancellation_token, || {
                self.provider
                    .fetch_historical_range(coin_id, from, to, &self.vs_currency)
            })
            .await;

        let series: HistoricalSeries = match fetched {
            Ok(series) if series.is_empty() => return Ok(CoinOutcome::Empty),
            Ok(series) => series,
            Err(ProviderError::NotFound { .. }) => return Ok(CoinOutcome::Empty),
            Err(e) => return Ok(CoinOutcome::Failed(e.to_string())),
        };

        let points = series.merge();
        debug!("{}: merged {} points", coin_id, points.len());

        let batch = derive_history(identity, &points);
        match validate(batch).into_result() {
            Ok(rows) => {
                let inserted = self.store.upsert_batch(&rows).await?;
                Ok(CoinOutcome::Stored(inserted))
            },
            Err(violation) => {
                self.alerter
                    .alert(
                        &format!("History for {} failed data contract", coin_id),
                        &violation.to_string(),
                    )
                    .await;
                Ok(CoinOutcome::Rejected(violation.violations.len()))
            },
        }
    }

    /// Calls `op`, and after a rate-limit signal waits the long cooldown and
    /// calls it again, at most `rate_limit_retries` (1 or 2) more times.
    async fn with_rate_limit_retry<T, F, Fut>(
        &self,
        unit: &str,
        cancellation_token: &CancellationToken,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_retries = self.settings.rate_limit_retries.clamp(1, 2);
        let mut attempt = 0;

        loop {
            match op().await {
                Err(ProviderError::RateLimited { retry_after_secs }) if attempt < max_retries => {
                    attempt += 1;
                    let wait = Duration::from_secs(
                        retry_after_secs
                            .unwrap_or_default()
                            .max(self.settings.rate_limit_cooldown_secs),
                    );
                    warn!(
                        "Rate limited on {} (retry {}/{}), cooling down for {:?}",
                        unit, attempt, max_retries, wait
                    );
                    if !pause(wait, cancellation_token).await {
                        return Err(ProviderError::RateLimited { retry_after_secs });
                    }
                },
                result => return result,
            }
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancellation_token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancellation_token.is_cancelled();
    }
    tokio::select! {
        _ = cancellation_token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
