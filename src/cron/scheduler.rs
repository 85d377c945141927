//! Cron scheduler for daemon mode.
//!
//! Runs jobs like:
//! - Collecting a realtime page of top markets into the snapshot store
//! - Pruning snapshots older than the retention horizon

use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::{RetentionSettings, ScheduleSettings};
use crate::db::Database;
use crate::ingest::Ingestor;

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Arc<Database>,
    ingestor: Arc<Ingestor>,
    schedule: ScheduleSettings,
    retention: RetentionSettings,
    collect_limit: u32,
    /// Held for the duration of any job that writes to the store
    writer: Arc<Mutex<()>>,
}

impl CronScheduler {
    pub fn new(
        db: Arc<Database>,
        ingestor: Arc<Ingestor>,
        schedule: ScheduleSettings,
        retention: RetentionSettings,
        collect_limit: u32,
    ) -> Self {
        Self {
            db,
            ingestor,
            schedule,
            retention,
            collect_limit,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        // Register all jobs
        self.register_collect_markets_job(&scheduler, cancellation_token.clone())
            .await?;
        self.register_prune_snapshots_job(&scheduler).await?;

        // Start the scheduler
        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        // Let an in-flight write finish before tearing down
        let _guard = self.writer.lock().await;
        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_collect_markets_job(
        &self,
        scheduler: &JobScheduler,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        let ingestor = self.ingestor.clone();
        let writer = self.writer.clone();
        let limit = self.collect_limit;
        let interval = self.schedule.collect_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let ingestor = ingestor.clone();
                let writer = writer.clone();
                let token = cancellation_token.clone();
                Box::pin(async move {
                    let Ok(_guard) = writer.try_lock() else {
                        warn!("Previous write job still running, skipping collect_markets");
                        return;
                    };
                    if let Err(e) = jobs::collect_markets::run(&ingestor, limit, &token).await {
                        error!("Failed to collect markets: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered collect_markets job (every {}s)", interval);
        Ok(())
    }

    async fn register_prune_snapshots_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let writer = self.writer.clone();
        let days_to_keep = self.retention.days_to_keep;
        let interval = self.schedule.prune_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let writer = writer.clone();
                Box::pin(async move {
                    let _guard = writer.lock().await;
                    if let Err(e) = jobs::prune_snapshots::run(&db, days_to_keep).await {
                        error!("Failed to prune snapshots: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!(
            "Registered prune_snapshots job (every {}s, keeping {} days)",
            interval, days_to_keep
        );
        Ok(())
    }
}
