//! Job to collect one realtime page of top markets.

use anyhow::{bail, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use crate::ingest::{Ingestor, RunMode, RunOutcome};

/// Runs a realtime ingestion of the top `limit` coins.
///
/// The ingestor already alerts on failure; this only turns a failed run into
/// an error for the scheduler log.
pub async fn run(
    ingestor: &Ingestor,
    limit: u32,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    info!("Starting collect_markets job...");

    let start = std::time::Instant::now();

    match ingestor
        .run(RunMode::Realtime { limit }, cancellation_token)
        .await
    {
        RunOutcome::Failed(e) => bail!("collection run failed: {}", e),
        outcome => {
            if let Some(summary) = outcome.summary() {
                info!(
                    "Completed collect_markets job in {:?} ({})",
                    start.elapsed(),
                    summary
                );
            }
            Ok(())
        },
    }
}
