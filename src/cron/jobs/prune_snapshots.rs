//! Job to enforce the snapshot retention horizon.

use anyhow::Result;
use log::info;

use crate::db::Database;

/// Deletes snapshots collected more than `days_to_keep` days ago.
pub async fn run(db: &Database, days_to_keep: u32) -> Result<()> {
    info!("Starting prune_snapshots job...");

    let start = std::time::Instant::now();

    let deleted = db.postgres.prune(days_to_keep).await?;

    info!(
        "Completed prune_snapshots job in {:?} ({} rows deleted)",
        start.elapsed(),
        deleted
    );
    Ok(())
}
