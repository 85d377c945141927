pub mod collect_markets;
pub mod prune_snapshots;
