mod daily_bar;
mod market_snapshot;
mod statistics;

pub use daily_bar::DailyBar;
pub use market_snapshot::MarketSnapshot;
pub use statistics::SnapshotStatistics;
