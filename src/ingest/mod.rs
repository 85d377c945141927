pub mod ingestor;
pub mod summary;

pub use ingestor::{Ingestor, RunMode};
pub use summary::{CoinOutcome, RunOutcome, RunSummary};
