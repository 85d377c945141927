use std::fmt;

/// Result of one unit of work (one coin, or one realtime page).
#[derive(Debug, Clone, PartialEq)]
pub enum CoinOutcome {
    /// Rows newly written; duplicates are not counted
    Stored(u64),
    /// Provider had no data for the range
    Empty,
    /// Fetch failed after any rate-limit retries
    Failed(String),
    /// Batch failed the data contract with this many violations
    Rejected(usize),
}

impl fmt::Display for CoinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinOutcome::Stored(n) => write!(f, "stored {} rows", n),
            CoinOutcome::Empty => write!(f, "empty"),
            CoinOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            CoinOutcome::Rejected(n) => write!(f, "rejected ({} violations)", n),
        }
    }
}

/// Observable effect of a run: rows stored plus an ordered outcome log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub rows_stored: u64,
    pub outcomes: Vec<(String, CoinOutcome)>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, unit: impl Into<String>, outcome: CoinOutcome) {
        if let CoinOutcome::Stored(n) = outcome {
            self.rows_stored += n;
        }
        self.outcomes.push((unit.into(), outcome));
    }

    pub fn count(&self, pred: impl Fn(&CoinOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows stored ({} stored, {} empty, {} failed, {} rejected)",
            self.rows_stored,
            self.count(|o| matches!(o, CoinOutcome::Stored(_))),
            self.count(|o| matches!(o, CoinOutcome::Empty)),
            self.count(|o| matches!(o, CoinOutcome::Failed(_))),
            self.count(|o| matches!(o, CoinOutcome::Rejected(_))),
        )?;
        if self.interrupted {
            write!(f, ", interrupted")?;
        }
        Ok(())
    }
}

/// Final state of a guarded run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Interrupted(RunSummary),
    Failed(String),
}

impl RunOutcome {
    /// Process exit status: 0 completed, 1 failed, 130 interrupted
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Interrupted(_) => 130,
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Completed(s) | RunOutcome::Interrupted(s) => Some(s),
            RunOutcome::Failed(_) => None,
        }
    }
}
