use std::fmt;

use serde::{Deserialize, Serialize};

/// Counts reported for a replace-by-scope import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationCounter {
    /// Documents matching the scope filter before anything was touched.
    pub before: u64,
    pub deleted: u64,
    pub inserted: u64,
    /// Rows parsed from the feed.
    pub downloaded: u64,
}

/// Result of a single task; `log_name` is `<collection>:<scope>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Success {
        log_name: String,
        counter: ReconciliationCounter,
    },
    Failure {
        log_name: String,
        reason: String,
    },
}

impl TaskOutcome {
    pub fn log_name(&self) -> &str {
        match self {
            TaskOutcome::Success { log_name, .. } | TaskOutcome::Failure { log_name, .. } => {
                log_name
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    pub fn counter(&self) -> Option<&ReconciliationCounter> {
        match self {
            TaskOutcome::Success { counter, .. } => Some(counter),
            TaskOutcome::Failure { .. } => None,
        }
    }
}

// success:<collection>:<scope>:<json> / error:<collection>:<scope>:[<message>]
impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success { log_name, counter } => {
                let json = serde_json::to_string(counter).map_err(|_| fmt::Error)?;
                write!(f, "success:{log_name}:{json}")
            }
            TaskOutcome::Failure { log_name, reason } => write!(f, "error:{log_name}:[{reason}]"),
        }
    }
}

/// Aggregate of one `run_all` call, in task order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn new(outcomes: Vec<TaskOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
