use std::fmt;

use thiserror::Error;

/// Step of the replace-by-scope write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Count,
    Delete,
    Insert,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            WriteStage::Count => "countDocuments",
            WriteStage::Delete => "deleteMany",
            WriteStage::Insert => "insertMany",
        };
        f.write_str(stage)
    }
}

/// Everything that can go wrong inside a single import task.
///
/// None of these escape the orchestrator: each one is turned into a
/// `TaskOutcome::Failure` for the task that raised it.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("fetch {url} failed: {cause:#}")]
    Fetch { url: String, cause: anyhow::Error },

    #[error("{format} feed from {url} is malformed: {message}")]
    Parse {
        url: String,
        format: &'static str,
        message: String,
    },

    #[error("feed {url} yielded no rows")]
    EmptyFeed { url: String },

    #[error("scope filter for '{scope}' could not be built: {cause:#}")]
    ScopeResolution { scope: String, cause: anyhow::Error },

    #[error("{stage} on {collection} failed: {cause:#}")]
    Write {
        collection: String,
        stage: WriteStage,
        cause: anyhow::Error,
    },

    /// The scope has been emptied but the replacement rows were not stored.
    /// Re-running the task restores the scope from the feed.
    #[error(
        "insertMany on {collection} failed after {deleted} documents were deleted, scope is empty until the task is re-run: {cause:#}"
    )]
    InsertAfterDelete {
        collection: String,
        deleted: u64,
        cause: anyhow::Error,
    },

    #[error("row schema is invalid: {0}")]
    Schema(String),

    #[error("invalid task definition: {0}")]
    InvalidTask(String),
}

impl ImportError {
    pub fn fetch(url: &str, cause: impl Into<anyhow::Error>) -> Self {
        ImportError::Fetch {
            url: url.to_string(),
            cause: cause.into(),
        }
    }

    pub fn parse(url: &str, format: &'static str, message: impl fmt::Display) -> Self {
        ImportError::Parse {
            url: url.to_string(),
            format,
            message: message.to_string(),
        }
    }
}
