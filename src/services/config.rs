use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::database::DEFAULT_CONNECTION;
use crate::services::task::{PreparedTask, TaskBatch, tasks_from_specs};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Which named MongoDB connection the imports write to.
    pub connection: String,
    /// Run this batch once instead of consuming the queue.
    pub tasks_file: Option<PathBuf>,
    pub rmq_url: String,
    pub queue: String,
    pub result_queue: Option<String>,
    pub fetch_timeout: Option<Duration>,
    pub insert_batch_size: usize,
    pub debug: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let fetch_timeout = lookup("FEED_TIMEOUT_SECS")
            .map(|secs| {
                secs.parse::<u64>()
                    .with_context(|| format!("FEED_TIMEOUT_SECS is not a number: {secs}"))
            })
            .transpose()?
            .map(Duration::from_secs);

        let insert_batch_size = match lookup("INSERT_BATCH_SIZE") {
            Some(size) => size
                .parse::<usize>()
                .with_context(|| format!("INSERT_BATCH_SIZE is not a number: {size}"))?,
            None => 500,
        };

        Ok(Self {
            connection: lookup("IMPORT_CONNECTION").unwrap_or(String::from(DEFAULT_CONNECTION)),
            tasks_file: lookup("IMPORT_TASKS_FILE").map(PathBuf::from),
            rmq_url: lookup("RMQ_URL").unwrap_or(String::from("amqp://localhost:5672")),
            queue: lookup("IMPORT_QUEUE").unwrap_or(String::from("import_requests")),
            result_queue: lookup("IMPORT_RESULT_QUEUE").filter(|q| !q.is_empty()),
            fetch_timeout,
            insert_batch_size,
            debug: lookup("IMPORT_DEBUG")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

/// Reads a `{ "tasks": [...] }` batch from disk. Invalid task definitions
/// stay in the batch as rejected slots.
pub fn load_tasks_file(path: &Path) -> Result<Vec<PreparedTask>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading tasks file {}", path.display()))?;
    let batch: TaskBatch = serde_json::from_str(&text)
        .with_context(|| format!("decoding tasks file {}", path.display()))?;
    Ok(tasks_from_specs(batch.tasks))
}
