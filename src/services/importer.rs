use std::sync::Arc;

use futures::future::join_all;
use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::Instrument;

use crate::helpers::profiling::ResourceMeter;
use crate::services::database::DocumentStore;
use crate::services::error::ImportError;
use crate::services::feed::FeedFetcher;
use crate::services::outcome::{ReconciliationCounter, TaskOutcome};
use crate::services::parser::{Row, parse_feed};
use crate::services::task::{ImportTask, PreparedTask};
use crate::services::writer::replace_scope;

/// Runs import tasks against a store, one pipeline per task:
/// fetch, parse, resolve scope, map, replace.
pub struct Importer {
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn DocumentStore>,
}

impl Importer {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, store: Arc<dyn DocumentStore>) -> Self {
        Self { fetcher, store }
    }

    /// Runs every task concurrently and waits for all of them. One outcome
    /// per task, in input order; a failing task never stops its siblings.
    pub async fn run_all(&self, tasks: &[ImportTask]) -> Vec<TaskOutcome> {
        join_all(tasks.iter().map(|task| self.run_task(task))).await
    }

    /// Like [`Importer::run_all`] for declared batches: specs that could not
    /// be turned into tasks report their failure in place.
    pub async fn run_batch(&self, tasks: &[PreparedTask]) -> Vec<TaskOutcome> {
        join_all(tasks.iter().map(|prepared| async move {
            match prepared {
                Ok(task) => self.run_task(task).await,
                Err(rejected) => {
                    tracing::error!(task = %rejected.log_name, error = %rejected.error, "task definition rejected");
                    TaskOutcome::Failure {
                        log_name: rejected.log_name.clone(),
                        reason: rejected.error.to_string(),
                    }
                }
            }
        }))
        .await
    }

    pub async fn run_task(&self, task: &ImportTask) -> TaskOutcome {
        let log_name = task.log_name();
        let span = tracing::info_span!("import", task = %log_name);

        async {
            let meter = ResourceMeter::start();
            let result = self.import(task).await;
            let (elapsed, process_rss_delta_kib) = meter.finish();

            match result {
                Ok(counter) => {
                    tracing::info!(
                        before = counter.before,
                        deleted = counter.deleted,
                        inserted = counter.inserted,
                        downloaded = counter.downloaded,
                        ?elapsed,
                        process_rss_delta_kib,
                        "import finished"
                    );
                    TaskOutcome::Success {
                        log_name: log_name.clone(),
                        counter,
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, ?elapsed, "import failed");
                    TaskOutcome::Failure {
                        log_name: log_name.clone(),
                        reason: err.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn import(&self, task: &ImportTask) -> Result<ReconciliationCounter, ImportError> {
        let reader = self.fetcher.fetch(&task.url).await?;
        let rows = parse_feed(reader, &task.format, &task.url).await?;
        let downloaded = rows.len() as u64;

        let filter = task.scope_filter.resolve(&task.scope)?;

        if rows.is_empty() {
            return Err(ImportError::EmptyFeed {
                url: task.url.clone(),
            });
        }

        let mut rows = task.map_rows(rows);
        if let Some(schema) = &task.schema {
            rows = validate_rows(schema, rows)?;
            if rows.is_empty() {
                return Err(ImportError::EmptyFeed {
                    url: task.url.clone(),
                });
            }
        }

        let collection = self.store.collection(&task.collection_name);
        let summary = replace_scope(collection.as_ref(), &task.collection_name, filter, rows).await?;

        Ok(ReconciliationCounter {
            before: summary.before,
            deleted: summary.deleted,
            inserted: summary.inserted,
            downloaded,
        })
    }
}

/// Drops rows that do not satisfy `schema`, logging each one.
fn validate_rows(schema: &Value, rows: Vec<Row>) -> Result<Vec<Row>, ImportError> {
    let compiled = JSONSchema::compile(schema).map_err(|e| ImportError::Schema(e.to_string()))?;

    let total = rows.len();
    let valid: Vec<Row> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let value = Value::Object(row);
            if !compiled.is_valid(&value) {
                tracing::warn!(index, row = %value, "row rejected by schema");
                return None;
            }
            match value {
                Value::Object(row) => Some(row),
                _ => None,
            }
        })
        .collect();

    if valid.len() < total {
        tracing::warn!(rejected = total - valid.len(), total, "rows rejected by schema");
    }
    Ok(valid)
}
