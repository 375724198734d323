use mongodb::bson::Document;

use crate::services::database::ScopedCollection;
use crate::services::error::{ImportError, WriteStage};
use crate::services::parser::Row;

/// Store-side counts of one replace-by-scope write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub before: u64,
    pub deleted: u64,
    pub inserted: u64,
}

/// Replaces everything matching `filter` with `rows`: count, delete, insert,
/// strictly in that order.
///
/// The three calls are not atomic. If the insert fails the scope stays
/// empty and the error says so; the task is expected to be re-run.
pub async fn replace_scope(
    collection: &dyn ScopedCollection,
    collection_name: &str,
    filter: Document,
    rows: Vec<Row>,
) -> Result<WriteSummary, ImportError> {
    let write_error = |stage: WriteStage| {
        move |cause: anyhow::Error| ImportError::Write {
            collection: collection_name.to_string(),
            stage,
            cause,
        }
    };

    let before = collection
        .count_documents(filter.clone())
        .await
        .map_err(write_error(WriteStage::Count))?;

    let deleted = collection
        .delete_many(filter)
        .await
        .map_err(write_error(WriteStage::Delete))?;

    tracing::debug!(collection = collection_name, before, deleted, "scope cleared");

    let inserted = collection
        .insert_many(rows)
        .await
        .map_err(|cause| ImportError::InsertAfterDelete {
            collection: collection_name.to_string(),
            deleted,
            cause,
        })?;

    Ok(WriteSummary {
        before,
        deleted,
        inserted,
    })
}
