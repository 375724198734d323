//! In-memory stand-ins for the feed and the store, shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use mongodb::bson::Document;
use serde_json::json;

use crate::services::database::{DocumentStore, ScopedCollection};
use crate::services::error::{ImportError, WriteStage};
use crate::services::feed::{FeedFetcher, FeedReader};
use crate::services::parser::Row;

pub fn reader_for(body: &str) -> FeedReader {
    Box::pin(std::io::Cursor::new(body.as_bytes().to_vec()))
}

pub fn rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|n| json!({ "n": n }).as_object().cloned().unwrap_or_default())
        .collect()
}

/// Ordered record of interesting things happening across doubles.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Count(Document),
    Delete(Document),
    Insert(usize),
}

pub struct RecordingCollection {
    before: u64,
    deleted: u64,
    inserted: Option<u64>,
    fail_on: Option<WriteStage>,
    calls: Mutex<Vec<Call>>,
    stored: Mutex<Vec<Row>>,
    log: EventLog,
}

impl RecordingCollection {
    pub fn new(before: u64, deleted: u64) -> Self {
        Self {
            before,
            deleted,
            inserted: None,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
            log: EventLog::default(),
        }
    }

    /// Report this many inserted documents regardless of the rows given.
    pub fn reporting_inserted(mut self, inserted: u64) -> Self {
        self.inserted = Some(inserted);
        self
    }

    pub fn failing_on(mut self, stage: WriteStage) -> Self {
        self.fail_on = Some(stage);
        self
    }

    pub fn logging_to(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<Row> {
        self.stored.lock().unwrap().clone()
    }

    fn record(&self, call: Call, stage: WriteStage) -> Result<()> {
        self.log.push(stage.to_string());
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(stage) {
            return Err(anyhow!("injected {stage} failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ScopedCollection for RecordingCollection {
    async fn count_documents(&self, filter: Document) -> Result<u64> {
        self.record(Call::Count(filter), WriteStage::Count)?;
        Ok(self.before)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        self.record(Call::Delete(filter), WriteStage::Delete)?;
        Ok(self.deleted)
    }

    async fn insert_many(&self, rows: Vec<Row>) -> Result<u64> {
        self.record(Call::Insert(rows.len()), WriteStage::Insert)?;
        let count = rows.len() as u64;
        self.stored.lock().unwrap().extend(rows);
        Ok(self.inserted.unwrap_or(count))
    }
}

/// Hands out one [`RecordingCollection`] per name, creating empty ones on
/// demand.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Arc<RecordingCollection>>>,
}

impl MemoryStore {
    pub fn with_collection(self, name: &str, collection: RecordingCollection) -> Self {
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(collection));
        self
    }

    pub fn get(&self, name: &str) -> Arc<RecordingCollection> {
        self.collections
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RecordingCollection::new(0, 0)))
            .clone()
    }
}

impl DocumentStore for MemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn ScopedCollection> {
        self.get(name)
    }
}

enum Stub {
    Body(String),
    Status(u16),
}

/// Serves canned bodies or HTTP statuses by URL, optionally after a delay.
#[derive(Default)]
pub struct StubFetcher {
    responses: HashMap<String, (Stub, Duration)>,
    log: EventLog,
}

impl StubFetcher {
    pub fn body(mut self, url: &str, body: &str) -> Self {
        self.responses
            .insert(url.to_string(), (Stub::Body(body.to_string()), Duration::ZERO));
        self
    }

    pub fn delayed_body(mut self, url: &str, body: &str, delay: Duration) -> Self {
        self.responses
            .insert(url.to_string(), (Stub::Body(body.to_string()), delay));
        self
    }

    pub fn status(mut self, url: &str, status: u16) -> Self {
        self.responses
            .insert(url.to_string(), (Stub::Status(status), Duration::ZERO));
        self
    }

    pub fn logging_to(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FeedReader, ImportError> {
        self.log.push(format!("fetch {url}"));
        let Some((stub, delay)) = self.responses.get(url) else {
            return Err(ImportError::fetch(url, anyhow!("connection refused")));
        };
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        match stub {
            Stub::Body(body) => Ok(reader_for(body)),
            Stub::Status(status) => Err(ImportError::fetch(
                url,
                anyhow!("HTTP status server error ({status})"),
            )),
        }
    }
}
