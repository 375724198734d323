use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::{Client, Collection, Database, options::ClientOptions};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::services::parser::Row;

pub const DEFAULT_CONNECTION: &str = "DEFAULT";

/// The three collection operations a replace-by-scope import needs.
#[async_trait]
pub trait ScopedCollection: Send + Sync {
    async fn count_documents(&self, filter: Document) -> Result<u64>;
    async fn delete_many(&self, filter: Document) -> Result<u64>;
    async fn insert_many(&self, rows: Vec<Row>) -> Result<u64>;
}

pub trait DocumentStore: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn ScopedCollection>;
}

pub struct MongoCollection {
    inner: Collection<Value>,
    batch_size: usize,
}

#[async_trait]
impl ScopedCollection for MongoCollection {
    async fn count_documents(&self, filter: Document) -> Result<u64> {
        Ok(self.inner.count_documents(filter, None).await?)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        let result = self.inner.delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }

    async fn insert_many(&self, rows: Vec<Row>) -> Result<u64> {
        let inner = &self.inner;
        insert_in_batches(rows, self.batch_size, |batch| async move {
            let result = inner.insert_many(batch, None).await?;
            Ok(result.inserted_ids.len() as u64)
        })
        .await
    }
}

/// Ordered inserts, `batch_size` rows per round trip, summing what each
/// round trip reports. A failing batch stops the loop and its error says how
/// many rows earlier batches already stored.
pub async fn insert_in_batches<F, Fut>(rows: Vec<Row>, batch_size: usize, mut insert: F) -> Result<u64>
where
    F: FnMut(Vec<Value>) -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let batch_size = batch_size.max(1);
    let mut inserted = 0u64;
    let mut rows = rows.into_iter().map(Value::Object).peekable();

    while rows.peek().is_some() {
        let batch: Vec<Value> = rows.by_ref().take(batch_size).collect();
        inserted += insert(batch)
            .await
            .with_context(|| format!("{inserted} rows were stored before the failing batch"))?;
    }
    Ok(inserted)
}

pub struct MongoStore {
    database: Database,
    batch_size: usize,
}

impl MongoStore {
    pub fn new(database: Database, batch_size: usize) -> Self {
        Self {
            database,
            batch_size: batch_size.max(1),
        }
    }
}

impl DocumentStore for MongoStore {
    fn collection(&self, name: &str) -> Arc<dyn ScopedCollection> {
        Arc::new(MongoCollection {
            inner: self.database.collection::<Value>(name),
            batch_size: self.batch_size,
        })
    }
}

/// Where a named connection points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub url: String,
    pub database: String,
}

impl ConnectionSettings {
    /// `MONGODB_<NAME>_URL` / `MONGODB_<NAME>_DB`; the default connection
    /// also honours `MONGO_URL` / `DATABASE_NAME`.
    pub fn resolve(name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let name = name.to_uppercase();
        let mut url = lookup(&format!("MONGODB_{name}_URL"));
        let mut database = lookup(&format!("MONGODB_{name}_DB"));
        if name == DEFAULT_CONNECTION {
            url = url.or_else(|| lookup("MONGO_URL"));
            database = database.or_else(|| lookup("DATABASE_NAME"));
        }
        Self {
            url: url.unwrap_or(String::from("mongodb://localhost:27017")),
            database: database.unwrap_or(String::from("feed_import")),
        }
    }
}

/// Opens MongoDB clients on first use and hands out the cached client
/// afterwards. Owned by the caller, which closes everything with
/// [`StoreProvider::shutdown`].
pub struct StoreProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
    clients: Mutex<HashMap<String, (Client, String)>>,
}

impl StoreProvider {
    pub fn new(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(|key| std::env::var(key).ok())
    }

    pub async fn database(&self, name: &str) -> Result<Database> {
        let mut clients = self.clients.lock().await;
        if let Some((client, database)) = clients.get(name) {
            return Ok(client.database(database));
        }

        let settings = ConnectionSettings::resolve(name, &self.lookup);
        let client = create_mongo_client(&settings.url)
            .await
            .with_context(|| format!("connecting MongoDB connection {name}"))?;
        tracing::info!(connection = name, database = %settings.database, "mongodb client created");

        let database = client.database(&settings.database);
        clients.insert(name.to_string(), (client, settings.database));
        Ok(database)
    }

    pub async fn open_connections(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Runs `work` and closes every cached client afterwards, whatever
    /// `work` returned.
    pub async fn closing_after<T>(&self, work: impl Future<Output = T>) -> T {
        let result = work.await;
        self.shutdown().await;
        result
    }

    pub async fn shutdown(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (name, (client, _)) in clients {
            client.shutdown().await;
            tracing::debug!(connection = %name, "mongodb client closed");
        }
    }
}

pub async fn create_mongo_client(url: &str) -> Result<Client> {
    let client = Client::with_options(ClientOptions::parse(url).await?)?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::rows;
    use serde_json::json;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn default_connection_falls_back_to_plain_variables() {
        let settings = ConnectionSettings::resolve(
            "DEFAULT",
            env(&[("MONGO_URL", "mongodb://db:27017"), ("DATABASE_NAME", "shop")]),
        );
        assert_eq!(settings.url, "mongodb://db:27017");
        assert_eq!(settings.database, "shop");
    }

    #[test]
    fn named_connection_uses_prefixed_variables() {
        let settings = ConnectionSettings::resolve(
            "reports",
            env(&[
                ("MONGODB_REPORTS_URL", "mongodb://reports:27017"),
                ("MONGODB_REPORTS_DB", "bi"),
                ("MONGO_URL", "mongodb://ignored:27017"),
            ]),
        );
        assert_eq!(settings.url, "mongodb://reports:27017");
        assert_eq!(settings.database, "bi");
    }

    #[test]
    fn missing_variables_use_local_defaults() {
        let settings = ConnectionSettings::resolve("DEFAULT", env(&[]));
        assert_eq!(settings.url, "mongodb://localhost:27017");
        assert_eq!(settings.database, "feed_import");
    }

    #[tokio::test]
    async fn batches_are_chunked_and_counts_summed() {
        let mut sizes = Vec::new();
        let inserted = insert_in_batches(rows(5), 2, |batch| {
            sizes.push(batch.len());
            async move { Ok(batch.len() as u64) }
        })
        .await
        .unwrap();

        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(inserted, 5);
    }

    #[tokio::test]
    async fn batch_size_one_inserts_row_by_row_in_order() {
        let mut seen = Vec::new();
        let inserted = insert_in_batches(rows(3), 1, |batch| {
            seen.extend(batch.iter().map(|row| row["n"].clone()));
            async move { Ok(batch.len() as u64) }
        })
        .await
        .unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(seen, [json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn zero_batch_size_still_makes_progress() {
        let mut calls = 0;
        let inserted = insert_in_batches(rows(2), 0, |batch| {
            calls += 1;
            async move { Ok(batch.len() as u64) }
        })
        .await
        .unwrap();

        assert_eq!((inserted, calls), (2, 2));
    }

    #[tokio::test]
    async fn failing_batch_reports_rows_already_stored() {
        let mut round = 0;
        let err = insert_in_batches(rows(5), 2, |batch| {
            round += 1;
            let fail = round == 2;
            async move {
                if fail {
                    Err(anyhow::anyhow!("duplicate key"))
                } else {
                    Ok(batch.len() as u64)
                }
            }
        })
        .await
        .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("2 rows were stored before the failing batch"), "{message}");
        assert!(message.contains("duplicate key"), "{message}");
        assert_eq!(round, 2);
    }

    #[tokio::test]
    async fn empty_input_never_calls_insert() {
        let mut calls = 0;
        let inserted = insert_in_batches(Vec::new(), 10, |_| {
            calls += 1;
            async { Err(anyhow::anyhow!("no batch expected")) }
        })
        .await
        .unwrap();
        assert_eq!((inserted, calls), (0, 0));
    }

    #[tokio::test]
    async fn closing_after_shuts_down_even_on_error() {
        let provider = StoreProvider::new(env(&[("MONGO_URL", "mongodb://localhost:27017")]));
        provider.database("DEFAULT").await.unwrap();

        let result: Result<()> = provider
            .closing_after(async { Err(anyhow::anyhow!("bad tasks file")) })
            .await;

        assert!(result.is_err());
        assert_eq!(provider.open_connections().await, 0);
    }

    #[tokio::test]
    async fn provider_caches_one_client_per_name() {
        let provider = StoreProvider::new(env(&[("MONGO_URL", "mongodb://localhost:27017")]));

        let first = provider.database("DEFAULT").await.unwrap();
        let second = provider.database("DEFAULT").await.unwrap();
        assert_eq!(first.name(), second.name());
        assert_eq!(provider.open_connections().await, 1);
        drop((first, second));

        provider.shutdown().await;
        assert_eq!(provider.open_connections().await, 0);
    }
}
