use std::fmt;
use std::sync::Arc;

use mongodb::bson::{self, Document};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::services::error::ImportError;
use crate::services::parser::{FeedFormat, Row};

pub type FilterBuilder = Arc<dyn Fn(&str) -> anyhow::Result<Document> + Send + Sync>;
pub type RowTransform = Box<dyn Fn(Row) -> Row + Send + Sync>;
/// Builds the per-row transform for a scope; called once per task.
pub type MapFactory = Arc<dyn Fn(&str) -> RowTransform + Send + Sync>;

/// Which documents of the target collection a task owns.
#[derive(Clone)]
pub enum ScopeFilter {
    Static(Document),
    Computed(FilterBuilder),
}

impl ScopeFilter {
    pub fn computed<F>(builder: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<Document> + Send + Sync + 'static,
    {
        ScopeFilter::Computed(Arc::new(builder))
    }

    pub fn resolve(&self, scope: &str) -> Result<Document, ImportError> {
        match self {
            ScopeFilter::Static(filter) => Ok(filter.clone()),
            ScopeFilter::Computed(builder) => {
                builder(scope).map_err(|cause| ImportError::ScopeResolution {
                    scope: scope.to_string(),
                    cause,
                })
            }
        }
    }
}

impl fmt::Debug for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeFilter::Static(filter) => f.debug_tuple("Static").field(filter).finish(),
            ScopeFilter::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Clone)]
pub struct ImportTask {
    pub url: String,
    pub collection_name: String,
    pub scope: String,
    pub scope_filter: ScopeFilter,
    pub map_data: Option<MapFactory>,
    pub format: FeedFormat,
    /// JSON Schema every stored row must satisfy.
    pub schema: Option<Value>,
}

impl ImportTask {
    pub fn new(
        url: impl Into<String>,
        collection_name: impl Into<String>,
        scope: impl Into<String>,
        scope_filter: ScopeFilter,
    ) -> Self {
        Self {
            url: url.into(),
            collection_name: collection_name.into(),
            scope: scope.into(),
            scope_filter,
            map_data: None,
            format: FeedFormat::default(),
            schema: None,
        }
    }

    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_map_data<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> RowTransform + Send + Sync + 'static,
    {
        self.map_data = Some(Arc::new(factory));
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn log_name(&self) -> String {
        format!("{}:{}", self.collection_name, self.scope)
    }

    /// Applies `map_data` to every row, keeping order and length.
    pub fn map_rows(&self, rows: Vec<Row>) -> Vec<Row> {
        match &self.map_data {
            Some(factory) => {
                let transform = factory(&self.scope);
                rows.into_iter().map(|row| transform(row)).collect()
            }
            None => rows,
        }
    }
}

impl fmt::Debug for ImportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportTask")
            .field("url", &self.url)
            .field("collection_name", &self.collection_name)
            .field("scope", &self.scope)
            .field("scope_filter", &self.scope_filter)
            .field("map_data", &self.map_data.as_ref().map(|_| ".."))
            .field("format", &self.format)
            .finish()
    }
}

/// Declarative form of an [`ImportTask`], as found in task files and queue
/// messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub url: String,
    pub collection: String,
    pub scope: String,
    /// Static scope filter.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Field holding the scope; gives the filter `{field: scope}` and is
    /// stamped onto every row.
    #[serde(default)]
    pub scope_field: Option<String>,
    /// Constant fields merged into every row.
    #[serde(default)]
    pub stamp: Map<String, Value>,
    #[serde(default)]
    pub format: FeedFormat,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskBatch {
    pub tasks: Vec<TaskSpec>,
}

impl TryFrom<TaskSpec> for ImportTask {
    type Error = ImportError;

    fn try_from(spec: TaskSpec) -> Result<Self, Self::Error> {
        let scope_filter = match (&spec.filter, &spec.scope_field) {
            (Some(filter), _) => ScopeFilter::Static(
                bson::to_document(filter)
                    .map_err(|e| ImportError::InvalidTask(format!("filter must be an object: {e}")))?,
            ),
            (None, Some(field)) => {
                let field = field.clone();
                ScopeFilter::computed(move |scope| {
                    let mut filter = Document::new();
                    filter.insert(field.clone(), scope);
                    Ok(filter)
                })
            }
            (None, None) => {
                return Err(ImportError::InvalidTask(format!(
                    "task {}:{} needs either `filter` or `scope_field`",
                    spec.collection, spec.scope
                )));
            }
        };

        let mut task = ImportTask::new(spec.url, spec.collection, spec.scope, scope_filter)
            .with_format(spec.format);
        if let Some(schema) = spec.schema {
            task = task.with_schema(schema);
        }

        if !spec.stamp.is_empty() || spec.scope_field.is_some() {
            let stamp = spec.stamp;
            let scope_field = spec.scope_field;
            task = task.with_map_data(move |scope| {
                let mut fields = stamp.clone();
                if let Some(field) = &scope_field {
                    fields.insert(field.clone(), Value::String(scope.to_string()));
                }
                Box::new(move |mut row: Row| {
                    for (key, value) in &fields {
                        row.insert(key.clone(), value.clone());
                    }
                    row
                })
            });
        }

        Ok(task)
    }
}

/// A declared task that could not be turned into an [`ImportTask`]. It still
/// owns its slot in the batch and reports as a failure there.
#[derive(Debug)]
pub struct RejectedTask {
    pub log_name: String,
    pub error: ImportError,
}

pub type PreparedTask = Result<ImportTask, RejectedTask>;

/// Converts every spec on its own; a bad spec never takes its siblings down.
pub fn tasks_from_specs(specs: Vec<TaskSpec>) -> Vec<PreparedTask> {
    specs
        .into_iter()
        .map(|spec| {
            let log_name = format!("{}:{}", spec.collection, spec.scope);
            ImportTask::try_from(spec).map_err(|error| RejectedTask { log_name, error })
        })
        .collect()
}
