use csv_async::{AsyncReaderBuilder, ErrorKind, Trim};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt;

use crate::services::error::ImportError;
use crate::services::feed::FeedReader;
use crate::services::xml;

/// One parsed record, field order preserved as it appeared in the feed.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: char,
    pub has_headers: bool,
    /// Field names to use instead of the header row, or for header-less feeds.
    pub columns: Option<Vec<String>>,
    pub trim: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_headers: true,
            columns: None,
            trim: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlOptions {
    /// Dotted path from the document root to the repeated row element.
    pub row_path: String,
}

impl Default for XmlOptions {
    fn default() -> Self {
        Self {
            row_path: "rows.row".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedFormat {
    Csv(CsvOptions),
    Xml(XmlOptions),
}

impl Default for FeedFormat {
    fn default() -> Self {
        FeedFormat::Csv(CsvOptions::default())
    }
}

impl FeedFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FeedFormat::Csv(_) => "csv",
            FeedFormat::Xml(_) => "xml",
        }
    }
}

pub async fn parse_feed(
    reader: FeedReader,
    format: &FeedFormat,
    url: &str,
) -> Result<Vec<Row>, ImportError> {
    match format {
        FeedFormat::Csv(options) => parse_csv(reader, options, url).await,
        FeedFormat::Xml(options) => {
            let mut body = Vec::new();
            let mut reader = reader;
            reader
                .read_to_end(&mut body)
                .await
                .map_err(|e| ImportError::fetch(url, e))?;
            xml::extract_rows(&body, &options.row_path).map_err(|e| ImportError::parse(url, "xml", e))
        }
    }
}

/// Streams CSV records off the reader, so the body is never held in memory
/// as a whole. Short rows simply lack their trailing fields.
async fn parse_csv(
    reader: FeedReader,
    options: &CsvOptions,
    url: &str,
) -> Result<Vec<Row>, ImportError> {
    if !options.delimiter.is_ascii() {
        return Err(ImportError::InvalidTask(format!(
            "csv delimiter {:?} is not a single-byte character",
            options.delimiter
        )));
    }

    let mut reader = AsyncReaderBuilder::new()
        .delimiter(options.delimiter as u8)
        .has_headers(options.has_headers)
        .flexible(true)
        .trim(if options.trim { Trim::All } else { Trim::None })
        .create_reader(tokio::io::BufReader::new(reader));

    let header_row: Vec<String> = if options.has_headers {
        reader
            .headers()
            .await
            .map_err(|e| csv_error(url, e))?
            .iter()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };
    let mut columns = options.columns.clone().unwrap_or(header_row);

    let mut rows = Vec::new();
    let mut records = reader.into_records();

    while let Some(record) = records.next().await {
        let record = record.map_err(|e| csv_error(url, e))?;

        if columns.len() < record.len() && !options.has_headers && options.columns.is_none() {
            columns.extend((columns.len()..record.len()).map(|i| format!("field{}", i + 1)));
        }

        let mut row = Row::new();
        for (i, field) in columns.iter().enumerate() {
            if let Some(value) = record.get(i) {
                row.insert(field.clone(), Value::String(value.to_string()));
            }
        }
        rows.push(row);
    }

    tracing::debug!(url, rows = rows.len(), "parsed csv feed");
    Ok(rows)
}

fn csv_error(url: &str, err: csv_async::Error) -> ImportError {
    if let ErrorKind::Io(_) = err.kind() {
        return ImportError::fetch(url, err);
    }
    ImportError::parse(url, "csv", err)
}
