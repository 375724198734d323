use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::services::error::ImportError;
use crate::services::s3::{get_file_stream, parse_s3_url};

/// Body of a feed, consumed incrementally by the parsers.
pub type FeedReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FeedReader, ImportError>;
}

/// Fetches `http(s)://` feeds with reqwest and `s3://bucket/key` objects
/// with the S3 client, when one is configured.
pub struct HttpFeedFetcher {
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            s3: None,
        })
    }

    pub fn with_s3(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3 = Some(client);
        self
    }

    async fn fetch_http(&self, url: &str) -> Result<FeedReader, ImportError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ImportError::fetch(url, e))?;

        tracing::debug!(url, status = %response.status(), "feed response received");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn fetch_s3(&self, url: &str) -> Result<FeedReader, ImportError> {
        let client = self.s3.as_ref().ok_or_else(|| {
            ImportError::fetch(url, anyhow::anyhow!("no S3 client configured"))
        })?;
        let (bucket, key) = parse_s3_url(url).map_err(|e| ImportError::fetch(url, e))?;
        let stream = get_file_stream(client, bucket, key)
            .await
            .map_err(|e| ImportError::fetch(url, e))?;
        Ok(Box::pin(stream.into_async_read()))
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FeedReader, ImportError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url).await
        } else if url.starts_with("s3://") {
            self.fetch_s3(url).await
        } else {
            Err(ImportError::fetch(
                url,
                anyhow::anyhow!("unsupported feed url scheme"),
            ))
        }
    }
}
