use anyhow::{Context, Result, anyhow};
use aws_config::load_from_env;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

pub async fn create_client() -> Result<Client> {
    let config = load_from_env().await;
    let client = Client::new(&config);
    Ok(client)
}

/// Splits `s3://bucket/some/key.csv` into bucket and key.
pub fn parse_s3_url(url: &str) -> Result<(&str, &str)> {
    let location = url
        .strip_prefix("s3://")
        .ok_or_else(|| anyhow!("not an s3 url: {url}"))?;
    match location.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(anyhow!("s3 url needs both a bucket and a key: {url}")),
    }
}

pub async fn get_file_stream(client: &Client, bucket: &str, file_name: &str) -> Result<ByteStream> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(file_name)
        .send()
        .await
        .with_context(|| format!("get_object s3://{bucket}/{file_name}"))?;

    Ok(response.body)
}
