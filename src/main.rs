use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use feed_import::helpers::logging::init_logging;
use feed_import::services::config::{Settings, load_tasks_file};
use feed_import::services::database::{MongoStore, StoreProvider};
use feed_import::services::feed::HttpFeedFetcher;
use feed_import::services::importer::Importer;
use feed_import::services::outcome::BatchReport;
use feed_import::services::queue::{create_channel, process_imports_from_queue};
use feed_import::services::s3::create_client;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let settings = Settings::from_env()?;
    init_logging(settings.debug)?;

    let s3_client = create_client().await?;
    let fetcher = HttpFeedFetcher::new(settings.fetch_timeout)?.with_s3(s3_client);

    let provider = StoreProvider::from_env();
    let database = provider.database(&settings.connection).await?;
    let store = MongoStore::new(database, settings.insert_batch_size);
    let importer = Importer::new(Arc::new(fetcher), Arc::new(store));

    provider.closing_after(run(&settings, &importer)).await
}

async fn run(settings: &Settings, importer: &Importer) -> Result<ExitCode> {
    match &settings.tasks_file {
        Some(path) => {
            let tasks = load_tasks_file(path)?;
            tracing::info!(tasks = tasks.len(), file = %path.display(), "running import batch");

            let report = BatchReport::new(importer.run_batch(&tasks).await);
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("encoding batch report")?
            );
            if report.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        None => {
            let channel = create_channel(&settings.rmq_url).await?;
            process_imports_from_queue(
                &channel,
                importer,
                &settings.queue,
                settings.result_queue.as_deref(),
            )
            .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
