use anyhow::Result;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, options::*, types::FieldTable};
use tokio_stream::StreamExt;

use crate::services::importer::Importer;
use crate::services::outcome::BatchReport;
use crate::services::task::{PreparedTask, TaskBatch, tasks_from_specs};

pub async fn create_channel(url: &str) -> lapin::Result<Channel> {
    let connection = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    Ok(channel)
}

pub async fn send_to_queue(channel: &Channel, report: &BatchReport, queue: &str) -> Result<()> {
    let payload = serde_json::to_vec(report)?;

    channel
        .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
        .await?;

    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default(),
        )
        .await?
        .await?;

    Ok(())
}

/// Decodes a `{ "tasks": [...] }` message body. Only an undecodable body is
/// an error; each task that fails validation keeps its own slot.
pub fn decode_batch(data: &[u8]) -> Result<Vec<PreparedTask>> {
    let batch: TaskBatch = serde_json::from_slice(data)?;
    Ok(tasks_from_specs(batch.tasks))
}

/// Consumes import batches until the channel closes. Each batch is acked
/// once every task in it has settled; undecodable messages are rejected
/// without requeue.
pub async fn process_imports_from_queue(
    channel: &Channel,
    importer: &Importer,
    queue: &str,
    result_queue: Option<&str>,
) -> Result<()> {
    channel
        .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
        .await?;

    let mut consumer = channel
        .basic_consume(
            queue,
            "feed_import",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    tracing::info!(queue, "waiting for import batches");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!(error = %err, "failed to consume message");
                continue;
            }
        };

        let tasks = match decode_batch(&delivery.data) {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    body = %String::from_utf8_lossy(&delivery.data),
                    "rejecting undecodable import batch"
                );
                channel
                    .basic_reject(
                        delivery.delivery_tag,
                        BasicRejectOptions { requeue: false },
                    )
                    .await?;
                continue;
            }
        };

        tracing::info!(tasks = tasks.len(), "import batch received");
        let report = BatchReport::new(importer.run_batch(&tasks).await);
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "import batch settled"
        );

        if let Some(result_queue) = result_queue {
            if let Err(err) = send_to_queue(channel, &report, result_queue).await {
                tracing::error!(error = %err, queue = result_queue, "failed to publish batch report");
            }
        }

        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await?;
    }
    Ok(())
}
