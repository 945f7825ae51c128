use crate::config::{SqsConfig, StorageConfig};
use crate::envelope::RawEnvelope;
use crate::outcome::{BatchReport, CorrelationId, Disposition, Outcome};
use crate::pipeline::IntakePipeline;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Builder as SqsConfigBuilder;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What happens to a transport message once its outcomes are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Remove from the queue.
    Delete,
    /// Make visible again for redelivery.
    Release,
    /// Report to the dead-letter queue, then remove.
    DeadLetter,
}

impl From<Disposition> for Settlement {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Success => Settlement::Delete,
            Disposition::Retryable => Settlement::Release,
            Disposition::Permanent => Settlement::DeadLetter,
        }
    }
}

/// Body published to the dead-letter queue for a rejected message.
#[derive(Debug, Serialize)]
struct DeadLetterReport<'a> {
    message_id: &'a str,
    original_body: Option<&'a str>,
    outcomes: Vec<&'a Outcome>,
}

/// Long-polls the notification queue and feeds batches through the pipeline
pub struct SqsConsumer {
    client: SqsClient,
    config: SqsConfig,
    queue_url: String,
    pipeline: Arc<IntakePipeline>,
}

impl SqsConsumer {
    /// Create a new SQS consumer
    pub async fn new(
        config: &SqsConfig,
        storage: &StorageConfig,
        pipeline: Arc<IntakePipeline>,
    ) -> Result<Self> {
        let queue_url = config
            .queue_url
            .clone()
            .context("sqs.queue_url is required")?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(storage.region.clone()))
            .load()
            .await;

        // Same endpoint override as storage, for LocalStack
        let mut sqs_config_builder = SqsConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = storage.endpoint_url {
            sqs_config_builder = sqs_config_builder.endpoint_url(endpoint_url);
        }
        let client = SqsClient::from_conf(sqs_config_builder.build());

        info!(
            queue_url = %queue_url,
            dead_letter_queue_url = ?config.dead_letter_queue_url,
            "SQS consumer initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
            queue_url,
            pipeline,
        })
    }

    /// Poll until `shutdown` fires. A batch in flight is finished first.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting SQS consumer");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.receive() => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => continue,
                Ok(messages) => self.handle_batch(&messages).await,
                Err(e) => {
                    error!(error = %e, "Failed to receive messages");
                    metrics::counter!("intake.sqs.errors").increment(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("SQS consumer stopped");
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.config.max_messages)
            .wait_time_seconds(self.config.wait_time_secs)
            .visibility_timeout(self.config.visibility_timeout_secs)
            .send()
            .await
            .context("ReceiveMessage failed")?;

        Ok(output.messages().to_vec())
    }

    /// Process one received batch and settle every message in it.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn handle_batch(&self, messages: &[Message]) {
        metrics::counter!("intake.sqs.messages.received").increment(messages.len() as u64);

        let envelope = envelope_from_messages(messages);
        let report = self.pipeline.process_envelope(&envelope).await;
        let dispositions = report.dispositions();

        for (index, message) in messages.iter().enumerate() {
            let correlation_id = CorrelationId::for_record(message.message_id(), index);
            // A message with no object-created records has nothing left to do
            let disposition = dispositions
                .get(correlation_id.as_str())
                .copied()
                .unwrap_or(Disposition::Success);

            if let Err(e) = self.settle(message, &correlation_id, disposition, &report).await {
                error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to settle message"
                );
                metrics::counter!("intake.sqs.errors").increment(1);
            }
        }
    }

    async fn settle(
        &self,
        message: &Message,
        correlation_id: &CorrelationId,
        disposition: Disposition,
        report: &BatchReport,
    ) -> Result<()> {
        let receipt_handle = message
            .receipt_handle()
            .context("Message has no receipt handle")?;
        let settlement = Settlement::from(disposition);

        debug!(
            correlation_id = %correlation_id,
            settlement = ?settlement,
            "Settling message"
        );

        match settlement {
            Settlement::Delete => self.delete(receipt_handle).await?,
            Settlement::Release => {
                self.client
                    .change_message_visibility()
                    .queue_url(&self.queue_url)
                    .receipt_handle(receipt_handle)
                    .visibility_timeout(0)
                    .send()
                    .await
                    .context("ChangeMessageVisibility failed")?;
            }
            Settlement::DeadLetter => match self.config.dead_letter_queue_url {
                Some(ref dlq_url) => {
                    let body = dead_letter_body(message, correlation_id, report)?;
                    self.client
                        .send_message()
                        .queue_url(dlq_url)
                        .message_body(body)
                        .send()
                        .await
                        .context("SendMessage to dead-letter queue failed")?;
                    self.delete(receipt_handle).await?;
                }
                None => {
                    // Left in flight; the queue's redrive policy moves it
                    // after maxReceiveCount deliveries.
                    warn!(
                        correlation_id = %correlation_id,
                        "No dead-letter queue configured, leaving rejected message on the queue"
                    );
                }
            },
        }

        metrics::counter!(
            "intake.sqs.messages.settled",
            "settlement" => format!("{settlement:?}").to_lowercase()
        )
        .increment(1);

        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("DeleteMessage failed")?;
        Ok(())
    }
}

/// Build the transport batch the pipeline decodes from received messages.
pub fn envelope_from_messages(messages: &[Message]) -> RawEnvelope {
    let records = messages
        .iter()
        .map(|message| {
            let mut record = json!({});
            if let Some(id) = message.message_id() {
                record["messageId"] = Value::from(id);
            }
            if let Some(handle) = message.receipt_handle() {
                record["receiptHandle"] = Value::from(handle);
            }
            if let Some(body) = message.body() {
                record["body"] = Value::from(body);
            }
            record
        })
        .collect();

    RawEnvelope { records }
}

fn dead_letter_body(
    message: &Message,
    correlation_id: &CorrelationId,
    report: &BatchReport,
) -> Result<String> {
    let dead_letter = DeadLetterReport {
        message_id: correlation_id.as_str(),
        original_body: message.body(),
        outcomes: report.outcomes_for(correlation_id.as_str()).collect(),
    };
    serde_json::to_string(&dead_letter).context("Failed to serialize dead-letter report")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{self, DecodeStage};
    use crate::outcome::FailureKind;

    fn message(id: &str, body: &str) -> Message {
        Message::builder()
            .message_id(id)
            .receipt_handle(format!("handle-{id}"))
            .body(body)
            .build()
    }

    #[test]
    fn test_settlement_follows_disposition() {
        assert_eq!(Settlement::from(Disposition::Success), Settlement::Delete);
        assert_eq!(Settlement::from(Disposition::Retryable), Settlement::Release);
        assert_eq!(Settlement::from(Disposition::Permanent), Settlement::DeadLetter);
    }

    #[test]
    fn test_envelope_from_messages() {
        let messages = vec![message("m1", "{}"), Message::builder().message_id("m2").build()];

        let envelope = envelope_from_messages(&messages);

        assert_eq!(envelope.records.len(), 2);
        assert_eq!(envelope.records[0]["messageId"], "m1");
        assert_eq!(envelope.records[0]["receiptHandle"], "handle-m1");
        assert_eq!(envelope.records[0]["body"], "{}");
        assert!(envelope.records[1].get("body").is_none());

        // a message without body is a malformed record, tied to its own id
        let entries = envelope::parse(&envelope);
        let missing_body = entries
            .iter()
            .find(|e| e.correlation_id.as_str() == "m2")
            .unwrap();
        assert_eq!(
            missing_body.item.as_ref().unwrap_err().stage(),
            DecodeStage::TransportRecord
        );
    }

    #[test]
    fn test_dead_letter_body_carries_outcomes() {
        let report = BatchReport::new(vec![Outcome::failure(
            CorrelationId::new("m1"),
            None,
            FailureKind::MalformedEnvelope,
            vec!["bad body".to_string()],
        )]);
        let message = message("m1", "not json");

        let body = dead_letter_body(&message, &CorrelationId::new("m1"), &report).unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["message_id"], "m1");
        assert_eq!(value["original_body"], "not json");
        assert_eq!(value["outcomes"][0]["failure"], "malformed_envelope");
    }
}
