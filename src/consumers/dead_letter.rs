use crate::error::{AppError, AppResult};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

/// Publishes undecodable or retry-exhausted payloads to `<topic><suffix>`.
/// A delivery is only acknowledged once its dead-letter copy is confirmed, so
/// nothing is silently dropped.
#[derive(Clone)]
pub struct DeadLetterProducer {
    producer: FutureProducer,
    suffix: String,
}

impl DeadLetterProducer {
    pub fn new(brokers: &str, suffix: &str) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .create()?;

        Ok(Self {
            producer,
            suffix: suffix.to_string(),
        })
    }

    pub async fn publish(
        &self,
        source_topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        reason: &str,
    ) -> AppResult<()> {
        let topic = format!("{source_topic}{}", self.suffix);
        let record = FutureRecord::to(&topic)
            .key(key.unwrap_or_default())
            .payload(payload)
            .headers(OwnedHeaders::new().insert(Header {
                key: "reason",
                value: Some(reason),
            }));

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| AppError::DeadLetter(e.to_string()))?;

        tracing::info!(%topic, reason, "payload dead-lettered");
        Ok(())
    }
}
