//! Update-stream consumer: runs mutation handlers with bounded concurrency
//! and acknowledges offsets through a contiguous-completion frontier, so a
//! fast later delivery never commits past a slow earlier one.

use crate::config::Config;
use crate::consumers::dead_letter::DeadLetterProducer;
use crate::consumers::offsets::OffsetTracker;
use crate::consumers::retry::RetryPolicy;
use crate::error::AppResult;
use crate::events;
use crate::services::MutationDispatcher;
use crate::store::ChatStore;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message as _;
use std::sync::Arc;
use tokio::time::sleep;

pub struct UpdateConsumer {
    consumer: StreamConsumer,
    dispatcher: Arc<MutationDispatcher>,
    dead_letters: Arc<DeadLetterProducer>,
    topic: String,
    concurrency: usize,
    retry: RetryPolicy,
}

impl UpdateConsumer {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn ChatStore>,
        dead_letters: Arc<DeadLetterProducer>,
    ) -> AppResult<Self> {
        let consumer: StreamConsumer = super::base_consumer_config(cfg).create()?;
        consumer.subscribe(&[cfg.update_topic.as_str()])?;

        Ok(Self {
            consumer,
            dispatcher: Arc::new(MutationDispatcher::new(store)),
            dead_letters,
            topic: cfg.update_topic.clone(),
            concurrency: cfg.mutation_concurrency.max(1),
            retry: RetryPolicy::with_max_retries(cfg.max_retries),
        })
    }

    pub async fn run(self) -> AppResult<()> {
        tracing::info!(
            topic = %self.topic,
            concurrency = self.concurrency,
            "update consumer started"
        );

        let mut tracker = OffsetTracker::default();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (i32, i64, bool)>> =
            FuturesUnordered::new();

        loop {
            tokio::select! {
                delivery = self.consumer.recv(), if in_flight.len() < self.concurrency => {
                    match delivery {
                        Ok(message) => {
                            let partition = message.partition();
                            let offset = message.offset();
                            let key = message.key().map(<[u8]>::to_vec);
                            let payload = message.payload().map(<[u8]>::to_vec);
                            tracker.begin(partition, offset);

                            let dispatcher = Arc::clone(&self.dispatcher);
                            let dead_letters = Arc::clone(&self.dead_letters);
                            let topic = self.topic.clone();
                            let retry = self.retry.clone();
                            in_flight.push(Box::pin(async move {
                                let acked = process_update(
                                    &dispatcher,
                                    &dead_letters,
                                    &topic,
                                    key.as_deref(),
                                    payload.as_deref(),
                                    &retry,
                                )
                                .await;
                                (partition, offset, acked)
                            }));
                        }
                        Err(e) => tracing::warn!(error = %e, "kafka recv error"),
                    }
                }
                Some((partition, offset, acked)) = in_flight.next(), if !in_flight.is_empty() => {
                    if acked {
                        if let Some(frontier) = tracker.complete(partition, offset) {
                            // The partition may have been revoked in a
                            // rebalance between recv and completion; the new
                            // owner resumes from the last committed offset.
                            if let Err(e) = self.consumer.store_offset(&self.topic, partition, frontier) {
                                tracing::warn!(error = %e, partition, "offset store failed");
                            } else if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Async) {
                                tracing::warn!(error = %e, "offset commit failed");
                            }
                        }
                    }
                    // A delivery that could not be acknowledged (dead-letter
                    // publish failed) stalls the frontier on purpose: the
                    // broker redelivers it after restart.
                }
            }
        }
    }
}

/// Handles one update delivery end to end. Returns whether it is safe to
/// acknowledge: the mutation was applied, or the payload was durably
/// dead-lettered.
async fn process_update(
    dispatcher: &MutationDispatcher,
    dead_letters: &DeadLetterProducer,
    topic: &str,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
    retry: &RetryPolicy,
) -> bool {
    let Some(payload) = payload else {
        tracing::warn!("update delivery with empty payload, skipping");
        return true;
    };

    let envelope = match events::decode_envelope(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable update payload, dead-lettering");
            return dead_letter(dead_letters, topic, key, payload, "decode").await;
        }
    };

    let mut attempt = 0;
    loop {
        match dispatcher.handle(envelope.clone()).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                let backoff = retry.get_backoff(attempt);
                attempt += 1;
                tracing::warn!(error = %e, attempt, "mutation failed, retrying after backoff");
                sleep(backoff).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "mutation failed permanently, dead-lettering");
                return dead_letter(dead_letters, topic, key, payload, "store").await;
            }
        }
    }
}

async fn dead_letter(
    dead_letters: &DeadLetterProducer,
    topic: &str,
    key: Option<&[u8]>,
    payload: &[u8],
    reason: &str,
) -> bool {
    match dead_letters.publish(topic, key, payload, reason).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "dead-letter publish failed; delivery left unacknowledged");
            false
        }
    }
}
