//! Insert-stream consumer: decodes message events into the batcher and
//! acknowledges each delivery only once its effect is durable — flushed to
//! the store, or dead-lettered for undecodable payloads.

use crate::config::Config;
use crate::consumers::dead_letter::DeadLetterProducer;
use crate::consumers::offsets::OffsetTracker;
use crate::consumers::retry::RetryPolicy;
use crate::error::AppResult;
use crate::events;
use crate::services::InsertBatcher;
use crate::store::ChatStore;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

pub struct InsertConsumer {
    consumer: StreamConsumer,
    batcher: InsertBatcher,
    dead_letters: Arc<DeadLetterProducer>,
    topic: String,
    flush_interval: Duration,
    retry: RetryPolicy,
}

/// Acknowledgment state for the insert loop. Auto offset store is off, so a
/// delivery's offset becomes committable only when this marks it complete:
/// immediately for dead-lettered payloads, and as a unit when the flush
/// holding the buffered deliveries succeeds. A delivery whose dead-letter
/// publish failed is never completed, which stalls the partition frontier
/// until the broker redelivers it.
#[derive(Default)]
struct AckState {
    tracker: OffsetTracker,
    /// Offsets of deliveries currently sitting in the buffer, in arrival
    /// order. Survives failed flushes alongside the requeued batch.
    buffered: Vec<(i32, i64)>,
}

impl AckState {
    fn complete_and_store(
        &mut self,
        consumer: &StreamConsumer,
        topic: &str,
        partition: i32,
        offset: i64,
    ) {
        if let Some(frontier) = self.tracker.complete(partition, offset) {
            // The partition may have been revoked in a rebalance; the new
            // owner resumes from the last committed offset.
            if let Err(e) = consumer.store_offset(topic, partition, frontier) {
                tracing::warn!(error = %e, partition, "offset store failed");
            }
        }
    }
}

impl InsertConsumer {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn ChatStore>,
        dead_letters: Arc<DeadLetterProducer>,
    ) -> AppResult<Self> {
        let consumer: StreamConsumer = super::base_consumer_config(cfg).create()?;
        consumer.subscribe(&[cfg.insert_topic.as_str()])?;

        Ok(Self {
            consumer,
            batcher: InsertBatcher::new(store, cfg.batch_size),
            dead_letters,
            topic: cfg.insert_topic.clone(),
            flush_interval: cfg.flush_interval,
            retry: RetryPolicy::with_max_retries(cfg.max_retries),
        })
    }

    pub async fn run(self) -> AppResult<()> {
        let InsertConsumer {
            consumer,
            mut batcher,
            dead_letters,
            topic,
            flush_interval,
            retry,
        } = self;

        tracing::info!(topic = %topic, "insert consumer started");
        let mut ticker = interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut acks = AckState::default();

        loop {
            tokio::select! {
                // Stop fetching while the buffer is saturated (flushes keep
                // failing); the ticker keeps retrying and fetching resumes
                // once a flush drains the backlog.
                delivery = consumer.recv(), if !batcher.is_saturated() => {
                    match delivery {
                        Ok(message) => {
                            on_delivery(
                                &message,
                                &mut batcher,
                                &consumer,
                                &dead_letters,
                                &topic,
                                &retry,
                                &mut acks,
                            )
                            .await;
                        }
                        Err(e) => tracing::warn!(error = %e, "kafka recv error"),
                    }
                }
                _ = ticker.tick() => {
                    if batcher.has_work() {
                        flush_and_commit(&mut batcher, &consumer, &topic, &retry, &mut acks)
                            .await;
                    }
                }
            }
        }
    }
}

async fn on_delivery(
    message: &BorrowedMessage<'_>,
    batcher: &mut InsertBatcher,
    consumer: &StreamConsumer,
    dead_letters: &DeadLetterProducer,
    topic: &str,
    retry: &RetryPolicy,
    acks: &mut AckState,
) {
    let partition = message.partition();
    let offset = message.offset();
    acks.tracker.begin(partition, offset);

    let Some(payload) = message.payload() else {
        tracing::warn!("insert delivery with empty payload, skipping");
        acks.complete_and_store(consumer, topic, partition, offset);
        return;
    };

    match events::decode_insert(payload) {
        Ok(event) => {
            acks.buffered.push((partition, offset));
            if batcher.submit(event.into_message()) {
                flush_and_commit(batcher, consumer, topic, retry, acks).await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "undecodable insert payload, dead-lettering");
            match dead_letters
                .publish(topic, message.key(), payload, "decode")
                .await
            {
                Ok(()) => acks.complete_and_store(consumer, topic, partition, offset),
                Err(e) => {
                    // Neither applied nor dead-lettered: the offset stays
                    // pending in the tracker, so no later commit can
                    // acknowledge past it.
                    tracing::error!(
                        error = %e,
                        "dead-letter publish failed; delivery left unacknowledged"
                    );
                }
            }
        }
    }
}

/// Flushes the batcher, retrying transient store failures with backoff. On
/// success the buffered deliveries' offsets are stored and committed; on a
/// persistent failure the batch stays requeued, the offsets stay pending, and
/// the next tick retries.
async fn flush_and_commit(
    batcher: &mut InsertBatcher,
    consumer: &StreamConsumer,
    topic: &str,
    retry: &RetryPolicy,
    acks: &mut AckState,
) {
    let mut attempt = 0;
    loop {
        match batcher.flush().await {
            Ok(outcome) => {
                tracing::info!(
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    lagging = outcome.lagging_conversations,
                    "flushed insert batch"
                );
                let flushed = std::mem::take(&mut acks.buffered);
                for (partition, offset) in flushed {
                    acks.complete_and_store(consumer, topic, partition, offset);
                }
                if let Err(e) = consumer.commit_consumer_state(CommitMode::Async) {
                    tracing::warn!(error = %e, "offset commit failed");
                }
                return;
            }
            Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                let backoff = retry.get_backoff(attempt);
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    "bulk insert failed, retrying after backoff"
                );
                sleep(backoff).await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    buffered = batcher.len(),
                    "bulk insert failed, batch requeued; offsets not committed"
                );
                return;
            }
        }
    }
}
