pub mod dead_letter;
pub mod insert;
pub mod offsets;
pub mod retry;
pub mod update;

pub use dead_letter::DeadLetterProducer;
pub use insert::InsertConsumer;
pub use update::UpdateConsumer;

use crate::config::Config;
use rdkafka::config::ClientConfig;

/// Shared consumer settings: manual commits so acknowledgment can be tied to
/// durable effects, `earliest` so unacknowledged history is reprocessed after
/// a restart. Offsets are stored by hand too — a delivery's offset enters the
/// consumer's stored state only once its effect is durable (flushed to the
/// store or dead-lettered), never as a side effect of polling.
fn base_consumer_config(cfg: &Config) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &cfg.kafka_brokers)
        .set("group.id", &cfg.group_id)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("session.timeout.ms", "30000")
        .set("heartbeat.interval.ms", "10000")
        .set("enable.partition.eof", "false");
    client
}
