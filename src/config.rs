use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub kafka_brokers: String,
    pub group_id: String,
    pub insert_topic: String,
    pub update_topic: String,
    /// Appended to the source topic name to form the dead-letter topic.
    pub dlq_suffix: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub mutation_concurrency: usize,
    pub max_retries: u32,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let kafka_brokers =
            env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into());
        let group_id = env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "chat-ingest".into());
        let insert_topic =
            env::var("INSERT_TOPIC").unwrap_or_else(|_| "chat.messages.insert".into());
        let update_topic =
            env::var("UPDATE_TOPIC").unwrap_or_else(|_| "chat.messages.update".into());
        let dlq_suffix = env::var("DLQ_SUFFIX").unwrap_or_else(|_| ".dlq".into());

        Ok(Self {
            database_url,
            kafka_brokers,
            group_id,
            insert_topic,
            update_topic,
            dlq_suffix,
            batch_size: env_or("BATCH_SIZE", 20),
            flush_interval: Duration::from_millis(env_or("FLUSH_INTERVAL_MS", 5000)),
            mutation_concurrency: env_or("MUTATION_CONCURRENCY", 2),
            max_retries: env_or("MAX_RETRIES", 3),
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            kafka_brokers: "localhost:9092".into(),
            group_id: "chat-ingest".into(),
            insert_topic: "chat.messages.insert".into(),
            update_topic: "chat.messages.update".into(),
            dlq_suffix: ".dlq".into(),
            batch_size: 20,
            flush_interval: Duration::from_millis(5000),
            mutation_concurrency: 2,
            max_retries: 3,
        }
    }
}
