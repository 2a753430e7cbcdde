use chat_ingest_service::consumers::{DeadLetterProducer, InsertConsumer, UpdateConsumer};
use chat_ingest_service::store::postgres::PgStore;
use chat_ingest_service::store::ChatStore;
use chat_ingest_service::{config, db, error, logging};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    // Store connectivity is the one fatal startup condition: no retry loop,
    // exit 1 and let the supervisor restart us.
    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::Startup(format!("db: {e}")))?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| error::AppError::Startup(format!("database migrations failed: {e}")))?;

    let store: Arc<dyn ChatStore> = Arc::new(PgStore::new(pool));
    let dead_letters = Arc::new(DeadLetterProducer::new(&cfg.kafka_brokers, &cfg.dlq_suffix)?);

    let insert = InsertConsumer::new(&cfg, Arc::clone(&store), Arc::clone(&dead_letters))?;
    let update = UpdateConsumer::new(&cfg, store, dead_letters)?;

    tracing::info!(
        insert_topic = %cfg.insert_topic,
        update_topic = %cfg.update_topic,
        brokers = %cfg.kafka_brokers,
        "starting chat-ingest-service"
    );

    let insert_task = tokio::spawn(insert.run());
    let update_task = tokio::spawn(update.run());

    // Both loops run forever; reaching this point means one of them died.
    let failure = tokio::select! {
        res = insert_task => describe_exit("insert consumer", res),
        res = update_task => describe_exit("update consumer", res),
    };
    Err(error::AppError::Startup(failure))
}

fn describe_exit(
    name: &str,
    result: Result<Result<(), error::AppError>, tokio::task::JoinError>,
) -> String {
    match result {
        Ok(Ok(())) => format!("{name} exited unexpectedly"),
        Ok(Err(e)) => format!("{name} failed: {e}"),
        Err(e) => format!("{name} panicked: {e}"),
    }
}
