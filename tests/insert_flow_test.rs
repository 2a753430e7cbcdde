mod common;

use chat_ingest_service::services::InsertBatcher;
use chat_ingest_service::store::ChatStore;
use common::{message_in, MemoryStore};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn threshold_flush_then_timer_flush_keeps_pointers_consistent() {
    let store = Arc::new(MemoryStore::new());
    let conv1 = Uuid::new_v4();
    let conv2 = Uuid::new_v4();
    store.seed_conversation(conv1, vec![Uuid::new_v4(), Uuid::new_v4()]);
    store.seed_conversation(conv2, vec![Uuid::new_v4(), Uuid::new_v4()]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 2);

    let a = message_in(conv1);
    let b = message_in(conv1);
    assert!(!batcher.submit(a.clone()));
    // Second append reaches the threshold.
    assert!(batcher.submit(b.clone()));
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 2);

    let conversation = store.conversation(conv1).unwrap();
    assert_eq!(conversation.message_ids, vec![a.mes_id, b.mes_id]);
    assert_eq!(conversation.last_message_id, Some(b.mes_id));

    // Timer fires before the threshold is reached for the next batch.
    let c = message_in(conv2);
    assert!(!batcher.submit(c.clone()));
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert!(batcher.is_empty());

    let conversation = store.conversation(conv2).unwrap();
    assert_eq!(conversation.message_ids, vec![c.mes_id]);
    assert_eq!(conversation.last_message_id, Some(c.mes_id));
}

#[tokio::test]
async fn interleaved_conversations_preserve_per_conversation_order() {
    let store = Arc::new(MemoryStore::new());
    let conv1 = Uuid::new_v4();
    let conv2 = Uuid::new_v4();
    store.seed_conversation(conv1, vec![]);
    store.seed_conversation(conv2, vec![]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 10);
    let m1 = message_in(conv1);
    let m2 = message_in(conv2);
    let m3 = message_in(conv1);
    let m4 = message_in(conv2);
    for m in [&m1, &m2, &m3, &m4] {
        batcher.submit(m.clone());
    }
    batcher.flush().await.unwrap();

    assert_eq!(
        store.conversation(conv1).unwrap().message_ids,
        vec![m1.mes_id, m3.mes_id]
    );
    assert_eq!(
        store.conversation(conv1).unwrap().last_message_id,
        Some(m3.mes_id)
    );
    assert_eq!(
        store.conversation(conv2).unwrap().message_ids,
        vec![m2.mes_id, m4.mes_id]
    );
    assert_eq!(
        store.conversation(conv2).unwrap().last_message_id,
        Some(m4.mes_id)
    );
}

#[tokio::test]
async fn redelivered_insert_does_not_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let conv = Uuid::new_v4();
    store.seed_conversation(conv, vec![]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 10);
    let a = message_in(conv);
    batcher.submit(a.clone());
    batcher.flush().await.unwrap();

    // Broker redelivers A alongside a genuinely new B.
    let b = message_in(conv);
    batcher.submit(a.clone());
    batcher.submit(b.clone());
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.duplicates, 1);

    assert_eq!(store.message_count(), 2);
    let conversation = store.conversation(conv).unwrap();
    assert_eq!(conversation.message_ids, vec![a.mes_id, b.mes_id]);
    assert_eq!(conversation.last_message_id, Some(b.mes_id));
}

#[tokio::test]
async fn failed_bulk_insert_requeues_batch_instead_of_dropping_it() {
    let store = Arc::new(MemoryStore::new());
    let conv = Uuid::new_v4();
    store.seed_conversation(conv, vec![]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 10);
    let a = message_in(conv);
    batcher.submit(a.clone());

    store.set_fail_insert(true);
    let err = batcher.flush().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(batcher.len(), 1);
    assert_eq!(store.message_count(), 0);

    store.set_fail_insert(false);
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert!(store.message(a.mes_id).is_some());
}

#[tokio::test]
async fn failed_pointer_update_is_repaired_on_a_later_flush() {
    let store = Arc::new(MemoryStore::new());
    let conv = Uuid::new_v4();
    store.seed_conversation(conv, vec![]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 10);
    let a = message_in(conv);
    batcher.submit(a.clone());

    store.set_fail_append(true);
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.lagging_conversations, 1);
    assert_eq!(batcher.pending_repairs(), 1);
    // The message is durable even though the pointer lags.
    assert!(store.message(a.mes_id).is_some());
    assert_eq!(store.conversation(conv).unwrap().last_message_id, None);

    store.set_fail_append(false);
    let b = message_in(conv);
    batcher.submit(b.clone());
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.lagging_conversations, 0);
    assert_eq!(batcher.pending_repairs(), 0);

    let conversation = store.conversation(conv).unwrap();
    assert_eq!(conversation.message_ids, vec![a.mes_id, b.mes_id]);
    assert_eq!(conversation.last_message_id, Some(b.mes_id));
}

#[tokio::test]
async fn saturated_buffer_signals_backpressure_until_a_flush_drains_it() {
    let store = Arc::new(MemoryStore::new());
    let conv = Uuid::new_v4();
    store.seed_conversation(conv, vec![]);

    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 2);

    // Store down: flushes fail and requeue, so the buffer grows past the
    // threshold until it hits the cap.
    store.set_fail_insert(true);
    for _ in 0..3 {
        batcher.submit(message_in(conv));
    }
    assert!(!batcher.is_saturated());
    batcher.submit(message_in(conv));
    assert!(batcher.is_saturated());

    assert!(batcher.flush().await.is_err());
    // The requeued batch keeps the buffer saturated; the consumer must not
    // fetch more deliveries.
    assert!(batcher.is_saturated());
    assert_eq!(batcher.len(), 4);

    store.set_fail_insert(false);
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 4);
    assert!(!batcher.is_saturated());
    assert!(batcher.is_empty());
}

#[tokio::test]
async fn empty_flush_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let mut batcher = InsertBatcher::new(store.clone() as Arc<dyn ChatStore>, 10);
    let outcome = batcher.flush().await.unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(store.message_count(), 0);
}
