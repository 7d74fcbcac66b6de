//! Batching writer behaviour against in-memory and failing stores.

mod common;

use common::{wait_for, FailingStore, IndexFailingStore, TestSpanBuilder};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tracestore::core::{TraceId, TraceStoreError};
use tracestore::storage::{
    Encoding, MemoryStore, PersisterConfig, SpanPersister, SpanStore, SpanWriter, WriterConfig,
};

fn persister(store: Arc<dyn SpanStore>) -> SpanPersister {
    SpanPersister::new(
        store,
        PersisterConfig {
            spans_table: "spans".to_string(),
            index_table: Some("idx".to_string()),
            encoding: Encoding::Json,
        },
    )
}

fn writer(store: &Arc<MemoryStore>, batch_size: usize, flush_interval: Duration) -> SpanWriter {
    SpanWriter::new(
        persister(store.clone()),
        WriterConfig { batch_size, flush_interval },
    )
}

#[tokio::test]
async fn test_full_batch_flushes_immediately() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 5, Duration::from_secs(3600));

    for i in 0..5 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }

    assert!(wait_for(|| writer.stats().batches_flushed == 1, Duration::from_secs(2)).await);
    assert_eq!(store.model_row_count("spans"), 5);
    assert_eq!(store.index_row_count("idx"), 5);

    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_partial_batch_waits_for_timer() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 100, Duration::from_millis(300));

    for i in 0..3 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.model_row_count("spans"), 0);

    assert!(wait_for(|| writer.stats().batches_flushed == 1, Duration::from_secs(3)).await);
    assert_eq!(store.model_row_count("spans"), 3);

    writer.close().await.unwrap();
    assert_eq!(writer.stats().batches_flushed, 1);
}

#[tokio::test]
async fn test_partial_batch_stays_queued_without_trigger() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 100, Duration::from_secs(3600));

    for i in 0..3 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.model_row_count("spans"), 0);

    writer.close().await.unwrap();
    assert_eq!(store.model_row_count("spans"), 3);
}

#[tokio::test]
async fn test_concurrent_producers_lose_nothing() {
    let store = Arc::new(MemoryStore::new());
    let writer = Arc::new(writer(&store, 10, Duration::from_secs(3600)));

    let mut handles = Vec::new();
    for producer in 0..5u128 {
        let writer = Arc::clone(&writer);
        handles.push(tokio::spawn(async move {
            for i in 0..5u128 {
                let span = TestSpanBuilder::new(producer * 100 + i, 1).build();
                writer.submit(span).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    writer.close().await.unwrap();

    assert_eq!(store.model_row_count("spans"), 25);
    assert_eq!(store.index_row_count("idx"), 25);

    let stats = writer.stats();
    assert_eq!(stats.spans_received, 25);
    assert_eq!(stats.spans_flushed, 25);
    assert_eq!(stats.batches_flushed, 3);
    assert_eq!(stats.spans_dropped, 0);
}

#[tokio::test]
async fn test_backpressure_with_small_queue() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 2, Duration::from_secs(3600));

    for i in 0..51 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    writer.close().await.unwrap();

    assert_eq!(store.model_row_count("spans"), 51);
    assert_eq!(writer.stats().batches_flushed, 26);
}

#[tokio::test]
async fn test_submission_order_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 4, Duration::from_secs(3600));

    for i in 0..10 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    writer.close().await.unwrap();

    let order: Vec<TraceId> = store.index_rows("idx").iter().map(|row| row.trace_id).collect();
    let expected: Vec<TraceId> = (0..10).map(TraceId::new).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_failed_flush_is_dropped_not_propagated() {
    let writer = SpanWriter::new(
        persister(Arc::new(FailingStore)),
        WriterConfig { batch_size: 3, flush_interval: Duration::from_secs(3600) },
    );

    for i in 0..4 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    writer.close().await.unwrap();

    let stats = writer.stats();
    assert_eq!(stats.spans_received, 4);
    assert_eq!(stats.failed_flushes, 2);
    assert_eq!(stats.spans_dropped, 4);
    assert_eq!(stats.spans_flushed, 0);
}

#[tokio::test]
async fn test_failed_index_insert_keeps_model_rows() {
    let memory = Arc::new(MemoryStore::new());
    let writer = SpanWriter::new(
        persister(Arc::new(IndexFailingStore::new(memory.clone()))),
        WriterConfig { batch_size: 3, flush_interval: Duration::from_secs(3600) },
    );

    for i in 0..3 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    assert!(wait_for(|| writer.stats().spans_dropped == 3, Duration::from_secs(2)).await);

    let stats = writer.stats();
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.batches_flushed, 0);
    assert_eq!(memory.model_row_count("spans"), 3);
    assert_eq!(memory.index_row_count("idx"), 0);

    // The worker keeps going after the failure.
    for i in 3..6 {
        writer.submit(TestSpanBuilder::new(i, 1).build()).await.unwrap();
    }
    writer.close().await.unwrap();

    let stats = writer.stats();
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.batches_flushed, 1);
    assert_eq!(stats.spans_flushed, 3);
    assert_eq!(memory.model_row_count("spans"), 6);
    assert_eq!(memory.index_row_count("idx"), 3);
}

#[tokio::test]
async fn test_closed_writer_rejects_spans() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer(&store, 10, Duration::from_secs(1));
    writer.close().await.unwrap();

    let err = writer.submit(TestSpanBuilder::new(1, 1).build()).await.unwrap_err();
    assert!(matches!(err, TraceStoreError::WriterClosed));
    assert!(writer.close().await.is_ok());
}
