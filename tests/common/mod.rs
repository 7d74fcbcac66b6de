//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracestore::core::{KeyValue, Result, Span, SpanId, TraceId, TraceStoreError};
use tracestore::storage::{IndexRow, IndexScan, MemoryStore, ModelRow, SpanStore};

/// Fixed reference time so search windows are reproducible.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Test fixture builder for creating spans with sensible defaults.
pub struct TestSpanBuilder {
    trace_num: u128,
    span_num: u64,
    service: String,
    operation: String,
    start_time: DateTime<Utc>,
    duration_ms: u64,
    tags: Vec<KeyValue>,
}

impl TestSpanBuilder {
    pub fn new(trace_num: u128, span_num: u64) -> Self {
        Self {
            trace_num,
            span_num,
            service: "test-service".to_string(),
            operation: format!("operation-{span_num}"),
            start_time: base_time(),
            duration_ms: 100,
            tags: Vec::new(),
        }
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = operation.to_string();
        self
    }

    /// Start time relative to [`base_time`], negative values go back.
    pub fn offset_minutes(mut self, minutes: i64) -> Self {
        self.start_time = base_time() + chrono::Duration::minutes(minutes);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push(KeyValue::string(key, value));
        self
    }

    pub fn build(self) -> Span {
        let mut builder = Span::builder()
            .trace_id(TraceId::new(self.trace_num))
            .span_id(SpanId::new(self.span_num))
            .service_name(self.service)
            .operation_name(self.operation)
            .start_time(self.start_time)
            .duration(Duration::from_millis(self.duration_ms));

        for tag in self.tags {
            builder = builder.tag(tag);
        }

        builder.build().unwrap()
    }
}

/// Polls `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_for<F: Fn() -> bool>(check: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Store wrapper that records every index scan it serves.
pub struct CountingStore {
    inner: Arc<MemoryStore>,
    scans: Mutex<Vec<IndexScan>>,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            scans: Mutex::new(Vec::new()),
        }
    }

    pub fn scans(&self) -> Vec<IndexScan> {
        self.scans.lock().clone()
    }

    pub fn reset(&self) {
        self.scans.lock().clear();
    }
}

#[async_trait::async_trait]
impl SpanStore for CountingStore {
    async fn insert_model_rows(&self, table: &str, rows: &[ModelRow]) -> Result<()> {
        self.inner.insert_model_rows(table, rows).await
    }

    async fn insert_index_rows(&self, table: &str, rows: &[IndexRow]) -> Result<()> {
        self.inner.insert_index_rows(table, rows).await
    }

    async fn scan_trace_ids(&self, table: &str, scan: &IndexScan) -> Result<Vec<TraceId>> {
        self.scans.lock().push(scan.clone());
        self.inner.scan_trace_ids(table, scan).await
    }

    async fn fetch_models(&self, table: &str, trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>> {
        self.inner.fetch_models(table, trace_ids).await
    }

    async fn list_services(&self, table: &str) -> Result<Vec<String>> {
        self.inner.list_services(table).await
    }

    async fn list_operations(&self, table: &str, service: &str) -> Result<Vec<String>> {
        self.inner.list_operations(table, service).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Store that rejects every write and every scan.
#[derive(Default)]
pub struct FailingStore;

#[async_trait::async_trait]
impl SpanStore for FailingStore {
    async fn insert_model_rows(&self, _table: &str, _rows: &[ModelRow]) -> Result<()> {
        Err(TraceStoreError::storage("disk full"))
    }

    async fn insert_index_rows(&self, _table: &str, _rows: &[IndexRow]) -> Result<()> {
        Err(TraceStoreError::storage("disk full"))
    }

    async fn scan_trace_ids(&self, _table: &str, _scan: &IndexScan) -> Result<Vec<TraceId>> {
        Err(TraceStoreError::storage("connection reset"))
    }

    async fn fetch_models(&self, _table: &str, _trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>> {
        Err(TraceStoreError::storage("connection reset"))
    }

    async fn list_services(&self, _table: &str) -> Result<Vec<String>> {
        Err(TraceStoreError::storage("connection reset"))
    }

    async fn list_operations(&self, _table: &str, _service: &str) -> Result<Vec<String>> {
        Err(TraceStoreError::storage("connection reset"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Store that keeps model inserts but rejects the next index insert.
pub struct IndexFailingStore {
    inner: Arc<MemoryStore>,
    fail_index: AtomicBool,
}

impl IndexFailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_index: AtomicBool::new(true),
        }
    }
}

#[async_trait::async_trait]
impl SpanStore for IndexFailingStore {
    async fn insert_model_rows(&self, table: &str, rows: &[ModelRow]) -> Result<()> {
        self.inner.insert_model_rows(table, rows).await
    }

    async fn insert_index_rows(&self, table: &str, rows: &[IndexRow]) -> Result<()> {
        if self.fail_index.swap(false, Ordering::SeqCst) {
            return Err(TraceStoreError::storage("index table locked"));
        }
        self.inner.insert_index_rows(table, rows).await
    }

    async fn scan_trace_ids(&self, table: &str, scan: &IndexScan) -> Result<Vec<TraceId>> {
        self.inner.scan_trace_ids(table, scan).await
    }

    async fn fetch_models(&self, table: &str, trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>> {
        self.inner.fetch_models(table, trace_ids).await
    }

    async fn list_services(&self, table: &str) -> Result<Vec<String>> {
        self.inner.list_services(table).await
    }

    async fn list_operations(&self, table: &str, service: &str) -> Result<Vec<String>> {
        self.inner.list_operations(table, service).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
