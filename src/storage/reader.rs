//! Trace lookup and search.
//!
//! `find_trace_ids` scans the index progressively: small windows over the
//! newest data first, doubling as they walk back towards `start_time_min`,
//! so queries satisfied by recent traces never touch the whole range.

use super::codec::decode_span;
use super::tags::token;
use super::types::to_micros;
use super::{IndexScan, SpanStore};
use crate::core::{
    Operation, Result, Span, Trace, TraceId, TraceQueryParameters, TraceStoreError,
};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Ranges shorter than this (plus the margin) are scanned in one go.
pub const MIN_TIMESPAN_FOR_PROGRESSIVE_SEARCH: Duration = Duration::from_secs(60 * 60);

/// Slack added to the progressive threshold.
pub const MIN_TIMESPAN_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound on index scans per progressive search.
pub const MAX_PROGRESSIVE_STEPS: usize = 4;

/// Tables a reader works against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub spans_table: String,
    /// `None` disables trace search.
    pub index_table: Option<String>,
    /// `None` disables service and operation listing.
    pub operations_table: Option<String>,
}

/// Read side of the store: trace assembly, search and listings.
pub struct TraceReader {
    store: Arc<dyn SpanStore>,
    config: ReaderConfig,
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl TraceReader {
    pub fn new(store: Arc<dyn SpanStore>, config: ReaderConfig) -> Self {
        Self { store, config }
    }

    /// Fetches every span of one trace.
    pub async fn get_trace(&self, trace_id: TraceId) -> Result<Trace> {
        self.get_traces(&[trace_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TraceStoreError::TraceNotFound(trace_id.to_string()))
    }

    /// Assembles traces in the order requested.
    ///
    /// IDs with no stored spans are left out. A repeated ID yields one trace,
    /// at its first position.
    pub async fn get_traces(&self, trace_ids: &[TraceId]) -> Result<Vec<Trace>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = AHashSet::with_capacity(trace_ids.len());
        let ordered: Vec<TraceId> =
            trace_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let payloads = self.store.fetch_models(&self.config.spans_table, &ordered).await?;
        let mut grouped: AHashMap<TraceId, Vec<Span>> = AHashMap::with_capacity(ordered.len());
        for payload in &payloads {
            let span = decode_span(payload)?;
            grouped.entry(span.trace_id).or_default().push(span);
        }

        Ok(ordered
            .iter()
            .filter_map(|id| grouped.remove(id))
            .map(Trace::from_spans)
            .collect())
    }

    /// Finds matching trace IDs, then assembles the traces.
    pub async fn find_traces(&self, query: &TraceQueryParameters) -> Result<Vec<Trace>> {
        let trace_ids = self.find_trace_ids(query).await?;
        self.get_traces(&trace_ids).await
    }

    /// Returns up to `num_traces` trace IDs matching the query, ordered by
    /// service then newest first.
    ///
    /// `start_time_min` is required; `start_time_max` defaults to now. Any
    /// failed scan fails the whole search.
    pub async fn find_trace_ids(&self, query: &TraceQueryParameters) -> Result<Vec<TraceId>> {
        let template = self.scan_template(query)?;
        let (start, end) = time_bounds(query)?;
        if query.num_traces == 0 {
            return Ok(Vec::new());
        }

        let full_span = end.saturating_sub(start);
        let threshold = micros(MIN_TIMESPAN_FOR_PROGRESSIVE_SEARCH);
        if full_span < threshold + micros(MIN_TIMESPAN_MARGIN) {
            return self.scan_range(&template, start, end, &[], query.num_traces).await;
        }

        let mut window = (full_span >> MAX_PROGRESSIVE_STEPS).max(threshold);
        let mut step_end = end;
        let mut found: Vec<TraceId> = Vec::new();

        for step in 0..MAX_PROGRESSIVE_STEPS {
            if found.len() >= query.num_traces {
                break;
            }
            if step == MAX_PROGRESSIVE_STEPS - 1 {
                window = step_end - start;
            }
            let step_start = step_end.saturating_sub(window).max(start);
            if step_start > step_end {
                break;
            }

            tracing::trace!(step, start = step_start, end = step_end, "Progressive search step");
            let ids = self
                .scan_range(&template, step_start, step_end, &found, query.num_traces - found.len())
                .await?;
            found.extend(ids);

            step_end = step_start;
            window = window.saturating_mul(2);
        }

        tracing::debug!(
            service = %query.service_name,
            found = found.len(),
            "Progressive search finished"
        );
        Ok(found)
    }

    /// Runs one bounded scan over `[start, end]`, skipping listed IDs.
    pub async fn find_trace_ids_in_range(
        &self,
        query: &TraceQueryParameters,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        skip: &[TraceId],
        limit: usize,
    ) -> Result<Vec<TraceId>> {
        let template = self.scan_template(query)?;
        self.scan_range(&template, to_micros(start), to_micros(end), skip, limit).await
    }

    async fn scan_range(
        &self,
        template: &IndexScan,
        start: i64,
        end: i64,
        skip: &[TraceId],
        limit: usize,
    ) -> Result<Vec<TraceId>> {
        if end <= start || limit == 0 {
            return Ok(Vec::new());
        }
        let scan = IndexScan {
            start,
            end,
            skip: skip.to_vec(),
            limit,
            ..template.clone()
        };
        self.store.scan_trace_ids(self.index_table()?, &scan).await
    }

    /// Distinct service names.
    pub async fn get_services(&self) -> Result<Vec<String>> {
        self.store.list_services(self.operations_table()?).await
    }

    /// Distinct operations recorded for `service`.
    pub async fn get_operations(&self, service: &str) -> Result<Vec<Operation>> {
        let names = self.store.list_operations(self.operations_table()?, service).await?;
        Ok(names.into_iter().map(|name| Operation { name }).collect())
    }

    fn scan_template(&self, query: &TraceQueryParameters) -> Result<IndexScan> {
        self.index_table()?;
        Ok(IndexScan {
            service: query.service_name.clone(),
            operation: query.operation_name.clone(),
            start: 0,
            end: 0,
            duration_min_us: query.duration_min.map(micros),
            duration_max_us: query.duration_max.map(micros),
            tags: query.tags.iter().map(|(k, v)| token(k, v)).collect(),
            skip: Vec::new(),
            limit: 0,
        })
    }

    fn index_table(&self) -> Result<&str> {
        self.config
            .index_table
            .as_deref()
            .ok_or_else(|| TraceStoreError::config("reader has no index table"))
    }

    fn operations_table(&self) -> Result<&str> {
        self.config
            .operations_table
            .as_deref()
            .ok_or_else(|| TraceStoreError::config("reader has no operations table"))
    }
}

fn time_bounds(query: &TraceQueryParameters) -> Result<(i64, i64)> {
    let start = query
        .start_time_min
        .ok_or_else(|| TraceStoreError::invalid_query("start_time_min is required"))?;
    let end = query.start_time_max.unwrap_or_else(Utc::now);
    Ok((to_micros(start), to_micros(end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SpanId;
    use crate::storage::codec::encode_span;
    use crate::storage::codec::Encoding;
    use crate::storage::{IndexRow, MemoryStore, ModelRow};

    fn reader(store: Arc<MemoryStore>) -> TraceReader {
        TraceReader::new(
            store,
            ReaderConfig {
                spans_table: "spans".into(),
                index_table: Some("idx".into()),
                operations_table: Some("ops".into()),
            },
        )
    }

    fn span(trace: u128, span: u64, secs: i64) -> Span {
        Span::builder()
            .trace_id(TraceId::new(trace))
            .span_id(SpanId::new(span))
            .service_name("api")
            .operation_name("get")
            .start_time(DateTime::from_timestamp(secs, 0).unwrap())
            .build()
            .unwrap()
    }

    async fn store_with(spans: &[Span]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new().with_operations_view("ops", "idx"));
        let models: Vec<_> = spans
            .iter()
            .map(|s| ModelRow::from_span(s, Encoding::Json).unwrap())
            .collect();
        let index: Vec<_> = spans.iter().map(IndexRow::from_span).collect();
        store.insert_model_rows("spans", &models).await.unwrap();
        store.insert_index_rows("idx", &index).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_traces_keeps_request_order() {
        let store = store_with(&[span(1, 1, 10), span(2, 2, 20), span(1, 3, 5)]).await;
        let reader = reader(store);

        let traces = reader
            .get_traces(&[TraceId::new(2), TraceId::new(9), TraceId::new(1), TraceId::new(2)])
            .await
            .unwrap();
        let ids: Vec<_> = traces.iter().filter_map(Trace::trace_id).collect();
        assert_eq!(ids, vec![TraceId::new(2), TraceId::new(1)]);
        assert_eq!(traces[1].spans.len(), 2);
        assert!(reader.get_traces(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_trace_not_found() {
        let reader = reader(store_with(&[span(1, 1, 10)]).await);
        let err = reader.get_trace(TraceId::new(42)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_binary_payloads_decode() {
        let store = Arc::new(MemoryStore::new());
        let s = span(7, 1, 10);
        let row = ModelRow {
            timestamp: 10_000_000,
            trace_id: s.trace_id,
            model: encode_span(&s, Encoding::Binary).unwrap(),
        };
        store.insert_model_rows("spans", &[row]).await.unwrap();

        let trace = reader(store).get_trace(TraceId::new(7)).await.unwrap();
        assert_eq!(trace.spans, vec![s]);
    }

    #[tokio::test]
    async fn test_find_requires_start_time() {
        let reader = reader(store_with(&[]).await);
        let query = TraceQueryParameters {
            service_name: "api".into(),
            num_traces: 10,
            ..Default::default()
        };
        let err = reader.find_trace_ids(&query).await.unwrap_err();
        assert!(matches!(err, TraceStoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_reader_without_tables() {
        let reader = TraceReader::new(
            Arc::new(MemoryStore::new()),
            ReaderConfig {
                spans_table: "archive".into(),
                index_table: None,
                operations_table: None,
            },
        );
        let query = TraceQueryParameters {
            service_name: "api".into(),
            start_time_min: Some(DateTime::from_timestamp(0, 0).unwrap()),
            num_traces: 1,
            ..Default::default()
        };
        assert!(matches!(reader.find_trace_ids(&query).await, Err(TraceStoreError::Config(_))));
        assert!(matches!(reader.get_services().await, Err(TraceStoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_operations_listing() {
        let reader = reader(store_with(&[span(1, 1, 10)]).await);
        assert_eq!(reader.get_services().await.unwrap(), vec!["api"]);
        assert_eq!(
            reader.get_operations("api").await.unwrap(),
            vec![Operation { name: "get".into() }]
        );
    }
}
