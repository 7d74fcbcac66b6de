//! Row shapes exchanged with a [`SpanStore`](super::SpanStore).

use crate::core::{Result, Span, TraceId};
use crate::storage::codec::{encode_span, Encoding};
use crate::storage::tags::unique_tags_for_span;
use chrono::{DateTime, Utc};

/// Full serialized span, used to reassemble traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRow {
    /// Span start, microseconds since the Unix epoch.
    pub timestamp: i64,
    pub trace_id: TraceId,
    pub model: Vec<u8>,
}

impl ModelRow {
    /// Serializes a span into a model row.
    pub fn from_span(span: &Span, encoding: Encoding) -> Result<Self> {
        Ok(ModelRow {
            timestamp: span.start_time.timestamp_micros(),
            trace_id: span.trace_id,
            model: encode_span(span, encoding)?,
        })
    }
}

/// Compact searchable projection of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    /// Span start, microseconds since the Unix epoch.
    pub timestamp: i64,
    pub trace_id: TraceId,
    pub service: String,
    pub operation: String,
    pub duration_us: i64,
    /// Sorted, deduplicated `key=value` tokens.
    pub tags: Vec<String>,
}

impl IndexRow {
    /// Projects a span into an index row.
    pub fn from_span(span: &Span) -> Self {
        IndexRow {
            timestamp: span.start_time.timestamp_micros(),
            trace_id: span.trace_id,
            service: span.service_name().to_string(),
            operation: span.operation_name.clone(),
            duration_us: span.duration_micros(),
            tags: unique_tags_for_span(span),
        }
    }
}

/// Predicate for one bounded index scan.
///
/// Matching rows have the given service, the operation when set, a timestamp
/// within `[start, end]` (both inclusive), a duration within the optional
/// bounds, every listed tag token, and a trace ID not in `skip`. Results are
/// distinct trace IDs ordered by service, then newest timestamp first, and
/// capped at `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexScan {
    pub service: String,
    pub operation: Option<String>,
    /// Microseconds since the Unix epoch.
    pub start: i64,
    /// Microseconds since the Unix epoch.
    pub end: i64,
    pub duration_min_us: Option<i64>,
    pub duration_max_us: Option<i64>,
    pub tags: Vec<String>,
    pub skip: Vec<TraceId>,
    pub limit: usize,
}

impl IndexScan {
    /// Returns true if the row satisfies every filter except `limit`.
    pub fn matches(&self, row: &IndexRow) -> bool {
        row.service == self.service
            && self.operation.as_ref().map_or(true, |op| &row.operation == op)
            && row.timestamp >= self.start
            && row.timestamp <= self.end
            && self.duration_min_us.map_or(true, |min| row.duration_us >= min)
            && self.duration_max_us.map_or(true, |max| row.duration_us <= max)
            && self.tags.iter().all(|tag| row.tags.contains(tag))
            && !self.skip.contains(&row.trace_id)
    }
}

/// Converts a wall-clock time to the store's microsecond timestamps.
pub fn to_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}
