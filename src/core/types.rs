//! Span, trace and query models.

use crate::core::error::{Result, TraceStoreError};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 128-bit identifier shared by every span of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

/// 64-bit identifier of a span within its trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl TraceId {
    /// Creates a trace ID from its numeric value
    pub const fn new(value: u128) -> Self {
        TraceId(value)
    }

    /// Creates a trace ID from the high and low 64-bit halves
    pub const fn from_parts(high: u64, low: u64) -> Self {
        TraceId(((high as u128) << 64) | low as u128)
    }

    /// Returns the high 64 bits
    pub const fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Returns the low 64 bits
    pub const fn low(&self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = TraceStoreError;

    /// Parses 1 to 32 hex digits; shorter IDs are left-padded with zeros.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TraceStoreError::invalid_query(format!("malformed trace ID: {s:?}")));
        }
        u128::from_str_radix(s, 16)
            .map(TraceId)
            .map_err(|e| TraceStoreError::invalid_query(format!("malformed trace ID {s:?}: {e}")))
    }
}

impl SpanId {
    /// Creates a span ID from its numeric value
    pub const fn new(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = TraceStoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TraceStoreError::invalid_query(format!("malformed span ID: {s:?}")));
        }
        u64::from_str_radix(s, 16)
            .map(SpanId)
            .map_err(|e| TraceStoreError::invalid_query(format!("malformed span ID {s:?}: {e}")))
    }
}

// Hex strings in JSON, raw integers in binary payloads.
impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_u128(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(D::Error::custom)
        } else {
            u128::deserialize(deserializer).map(TraceId)
        }
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(D::Error::custom)
        } else {
            u64::deserialize(deserializer).map(SpanId)
        }
    }
}

/// Typed value of a span attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagValue {
    /// UTF-8 text
    String(String),
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int64(i64),
    /// Floating point number
    Float64(f64),
    /// Raw bytes, rendered as lowercase hex
    Binary(Vec<u8>),
}

impl TagValue {
    /// Renders the value the way it is matched by tag filters.
    pub fn as_string(&self) -> String {
        match self {
            TagValue::String(s) => s.clone(),
            TagValue::Bool(b) => b.to_string(),
            TagValue::Int64(i) => i.to_string(),
            TagValue::Float64(f) => f.to_string(),
            TagValue::Binary(bytes) => hex::encode(bytes),
        }
    }
}

/// A single key/value attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Attribute name
    pub key: String,
    /// Attribute value
    pub value: TagValue,
}

impl KeyValue {
    /// Creates a string-valued attribute
    pub fn string<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        KeyValue { key: key.into(), value: TagValue::String(value.into()) }
    }

    /// Creates a boolean attribute
    pub fn bool<K: Into<String>>(key: K, value: bool) -> Self {
        KeyValue { key: key.into(), value: TagValue::Bool(value) }
    }

    /// Creates an integer attribute
    pub fn int64<K: Into<String>>(key: K, value: i64) -> Self {
        KeyValue { key: key.into(), value: TagValue::Int64(value) }
    }

    /// Creates a float attribute
    pub fn float64<K: Into<String>>(key: K, value: f64) -> Self {
        KeyValue { key: key.into(), value: TagValue::Float64(value) }
    }

    /// Creates a binary attribute
    pub fn binary<K: Into<String>>(key: K, value: Vec<u8>) -> Self {
        KeyValue { key: key.into(), value: TagValue::Binary(value) }
    }
}

/// A timestamped event recorded during a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Event attributes
    #[serde(default)]
    pub fields: Vec<KeyValue>,
}

/// The process (service instance) that emitted a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Service the process belongs to
    pub service_name: String,
    /// Process-level attributes such as host or version
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

/// Kind of causal relationship to another span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    /// The referenced span is the parent
    ChildOf,
    /// The referenced span finished before this one started
    FollowsFrom,
}

/// Reference from a span to a related span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRef {
    /// Relationship kind
    pub ref_type: RefType,
    /// Trace of the referenced span
    pub trace_id: TraceId,
    /// The referenced span
    pub span_id: SpanId,
}

/// A single unit of work in a distributed trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// Identifier within the trace
    pub span_id: SpanId,
    /// Name of the operation the span measured
    pub operation_name: String,
    /// Parent and follows-from links
    #[serde(default)]
    pub references: Vec<SpanRef>,
    /// Sampling and debug flags
    #[serde(default)]
    pub flags: u32,
    /// When the span started
    pub start_time: DateTime<Utc>,
    /// How long the span ran
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Span attributes
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    /// Events recorded during the span
    #[serde(default)]
    pub logs: Vec<Log>,
    /// Emitting process
    pub process: Process,
    /// Problems found while ingesting the span
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Span {
    /// Creates a new span builder
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Name of the service that emitted this span
    pub fn service_name(&self) -> &str {
        &self.process.service_name
    }

    /// Returns the first `ChildOf` parent, if any
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.references
            .iter()
            .find(|r| r.ref_type == RefType::ChildOf)
            .map(|r| r.span_id)
    }

    /// Returns true if this span has no parent reference
    pub fn is_root(&self) -> bool {
        self.parent_span_id().is_none()
    }

    /// Returns when the span finished
    pub fn end_time(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.start_time.checked_add_signed(d))
            .unwrap_or(self.start_time)
    }

    /// Duration in whole microseconds, saturating
    pub fn duration_micros(&self) -> i64 {
        i64::try_from(self.duration.as_micros()).unwrap_or(i64::MAX)
    }
}

/// Builder for creating Span instances
#[derive(Default)]
pub struct SpanBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    operation_name: Option<String>,
    service_name: Option<String>,
    references: Vec<SpanRef>,
    flags: u32,
    start_time: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    tags: Vec<KeyValue>,
    process_tags: Vec<KeyValue>,
    logs: Vec<Log>,
    parent: Option<SpanId>,
}

impl SpanBuilder {
    /// Sets the trace ID (required)
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the span ID (required)
    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Sets the operation name (required)
    pub fn operation_name<S: Into<String>>(mut self, operation_name: S) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    /// Sets the emitting service (required)
    pub fn service_name<S: Into<String>>(mut self, service_name: S) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Makes `parent` the parent span, within the span's own trace.
    /// Works whether or not `trace_id` has been set yet.
    pub fn child_of(mut self, parent: SpanId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds an explicit reference
    pub fn reference(mut self, reference: SpanRef) -> Self {
        self.references.push(reference);
        self
    }

    /// Sets the span flags
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the start time; defaults to now
    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Sets the duration; defaults to zero
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Adds a span tag
    pub fn tag(mut self, tag: KeyValue) -> Self {
        self.tags.push(tag);
        self
    }

    /// Adds a process tag
    pub fn process_tag(mut self, tag: KeyValue) -> Self {
        self.process_tags.push(tag);
        self
    }

    /// Adds a log event
    pub fn log(mut self, timestamp: DateTime<Utc>, fields: Vec<KeyValue>) -> Self {
        self.logs.push(Log { timestamp, fields });
        self
    }

    /// Builds the span, failing with `InvalidQuery` if a required field is missing
    pub fn build(self) -> Result<Span> {
        let missing = |field: &str| TraceStoreError::invalid_query(format!("{field} is required"));
        let trace_id = self.trace_id.ok_or_else(|| missing("trace_id"))?;
        let mut references = self.references;
        if let Some(parent) = self.parent {
            references.insert(0, SpanRef { ref_type: RefType::ChildOf, trace_id, span_id: parent });
        }
        Ok(Span {
            trace_id,
            span_id: self.span_id.ok_or_else(|| missing("span_id"))?,
            operation_name: self.operation_name.ok_or_else(|| missing("operation_name"))?,
            references,
            flags: self.flags,
            start_time: self.start_time.unwrap_or_else(Utc::now),
            duration: self.duration.unwrap_or_default(),
            tags: self.tags,
            logs: self.logs,
            process: Process {
                service_name: self.service_name.ok_or_else(|| missing("service_name"))?,
                tags: self.process_tags,
            },
            warnings: Vec::new(),
        })
    }
}

/// All spans sharing one trace ID, assembled on read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Spans ordered by start time
    pub spans: Vec<Span>,
}

impl Trace {
    /// Creates a trace from its spans, ordered by start time
    pub fn from_spans(mut spans: Vec<Span>) -> Self {
        spans.sort_by_key(|span| span.start_time);
        Trace { spans }
    }

    /// Trace ID of the first span, if any
    pub fn trace_id(&self) -> Option<TraceId> {
        self.spans.first().map(|span| span.trace_id)
    }

    /// Returns the sorted, deduplicated list of services in this trace
    pub fn service_names(&self) -> Vec<&str> {
        let mut services: Vec<_> = self.spans.iter().map(Span::service_name).collect();
        services.sort_unstable();
        services.dedup();
        services
    }

    /// Time from the earliest start to the latest end
    pub fn duration(&self) -> Duration {
        let Some(first) = self.spans.iter().map(|s| s.start_time).min() else {
            return Duration::ZERO;
        };
        let last = self.spans.iter().map(Span::end_time).max().unwrap_or(first);
        (last - first).to_std().unwrap_or_default()
    }
}

/// An operation name known for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation name
    pub name: String,
}

/// Filters for searching trace IDs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceQueryParameters {
    /// Service to search
    pub service_name: String,
    /// Only spans with this operation
    pub operation_name: Option<String>,
    /// Every `key=value` pair must be present on a matching span
    pub tags: BTreeMap<String, String>,
    /// Oldest span start to consider (required)
    pub start_time_min: Option<DateTime<Utc>>,
    /// Newest span start to consider; defaults to now
    pub start_time_max: Option<DateTime<Utc>>,
    /// Minimum span duration, inclusive
    pub duration_min: Option<Duration>,
    /// Maximum span duration, inclusive
    pub duration_max: Option<Duration>,
    /// Maximum number of trace IDs to return
    pub num_traces: usize,
}

/// Caller-to-callee edge of the service dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    /// Calling service
    pub parent: String,
    /// Called service
    pub child: String,
    /// Number of calls observed
    pub call_count: u64,
}
