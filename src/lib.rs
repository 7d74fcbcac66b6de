//! Tracestore - batched span ingestion and progressive trace search.
//!
//! Spans are accepted by a background batching writer, persisted to a
//! relational store as a full payload row plus a searchable index row, and
//! read back by trace ID or by filtered search over a time range.
//!
//! # Architecture
//!
//! - `core`: Domain models, configuration and errors
//! - `storage`: Writer, persister, reader and store backends
//! - `cli`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use tracestore::core::{Span, SpanId, StorageConfig, TraceId};
//! use tracestore::storage::StorageManager;
//!
//! #[tokio::main]
//! async fn main() -> tracestore::Result<()> {
//!     let manager = StorageManager::open_sqlite(&StorageConfig::default()).await?;
//!     let span = Span::builder()
//!         .trace_id(TraceId::new(1))
//!         .span_id(SpanId::new(1))
//!         .service_name("checkout")
//!         .operation_name("charge")
//!         .build()?;
//!     manager.writer().submit(span).await?;
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
