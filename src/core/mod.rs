//! Domain models, configuration and errors shared by the storage engine.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel, StorageConfig, TableNames};
pub use error::{Result, TraceStoreError};
pub use types::{
    DependencyLink, KeyValue, Log, Operation, Process, RefType, Span, SpanBuilder, SpanId, SpanRef,
    TagValue, Trace, TraceId, TraceQueryParameters,
};
