//! Span storage engine.
//!
//! Spans enter through a batching [`SpanWriter`], are persisted as a model
//! row (full payload) plus an index row (searchable projection) by the
//! [`SpanPersister`], and are read back through a [`TraceReader`] that
//! searches the index progressively and reassembles traces from model rows.
//! All of it runs against the [`SpanStore`] trait; [`SqliteStore`] and
//! [`MemoryStore`] implement it.

pub mod backend;
pub mod codec;
pub mod dependencies;
pub mod manager;
pub mod memory;
pub mod persister;
pub mod reader;
pub mod sqlite;
pub mod tags;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use backend::SpanStore;
pub use codec::{decode_span, encode_span, Encoding};
pub use dependencies::DependencyReader;
pub use manager::StorageManager;
pub use memory::MemoryStore;
pub use persister::{PersisterConfig, SpanPersister};
pub use reader::{ReaderConfig, TraceReader};
pub use sqlite::SqliteStore;
pub use tags::unique_tags_for_span;
pub use types::{IndexRow, IndexScan, ModelRow};
pub use writer::{SpanWriter, WriterConfig, WriterStats};
