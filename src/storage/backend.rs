//! Storage backend trait.

use super::{IndexRow, IndexScan, ModelRow};
use crate::core::{Result, TraceId};

/// Relational store the engine reads and writes through.
///
/// Every method names the logical table it works against, so one store can
/// host the primary and archive span tables side by side. Each insert call
/// is one transactional batch: either all of its rows land or none do.
#[async_trait::async_trait]
pub trait SpanStore: Send + Sync {
    /// Insert serialized spans into a model table.
    async fn insert_model_rows(&self, table: &str, rows: &[ModelRow]) -> Result<()>;

    /// Insert index projections into an index table.
    async fn insert_index_rows(&self, table: &str, rows: &[IndexRow]) -> Result<()>;

    /// Run one bounded scan over an index table.
    async fn scan_trace_ids(&self, table: &str, scan: &IndexScan) -> Result<Vec<TraceId>>;

    /// Fetch the payloads of every model row whose trace ID is listed.
    async fn fetch_models(&self, table: &str, trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>>;

    /// Distinct service names in an operations table.
    async fn list_services(&self, table: &str) -> Result<Vec<String>>;

    /// Distinct operation names recorded for a service.
    async fn list_operations(&self, table: &str, service: &str) -> Result<Vec<String>>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}
