//! Writes flushed batches to the store.

use super::{IndexRow, ModelRow, SpanStore};
use crate::core::{Result, Span};
use crate::storage::codec::Encoding;
use std::sync::Arc;

/// Target tables and encoding for one stream of spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersisterConfig {
    pub spans_table: String,
    /// `None` disables index rows (archive streams).
    pub index_table: Option<String>,
    pub encoding: Encoding,
}

/// Turns a batch of spans into model and index rows.
pub struct SpanPersister {
    store: Arc<dyn SpanStore>,
    config: PersisterConfig,
}

impl SpanPersister {
    pub fn new(store: Arc<dyn SpanStore>, config: PersisterConfig) -> Self {
        Self { store, config }
    }

    /// Writes the model rows, then the index rows.
    ///
    /// The two inserts are separate transactions. If the index insert fails
    /// the model rows already written stay in place; the batch is reported as
    /// failed and is not retried.
    pub async fn write_batch(&self, batch: &[Span]) -> Result<()> {
        tracing::debug!(size = batch.len(), table = %self.config.spans_table, "Writing spans");

        let models = batch
            .iter()
            .map(|span| ModelRow::from_span(span, self.config.encoding))
            .collect::<Result<Vec<_>>>()?;
        self.store.insert_model_rows(&self.config.spans_table, &models).await?;

        if let Some(index_table) = &self.config.index_table {
            let rows: Vec<_> = batch.iter().map(IndexRow::from_span).collect();
            self.store.insert_index_rows(index_table, &rows).await?;
        }

        Ok(())
    }
}
