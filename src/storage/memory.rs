//! In-process span store.
//!
//! Holds model and index tables as plain vectors behind a lock and evaluates
//! [`IndexScan`] predicates directly. Operations tables are views derived
//! from a linked index table, mirroring the SQLite schema.

use super::{IndexRow, IndexScan, ModelRow, SpanStore};
use crate::core::{Result, TableNames, TraceId, TraceStoreError};
use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Tables {
    models: HashMap<String, Vec<ModelRow>>,
    indexes: HashMap<String, Vec<IndexRow>>,
}

/// Span store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Operations table name -> index table it is derived from.
    operations_views: HashMap<String, String>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store without operations views.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose operations table reads from the index table.
    pub fn for_tables(tables: &TableNames) -> Self {
        Self::new().with_operations_view(&tables.operations, &tables.index)
    }

    /// Registers `operations` as a service/operation view over `index`.
    pub fn with_operations_view(mut self, operations: &str, index: &str) -> Self {
        self.operations_views.insert(operations.to_string(), index.to_string());
        self
    }

    /// Number of rows in a model table.
    pub fn model_row_count(&self, table: &str) -> usize {
        self.tables.read().models.get(table).map_or(0, Vec::len)
    }

    /// Number of rows in an index table.
    pub fn index_row_count(&self, table: &str) -> usize {
        self.tables.read().indexes.get(table).map_or(0, Vec::len)
    }

    /// Snapshot of an index table.
    pub fn index_rows(&self, table: &str) -> Vec<IndexRow> {
        self.tables.read().indexes.get(table).cloned().unwrap_or_default()
    }

    /// Returns true once [`SpanStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TraceStoreError::storage("store is closed"));
        }
        Ok(())
    }

    fn operations_source(&self, table: &str) -> Result<&str> {
        self.operations_views
            .get(table)
            .map(String::as_str)
            .ok_or_else(|| TraceStoreError::storage(format!("no such table: {table}")))
    }
}

#[async_trait::async_trait]
impl SpanStore for MemoryStore {
    async fn insert_model_rows(&self, table: &str, rows: &[ModelRow]) -> Result<()> {
        self.ensure_open()?;
        self.tables
            .write()
            .models
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn insert_index_rows(&self, table: &str, rows: &[IndexRow]) -> Result<()> {
        self.ensure_open()?;
        self.tables
            .write()
            .indexes
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn scan_trace_ids(&self, table: &str, scan: &IndexScan) -> Result<Vec<TraceId>> {
        self.ensure_open()?;
        let tables = self.tables.read();
        let Some(rows) = tables.indexes.get(table) else {
            return Ok(Vec::new());
        };

        // (service, trace) -> newest matching timestamp
        let mut newest: AHashMap<(&str, TraceId), i64> = AHashMap::new();
        for row in rows.iter().filter(|row| scan.matches(row)) {
            let ts = newest.entry((row.service.as_str(), row.trace_id)).or_insert(row.timestamp);
            *ts = (*ts).max(row.timestamp);
        }

        let mut ordered: Vec<_> = newest.into_iter().collect();
        ordered.sort_by(|((sa, ta), a), ((sb, tb), b)| {
            sa.cmp(sb).then(b.cmp(a)).then(ta.cmp(tb))
        });

        let mut seen = AHashSet::new();
        Ok(ordered
            .into_iter()
            .map(|((_, trace_id), _)| trace_id)
            .filter(|trace_id| seen.insert(*trace_id))
            .take(scan.limit)
            .collect())
    }

    async fn fetch_models(&self, table: &str, trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let wanted: AHashSet<TraceId> = trace_ids.iter().copied().collect();
        let tables = self.tables.read();
        Ok(tables
            .models
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| wanted.contains(&row.trace_id))
                    .map(|row| row.model.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_services(&self, table: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let source = self.operations_source(table)?;
        let tables = self.tables.read();
        let services: BTreeSet<&str> = tables
            .indexes
            .get(source)
            .into_iter()
            .flatten()
            .map(|row| row.service.as_str())
            .collect();
        Ok(services.into_iter().map(str::to_string).collect())
    }

    async fn list_operations(&self, table: &str, service: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let source = self.operations_source(table)?;
        let tables = self.tables.read();
        let operations: BTreeSet<&str> = tables
            .indexes
            .get(source)
            .into_iter()
            .flatten()
            .filter(|row| row.service == service)
            .map(|row| row.operation.as_str())
            .collect();
        Ok(operations.into_iter().map(str::to_string).collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
