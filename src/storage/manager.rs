//! Storage manager wiring writers and readers to one store.

use super::dependencies::DependencyReader;
use super::persister::{PersisterConfig, SpanPersister};
use super::reader::{ReaderConfig, TraceReader};
use super::writer::{SpanWriter, WriterConfig};
use super::{MemoryStore, SpanStore, SqliteStore};
use crate::core::{Result, StorageConfig};
use std::sync::Arc;
use std::time::Instant;

/// Owns the primary and archive span streams over a shared store.
///
/// The primary stream writes model and index rows and supports search. The
/// archive stream writes model rows only; its reader can fetch traces by ID
/// but not search or list.
pub struct StorageManager {
    store: Arc<dyn SpanStore>,
    writer: SpanWriter,
    archive_writer: SpanWriter,
    reader: TraceReader,
    archive_reader: TraceReader,
    dependencies: DependencyReader,
    start_time: Instant,
}

impl StorageManager {
    /// Builds both streams over `store`. Must run inside a tokio runtime.
    pub fn new(config: &StorageConfig, store: Arc<dyn SpanStore>) -> Self {
        let config = config.clone().with_defaults();
        let tables = config.tables();
        let writer_config = WriterConfig {
            batch_size: config.batch_write_size,
            flush_interval: config.batch_flush_interval,
        };

        let persister = |spans_table: &str, index_table: Option<&str>| {
            SpanPersister::new(
                Arc::clone(&store),
                PersisterConfig {
                    spans_table: spans_table.to_string(),
                    index_table: index_table.map(str::to_string),
                    encoding: config.encoding,
                },
            )
        };
        let writer = SpanWriter::new(persister(&tables.spans, Some(&tables.index)), writer_config);
        let archive_writer = SpanWriter::new(persister(&tables.spans_archive, None), writer_config);

        let reader = TraceReader::new(
            Arc::clone(&store),
            ReaderConfig {
                spans_table: tables.spans.clone(),
                index_table: Some(tables.index.clone()),
                operations_table: Some(tables.operations.clone()),
            },
        );
        let archive_reader = TraceReader::new(
            Arc::clone(&store),
            ReaderConfig {
                spans_table: tables.spans_archive.clone(),
                index_table: None,
                operations_table: None,
            },
        );

        tracing::info!(
            batch_size = writer_config.batch_size,
            flush_interval = ?writer_config.flush_interval,
            encoding = ?config.encoding,
            "Storage manager started"
        );

        Self {
            store,
            writer,
            archive_writer,
            reader,
            archive_reader,
            dependencies: DependencyReader::new(),
            start_time: Instant::now(),
        }
    }

    /// Opens the configured SQLite file and runs any init scripts, off the
    /// async runtime.
    pub async fn open_sqlite(config: &StorageConfig) -> Result<Self> {
        let config = config.clone().with_defaults();
        let path = config.data_file.clone();
        let tables = config.tables();
        let scripts = config.init_sql_scripts_dir.clone();

        let store = tokio::task::spawn_blocking(move || -> Result<SqliteStore> {
            let store = SqliteStore::open(&path, &tables)?;
            if let Some(dir) = &scripts {
                let count = store.run_init_scripts(dir)?;
                tracing::info!(count, dir = %dir.display(), "Ran SQL init scripts");
            }
            Ok(store)
        })
        .await??;

        Ok(Self::new(&config, Arc::new(store)))
    }

    /// Builds both streams over a fresh [`MemoryStore`].
    pub fn in_memory(config: &StorageConfig) -> Self {
        let store = MemoryStore::for_tables(&config.clone().with_defaults().tables());
        Self::new(config, Arc::new(store))
    }

    pub fn writer(&self) -> &SpanWriter {
        &self.writer
    }

    pub fn archive_writer(&self) -> &SpanWriter {
        &self.archive_writer
    }

    pub fn reader(&self) -> &TraceReader {
        &self.reader
    }

    pub fn archive_reader(&self) -> &TraceReader {
        &self.archive_reader
    }

    pub fn dependency_reader(&self) -> &DependencyReader {
        &self.dependencies
    }

    pub fn store(&self) -> Arc<dyn SpanStore> {
        Arc::clone(&self.store)
    }

    /// Drains and closes both writers, then closes the store.
    pub async fn close(&self) -> Result<()> {
        let primary = self.writer.close().await;
        let archive = self.archive_writer.close().await;
        self.store.close().await?;
        primary?;
        archive?;

        let stats = self.writer.stats();
        tracing::info!(
            spans_flushed = stats.spans_flushed,
            failed_flushes = stats.failed_flushes,
            archived = self.archive_writer.stats().spans_flushed,
            uptime = ?self.start_time.elapsed(),
            "Storage manager closed"
        );
        Ok(())
    }
}
