//! SQLite span store.
//!
//! Schema, per configured table names:
//! - model tables `(timestamp, trace_id, model)` for the primary and archive spans
//! - index table `(timestamp, trace_id, service, operation, duration_us, tags)`,
//!   tags stored as a JSON array of `key=value` tokens
//! - operations view `(service, operation)` grouped over the index table
//!
//! Timestamps are microseconds since the Unix epoch; trace IDs are their
//! fixed-width hex form, so text order equals numeric order.

use super::{IndexRow, IndexScan, ModelRow, SpanStore};
use crate::core::{Result, TableNames, TraceId, TraceStoreError};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Span store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and ensures the schema exists.
    pub fn open(path: &Path, tables: &TableNames) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::from_connection(conn, tables)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(tables: &TableNames) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, tables)
    }

    fn from_connection(conn: Connection, tables: &TableNames) -> Result<Self> {
        create_schema(&conn, tables)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Runs every `*.sql` file under `dir` (recursively, in path order) in one
    /// transaction. Returns the number of scripts executed.
    pub fn run_init_scripts(&self, dir: &Path) -> Result<usize> {
        let mut paths = Vec::new();
        collect_sql_files(dir, &mut paths)?;
        paths.sort();

        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| TraceStoreError::storage("store is closed"))?;
        let tx = conn.transaction()?;
        for path in &paths {
            let statement = std::fs::read_to_string(path)?;
            tracing::debug!(script = %path.display(), "Running SQL init script");
            tx.execute_batch(&statement).map_err(|e| {
                TraceStoreError::storage(format!("could not run {}: {e}", path.display()))
            })?;
        }
        tx.commit()?;
        Ok(paths.len())
    }

    /// Runs blocking SQLite work off the async executor.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| TraceStoreError::storage("store is closed"))?;
            f(conn)
        })
        .await?
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_schema(conn: &Connection, tables: &TableNames) -> Result<()> {
    let mut ddl = String::new();
    for spans in [&tables.spans, &tables.spans_archive] {
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                timestamp INTEGER NOT NULL,
                trace_id TEXT NOT NULL,
                model BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {i} ON {t} (trace_id);\n",
            t = quote(spans),
            i = quote(&format!("{spans}_trace_id")),
        ));
    }
    ddl.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            timestamp INTEGER NOT NULL,
            trace_id TEXT NOT NULL,
            service TEXT NOT NULL,
            operation TEXT NOT NULL,
            duration_us INTEGER NOT NULL,
            tags TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {i} ON {t} (service, timestamp);
        CREATE VIEW IF NOT EXISTS {v} AS
            SELECT service, operation FROM {t} GROUP BY service, operation;",
        t = quote(&tables.index),
        i = quote(&format!("{}_service_timestamp", tables.index)),
        v = quote(&tables.operations),
    ));
    conn.execute_batch(&ddl)?;
    Ok(())
}

fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "sql") {
            out.push(path);
        }
    }
    Ok(())
}

fn build_scan_query(table: &str, scan: &IndexScan) -> (String, Vec<Value>) {
    let table = quote(table);
    let mut sql = format!("SELECT trace_id FROM {table} WHERE service = ?");
    let mut args = vec![Value::Text(scan.service.clone())];

    if let Some(operation) = &scan.operation {
        sql.push_str(" AND operation = ?");
        args.push(Value::Text(operation.clone()));
    }

    sql.push_str(" AND timestamp >= ? AND timestamp <= ?");
    args.push(Value::Integer(scan.start));
    args.push(Value::Integer(scan.end));

    if let Some(min) = scan.duration_min_us {
        sql.push_str(" AND duration_us >= ?");
        args.push(Value::Integer(min));
    }

    if let Some(max) = scan.duration_max_us {
        sql.push_str(" AND duration_us <= ?");
        args.push(Value::Integer(max));
    }

    for tag in &scan.tags {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM json_each({table}.tags) WHERE json_each.value = ?)"
        ));
        args.push(Value::Text(tag.clone()));
    }

    if !scan.skip.is_empty() {
        sql.push_str(" AND trace_id NOT IN (SELECT value FROM json_each(?))");
        args.push(Value::Text(id_array(&scan.skip)));
    }

    sql.push_str(" GROUP BY service, trace_id ORDER BY service, MAX(timestamp) DESC, trace_id LIMIT ?");
    args.push(Value::Integer(i64::try_from(scan.limit).unwrap_or(i64::MAX)));

    (sql, args)
}

/// Trace IDs as one JSON array parameter, so list size never hits the
/// bound-variable limit.
fn id_array(ids: &[TraceId]) -> String {
    let mut json = String::with_capacity(ids.len() * 35 + 2);
    json.push('[');
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            json.push(',');
        }
        json.push('"');
        json.push_str(&id.to_string());
        json.push('"');
    }
    json.push(']');
    json
}

fn query_strings(conn: &Connection, sql: &str, args: Vec<Value>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}

#[async_trait::async_trait]
impl SpanStore for SqliteStore {
    async fn insert_model_rows(&self, table: &str, rows: &[ModelRow]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (timestamp, trace_id, model) VALUES (?1, ?2, ?3)",
            quote(table)
        );
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(params![row.timestamp, row.trace_id.to_string(), row.model])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_index_rows(&self, table: &str, rows: &[IndexRow]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (timestamp, trace_id, service, operation, duration_us, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            quote(table)
        );
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(params![
                        row.timestamp,
                        row.trace_id.to_string(),
                        row.service,
                        row.operation,
                        row.duration_us,
                        serde_json::to_string(&row.tags)?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn scan_trace_ids(&self, table: &str, scan: &IndexScan) -> Result<Vec<TraceId>> {
        let (sql, args) = build_scan_query(table, scan);
        tracing::trace!(statement = %sql, "Scanning index");
        let ids = self.with_conn(move |conn| query_strings(conn, &sql, args)).await?;
        ids.iter().map(|id| id.parse()).collect()
    }

    async fn fetch_models(&self, table: &str, trace_ids: &[TraceId]) -> Result<Vec<Vec<u8>>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT model FROM {} WHERE trace_id IN (SELECT value FROM json_each(?1)) ORDER BY rowid",
            quote(table)
        );
        let ids = id_array(trace_ids);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![ids], |row| row.get::<_, Vec<u8>>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await
    }

    async fn list_services(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("SELECT service FROM {} GROUP BY service ORDER BY service", quote(table));
        self.with_conn(move |conn| query_strings(conn, &sql, Vec::new())).await
    }

    async fn list_operations(&self, table: &str, service: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT operation FROM {} WHERE service = ? GROUP BY operation ORDER BY operation",
            quote(table)
        );
        let args = vec![Value::Text(service.to_string())];
        self.with_conn(move |conn| query_strings(conn, &sql, args)).await
    }

    async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || match conn.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| e.into()),
            None => Ok(()),
        })
        .await?
    }
}
