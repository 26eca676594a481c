//! [`Warehouse`] over a local SQLite database.
//!
//! The connection lives behind an `Arc<Mutex<>>` and every call hops onto
//! the blocking pool with `tokio::task::spawn_blocking`.
//!
//! - Dry-run prepares the statement without stepping it.  Preparation
//!   errors are reported as an invalid result, and so is any statement that
//!   SQLite says would write.  The byte estimate is the database size
//!   (`page_count * page_size`), an upper bound for a full scan.
//! - Execution steps the statement on the blocking pool and stops after
//!   `limit` rows, so at most `limit` rows are ever materialised.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Value, json};
use tracing::{debug, info};

use insight_agent::{DataMartRef, DryRunResult, Row, RowStream, Warehouse};

use crate::error::{WarehouseError, WarehouseResult};

/// Thread-safe handle to one SQLite database used as a data mart.
#[derive(Clone)]
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWarehouse {
    /// Open an existing database file read-only.
    pub fn open(path: impl AsRef<Path>) -> WarehouseResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening sqlite warehouse");

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.pragma_update(None, "query_only", true)?;

        Ok(Self::from_connection(conn))
    }

    /// Create a writable in-memory database; seed it with [`Self::execute_batch`].
    pub fn open_in_memory() -> WarehouseResult<Self> {
        debug!("opening in-memory sqlite warehouse");
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an already opened connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a batch of statements, e.g. fixture DDL and inserts.
    pub async fn execute_batch(&self, sql: impl Into<String>) -> WarehouseResult<()> {
        let sql = sql.into();
        self.with_connection(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> WarehouseResult<T>
    where
        F: FnOnce(&Connection) -> WarehouseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| WarehouseError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn dry_run(&self, target: &DataMartRef, sql: &str) -> insight_agent::Result<DryRunResult> {
        debug!(data_mart_id = %target.data_mart_id, "sqlite dry-run");
        let sql = sql.to_owned();
        let result = self
            .with_connection(move |conn| {
                let stmt = match conn.prepare(&sql) {
                    Ok(stmt) => stmt,
                    Err(e) => return Ok(DryRunResult::invalid(e.to_string())),
                };
                if !stmt.readonly() {
                    return Ok(DryRunResult::invalid(WarehouseError::NotReadOnly.to_string()));
                }
                drop(stmt);
                Ok(DryRunResult::valid(Some(database_bytes(conn)?)))
            })
            .await?;
        Ok(result)
    }

    async fn execute_rows(
        &self,
        target: &DataMartRef,
        sql: &str,
        limit: u64,
    ) -> insight_agent::Result<RowStream> {
        debug!(data_mart_id = %target.data_mart_id, limit, "sqlite execute");
        let sql = sql.to_owned();
        let items = self
            .with_connection(move |conn| fetch_rows(conn, &sql, limit))
            .await?;
        Ok(stream::iter(items).boxed())
    }

    async fn describe(&self, target: &DataMartRef) -> insight_agent::Result<Value> {
        let data_mart_id = target.data_mart_id.clone();
        let tables = self.with_connection(describe_tables).await?;
        Ok(json!({ "dataMartId": data_mart_id, "tables": tables }))
    }
}

// ── helpers ──────────────────────────────────────────────────────────

fn database_bytes(conn: &Connection) -> WarehouseResult<u64> {
    let bytes: i64 = conn.query_row(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(bytes).unwrap_or_default())
}

/// Step the statement until `limit` rows or the first error.
///
/// A mid-stream failure is kept as the last item so the consumer sees the
/// rows before it, then the error.
fn fetch_rows(
    conn: &Connection,
    sql: &str,
    limit: u64,
) -> WarehouseResult<Vec<insight_agent::Result<Row>>> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(WarehouseError::NotReadOnly);
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut rows = stmt.query([])?;
    let mut items = Vec::new();
    while (items.len() as u64) < limit {
        match rows.next() {
            Ok(Some(row)) => {
                let mut out = Row::new();
                for (i, name) in columns.iter().enumerate() {
                    let value = match row.get_ref(i) {
                        Ok(value) => to_json(value),
                        Err(e) => {
                            items.push(Err(WarehouseError::from(e).into()));
                            return Ok(items);
                        }
                    };
                    out.insert(name.clone(), value);
                }
                items.push(Ok(out));
            }
            Ok(None) => break,
            Err(e) => {
                items.push(Err(WarehouseError::from(e).into()));
                break;
            }
        }
    }
    Ok(items)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(format!("<blob {} bytes>", bytes.len())),
    }
}

fn describe_tables(conn: &Connection) -> WarehouseResult<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let tables: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut columns_stmt =
        conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;

    let mut out = Vec::with_capacity(tables.len());
    for (name, kind) in tables {
        let columns: Vec<Value> = columns_stmt
            .query_map([&name], |row| {
                let column: String = row.get(0)?;
                let data_type: String = row.get(1)?;
                let not_null: bool = row.get(2)?;
                let pk: i64 = row.get(3)?;
                Ok(json!({
                    "name": column,
                    "type": data_type,
                    "nullable": !not_null,
                    "primaryKey": pk > 0,
                }))
            })?
            .collect::<Result<_, _>>()?;
        out.push(json!({ "name": name, "kind": kind, "columns": columns }));
    }
    Ok(out)
}

// ── tests ────────────────────────────────────────────────────────────
