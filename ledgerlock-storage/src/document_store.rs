//! DuckDB-backed local document store.
//!
//! Stores records as JSON blobs keyed by their full path, with the
//! collection and id split out for indexed listing. Batch writes run in a
//! single transaction, which is what gives `batch_write` its
//! all-or-nothing guarantee.

use crate::error::{StorageError, StorageResult};
use crate::{split_path, Record, RecordStore, RecordUpdate, StoredRecord};
use async_trait::async_trait;
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Local document store backed by DuckDB.
#[derive(Clone)]
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_duckdb_with_wal_recovery(path, "64MB", 1)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the
/// database, it is removed and the open is retried once. This handles an
/// unclean shutdown leaving a WAL file that prevents reopening.
fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<Connection> {
    let conn = match Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Cap memory/threads — DuckDB defaults to ~80% RAM per connection.
fn apply_resource_limits(
    conn: &Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
            path VARCHAR PRIMARY KEY,
            collection VARCHAR NOT NULL,
            id VARCHAR NOT NULL,
            data_json VARCHAR NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, id);",
    )?;
    Ok(())
}

#[async_trait]
impl RecordStore for DocumentStore {
    async fn get(&self, path: &str) -> StorageResult<Option<Record>> {
        let conn = self.lock_conn()?;
        let row: Result<String, duckdb::Error> = conn.query_row(
            "SELECT data_json FROM records WHERE path = ?",
            params![path],
            |row| row.get(0),
        );
        match row {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        collection_path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<StoredRecord>> {
        let collection = collection_path.trim_end_matches('/');
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, path, data_json FROM records
             WHERE collection = ? AND id > ?
             ORDER BY id LIMIT ?",
        )?;
        let rows = stmt.query_map(
            params![collection, cursor.unwrap_or(""), limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (id, path, json) = row?;
            out.push(StoredRecord {
                id,
                path,
                fields: serde_json::from_str(&json)?,
            });
        }
        Ok(out)
    }

    async fn batch_write(&self, updates: Vec<RecordUpdate>) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        conn.execute_batch("BEGIN TRANSACTION;")?;

        let result = write_all(&conn, &updates);
        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT;")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }
}

fn write_all(conn: &Connection, updates: &[RecordUpdate]) -> StorageResult<()> {
    for update in updates {
        let (collection, id) = split_path(&update.path)?;

        // Merge semantics: fields not named in the update survive
        let existing: Option<String> = match conn.query_row(
            "SELECT data_json FROM records WHERE path = ?",
            params![update.path],
            |row| row.get(0),
        ) {
            Ok(json) => Some(json),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let mut merged: Record = match existing {
            Some(json) => serde_json::from_str(&json)?,
            None => Record::new(),
        };
        for (k, v) in &update.fields {
            merged.insert(k.clone(), v.clone());
        }

        conn.execute(
            "INSERT OR REPLACE INTO records (path, collection, id, data_json)
             VALUES (?, ?, ?, ?)",
            params![update.path, collection, id, serde_json::to_string(&merged)?],
        )?;
    }
    Ok(())
}
