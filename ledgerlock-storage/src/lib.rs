//! Record storage for ledgerlock.
//!
//! The encryption subsystem consumes storage only through the minimal
//! [`RecordStore`] interface: point reads, id-ordered paginated listing,
//! and atomic batch writes. The actual provider is an external
//! collaborator; this crate ships two implementations — an in-memory
//! store for tests and a DuckDB-backed local document store.
//!
//! Records are addressed by slash-separated paths
//! (`users/{uid}/expenses/{id}`); a collection path is everything up to
//! the final id segment. Listing returns records in id order so a cursor
//! (the last id seen) gives resumable pagination.

mod document_store;
mod error;
mod memory;

pub use document_store::DocumentStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored record in its wire shape.
pub type Record = Map<String, Value>;

/// A record returned from a listing, with its identity attached.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    /// Final path segment.
    pub id: String,
    /// Full document path.
    pub path: String,
    pub fields: Record,
}

/// One write in a batch: the fields are merged into the record at `path`
/// (fields not listed survive).
#[derive(Clone, Debug)]
pub struct RecordUpdate {
    pub path: String,
    pub fields: Record,
}

impl RecordUpdate {
    pub fn new(path: impl Into<String>, fields: Record) -> Self {
        Self {
            path: path.into(),
            fields,
        }
    }
}

/// The storage collaborator interface.
///
/// `batch_write` is atomic per call — all updates land or none do — but
/// nothing coordinates across calls; multi-batch operations must be
/// idempotent and cursor-resumable instead.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads one record by full path.
    async fn get(&self, path: &str) -> StorageResult<Option<Record>>;

    /// Lists immediate child records of a collection, id-ordered,
    /// strictly after `cursor` when given, at most `limit` records.
    async fn list(
        &self,
        collection_path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<StoredRecord>>;

    /// Applies every update or none of them.
    async fn batch_write(&self, updates: Vec<RecordUpdate>) -> StorageResult<()>;
}

/// Splits a document path into (collection, id).
pub(crate) fn split_path(path: &str) -> StorageResult<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {
            Ok((collection, id))
        }
        _ => Err(StorageError::InvalidPath(path.to_string())),
    }
}
