//! In-memory record store for tests.

use crate::error::StorageResult;
use crate::{split_path, Record, RecordStore, RecordUpdate, StoredRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// BTreeMap-backed store. Path ordering is lexicographic, which makes
/// id-ordered pagination deterministic.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (test assertions).
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, path: &str) -> StorageResult<Option<Record>> {
        Ok(self.records.read().await.get(path).cloned())
    }

    async fn list(
        &self,
        collection_path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<StoredRecord>> {
        let prefix = format!("{}/", collection_path.trim_end_matches('/'));
        let records = self.records.read().await;

        let mut out = Vec::new();
        for (path, fields) in records.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            let id = &path[prefix.len()..];
            // Immediate children only — deeper paths belong to subcollections
            if id.contains('/') {
                continue;
            }
            if let Some(cursor) = cursor {
                if id <= cursor {
                    continue;
                }
            }
            out.push(StoredRecord {
                id: id.to_string(),
                path: path.clone(),
                fields: fields.clone(),
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn batch_write(&self, updates: Vec<RecordUpdate>) -> StorageResult<()> {
        // Validate before mutating so a bad path leaves the store untouched
        for update in &updates {
            split_path(&update.path)?;
        }
        let mut records = self.records.write().await;
        for update in updates {
            let entry = records.entry(update.path).or_default();
            for (k, v) in update.fields {
                entry.insert(k, v);
            }
        }
        Ok(())
    }
}
