//! Unencryption: the inverse of migration.
//!
//! Decrypts every mapped field of already-encrypted records and writes
//! plaintext back. A record that cannot be fully opened is counted as
//! failed and left untouched — ciphertext is never half-replaced. Escrow
//! metadata and the enabled flag are the caller's responsibility.

use crate::collections::collection_plan;
use crate::error::EngineResult;
use crate::progress::{EngineProgress, EngineStatus};
use ledgerlock_crypto::{
    decrypt_document_strict, has_fully_encrypted_fields, DerivedKey, EntityKind,
};
use ledgerlock_storage::{RecordStore, RecordUpdate};
use std::sync::Arc;
use tracing::{info, warn};

use crate::migrate::DEFAULT_BATCH_SIZE;

pub struct UnencryptionEngine {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
}

impl UnencryptionEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Writes plaintext back for every encrypted record of the user.
    pub async fn run(
        &self,
        user_id: &str,
        key: &DerivedKey,
        mut on_progress: impl FnMut(&EngineProgress),
    ) -> EngineResult<EngineProgress> {
        let mut progress = EngineProgress::in_progress();
        info!(user = user_id, "starting unencryption run");

        for path in collection_plan(self.store.as_ref(), user_id).await? {
            let Some(kind) = EntityKind::from_path(&path) else {
                continue;
            };
            if kind.encrypted_fields().is_empty() {
                continue;
            }
            self.unencrypt_collection(&path, kind, key, &mut progress, &mut on_progress)
                .await?;
        }

        progress.status = EngineStatus::Completed;
        on_progress(&progress);
        info!(
            processed = progress.processed,
            succeeded = progress.succeeded,
            skipped = progress.skipped,
            failed = progress.failed,
            "unencryption run finished"
        );
        Ok(progress)
    }

    async fn unencrypt_collection(
        &self,
        path: &str,
        kind: EntityKind,
        key: &DerivedKey,
        progress: &mut EngineProgress,
        on_progress: &mut impl FnMut(&EngineProgress),
    ) -> EngineResult<()> {
        let mut cursor: Option<String> = None;

        loop {
            let records = self
                .store
                .list(path, cursor.as_deref(), self.batch_size)
                .await?;
            if records.is_empty() {
                break;
            }
            cursor = records.last().map(|r| r.id.clone());

            let mut updates = Vec::new();
            for record in &records {
                progress.processed += 1;
                progress.last_processed_id = Some(record.id.clone());

                if !has_fully_encrypted_fields(&record.fields, kind) {
                    progress.skipped += 1;
                    continue;
                }

                match decrypt_document_strict(&record.fields, kind, key) {
                    Ok(plain) => {
                        updates.push(RecordUpdate::new(record.path.clone(), plain));
                    }
                    Err(e) => {
                        progress.failed += 1;
                        progress.record_failure(&record.id, e);
                    }
                }
            }

            if !updates.is_empty() {
                let count = updates.len() as u64;
                match self.store.batch_write(updates).await {
                    Ok(()) => progress.succeeded += count,
                    Err(e) => {
                        warn!(collection = path, %e, "batch commit failed");
                        progress.failed += count;
                        progress.record_failure("batch_commit", e);
                    }
                }
            }

            on_progress(progress);
            tokio::task::yield_now().await;

            if records.len() < self.batch_size {
                break;
            }
        }
        Ok(())
    }
}
