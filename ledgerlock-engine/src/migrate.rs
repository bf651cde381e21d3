//! Migration of existing plaintext records to encrypted form.
//!
//! Walks every collection in fixed-size batches. Already-encrypted
//! records are skipped, everything else is sealed, the whole batch is
//! committed atomically, and a sample of just-written records is re-read
//! and re-checked — an encryptor bug that silently under-encrypts must
//! not pass unnoticed. The cursor advances to the last listed id whether
//! or not a record was processed, so the run always terminates and can
//! resume after a crash.

use crate::collections::collection_plan;
use crate::error::EngineResult;
use crate::progress::{EngineProgress, EngineStatus};
use ledgerlock_crypto::{
    encrypt_document, has_fully_encrypted_fields, DerivedKey, EntityKind,
};
use ledgerlock_storage::{RecordStore, RecordUpdate};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records per batch (one atomic write each).
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// How many just-written records each batch re-reads for verification.
const VERIFY_SAMPLE: usize = 5;

pub struct MigrationEngine {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
}

impl MigrationEngine {
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

    /// Encrypts all of a user's unencrypted records.
    ///
    /// Per-record failures accumulate in the progress report; the run
    /// continues past them. `on_progress` fires after every batch.
    pub async fn run(
        &self,
        user_id: &str,
        key: &DerivedKey,
        mut on_progress: impl FnMut(&EngineProgress),
    ) -> EngineResult<EngineProgress> {
        let mut progress = EngineProgress::in_progress();
        info!(user = user_id, "starting encryption migration");

        for path in collection_plan(self.store.as_ref(), user_id).await? {
            let Some(kind) = EntityKind::from_path(&path) else {
                continue;
            };
            if kind.encrypted_fields().is_empty() {
                continue;
            }
            self.encrypt_collection(&path, kind, key, &mut progress, &mut on_progress)
                .await?;
        }

        progress.status = EngineStatus::Completed;
        on_progress(&progress);
        info!(
            processed = progress.processed,
            succeeded = progress.succeeded,
            skipped = progress.skipped,
            failed = progress.failed,
            "encryption migration finished"
        );
        Ok(progress)
    }

    async fn encrypt_collection(
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
            // Forward progress no matter what happens to the batch
            cursor = records.last().map(|r| r.id.clone());

            let mut updates = Vec::new();
            let mut written = Vec::new();
            for record in &records {
                progress.processed += 1;
                progress.last_processed_id = Some(record.id.clone());

                if has_fully_encrypted_fields(&record.fields, kind) {
                    progress.skipped += 1;
                    continue;
                }

                match encrypt_document(&record.fields, kind, key) {
                    Ok(sealed) if has_fully_encrypted_fields(&sealed, kind) => {
                        updates.push(RecordUpdate::new(record.path.clone(), sealed));
                        written.push((record.path.clone(), record.id.clone()));
                    }
                    Ok(_) => {
                        progress.failed += 1;
                        progress.record_failure(
                            &record.id,
                            "record not fully encrypted after sealing",
                        );
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
                    Ok(()) => {
                        progress.succeeded += count;
                        self.verify_written(&written, kind, progress).await?;
                    }
                    Err(e) => {
                        warn!(collection = path, %e, "batch commit failed");
                        progress.failed += count;
                        progress.record_failure("batch_commit", e);
                    }
                }
            }

            debug!(
                collection = path,
                processed = progress.processed,
                "batch complete"
            );
            on_progress(progress);
            // Long runs cooperate with the caller's event loop
            tokio::task::yield_now().await;

            if records.len() < self.batch_size {
                break;
            }
        }
        Ok(())
    }

    /// Re-reads a sample of just-written records and re-checks them —
    /// defense against an encryptor that silently under-encrypts.
    async fn verify_written(
        &self,
        written: &[(String, String)],
        kind: EntityKind,
        progress: &mut EngineProgress,
    ) -> EngineResult<()> {
        for (path, id) in written.iter().take(VERIFY_SAMPLE) {
            let verified = match self.store.get(path).await? {
                Some(fields) => has_fully_encrypted_fields(&fields, kind),
                None => false,
            };
            if !verified {
                warn!(record = %id, "post-commit encryption verification failed");
                progress.record_failure(id, "encryption verification failed after batch commit");
            }
        }
        Ok(())
    }
}
