//! Transactional key rotation.
//!
//! Re-encrypts every record under a new passphrase and publishes the new
//! escrow metadata (salt + recovery vault) only after the full run
//! reports zero failures. The run is an explicit phase sequence with its
//! compensation captured up front: from the freeze step onward, any
//! failure restores the old in-memory key and old cached salt and leaves
//! remote metadata untouched, so the previous passphrase remains valid.
//!
//! Rotation is decrypt-all first, then encrypt-all: a validation sweep
//! proves every record readable before the write sweep touches storage.
//! A document that fails validation rolls the run back with no data
//! rewritten at all. The write sweep's batch commits are atomic but the
//! sweep as a whole is not — if it dies partway, individual records are
//! already on the new key, which is why a record that strictly decrypts
//! under the new key counts as a skip (double-rotation guard), not a
//! failure. Without that guard a retry could never reach zero failures.

use crate::collections::collection_plan;
use crate::error::{EngineError, EngineResult};
use crate::progress::{EngineProgress, EngineStatus};
use ledgerlock_crypto::{
    decrypt_document_strict, decrypt_value, derive_key, encrypt_document, encrypt_value,
    generate_vault, has_fully_encrypted_fields, DerivedKey, EntityKind, Salt,
};
use ledgerlock_session::{EncryptionManager, KeySession, SaltCache, SessionError};
use ledgerlock_storage::{RecordStore, RecordUpdate};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::yield_now;
use tracing::{info, warn};

use crate::migrate::DEFAULT_BATCH_SIZE;

/// Known value for the precondition round-trip self-test.
const SELF_TEST_VALUE: &str = "ledgerlock-rotation-self-test-v1";

/// Phases of a rotation run, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPhase {
    PreconditionCheck,
    Rotating,
    Verifying,
    Committing,
    Done,
    RolledBack,
}

/// Result of a rotation run.
#[derive(Debug)]
pub struct RotationOutcome {
    pub phase: RotationPhase,
    pub progress: EngineProgress,
    /// Fresh recovery codes for the new passphrase; empty on rollback.
    pub recovery_codes: Vec<String>,
}

impl RotationOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == RotationPhase::Done
    }
}

/// Compensation captured at the freeze step.
struct RotationRollback {
    session: KeySession,
    cache: Arc<dyn SaltCache>,
    old_key: DerivedKey,
    old_cached_salt: Option<String>,
}

impl RotationRollback {
    fn restore(self) {
        self.session.set(self.old_key);
        match self.old_cached_salt {
            Some(salt) => self.cache.store(&salt),
            None => self.cache.clear(),
        }
    }
}

pub struct KeyRotationEngine {
    batch_size: usize,
}

impl Default for KeyRotationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRotationEngine {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Rotates every record from the session's current key to a key
    /// derived from `new_passphrase`.
    ///
    /// Serialized against recovery-code regeneration through the
    /// manager's exclusive-operation flag.
    pub async fn run(
        &self,
        manager: &EncryptionManager,
        new_passphrase: &str,
        mut on_progress: impl FnMut(&EngineProgress),
    ) -> EngineResult<RotationOutcome> {
        let _guard = manager.begin_operation("key-rotation")?;

        // PreconditionCheck: unlocked session, proven by a live round trip
        let old_key = manager
            .session()
            .current()
            .ok_or(EngineError::Session(SessionError::NotUnlocked))?;
        let sealed = encrypt_value(SELF_TEST_VALUE, &old_key)?;
        if decrypt_value(&sealed, &old_key)? != SELF_TEST_VALUE {
            return Err(EngineError::Precondition(
                "current key failed the round-trip self-test".into(),
            ));
        }

        // Freeze: no concurrent write may use the old key mid-rotation
        let rollback = RotationRollback {
            session: manager.session().clone(),
            cache: manager.salt_cache(),
            old_key: old_key.clone(),
            old_cached_salt: manager.salt_cache().load(),
        };
        manager.session().clear();
        info!(user = manager.user_id(), "rotation started; session key frozen");

        let new_salt = Salt::random();
        let new_key = match derive_key(new_passphrase, &new_salt, manager.kdf()) {
            Ok(key) => key,
            Err(e) => {
                rollback.restore();
                return Err(e.into());
            }
        };
        // The pending salt lands in the local cache before any data is
        // rewritten; remote metadata sees it only on a zero-failure
        // commit. Rollback restores the previous cache entry.
        manager.salt_cache().store(&new_salt.to_base64());

        let store = manager.store();
        let plan = match collection_plan(store.as_ref(), manager.user_id()).await {
            Ok(plan) => plan,
            Err(e) => {
                rollback.restore();
                return Err(e);
            }
        };

        // Rotating: validation sweep — every encrypted record must
        // strictly decrypt under the old key (or already be on the new
        // key) before anything is written
        let mut progress = EngineProgress::in_progress();
        if let Err(e) = self
            .validate_all(store.as_ref(), &plan, &old_key, &new_key, &mut progress, &mut on_progress)
            .await
        {
            rollback.restore();
            return Err(e);
        }
        if progress.failed > 0 {
            warn!(
                failed = progress.failed,
                "rotation validation failed; rolling back with no data rewritten"
            );
            rollback.restore();
            progress.status = EngineStatus::Failed;
            on_progress(&progress);
            return Ok(RotationOutcome {
                phase: RotationPhase::RolledBack,
                progress,
                recovery_codes: Vec::new(),
            });
        }

        // Write sweep: decrypt old, re-encrypt new, verify, batch-commit
        if let Err(e) = self
            .reencrypt_all(store.as_ref(), &plan, &old_key, &new_key, &mut progress, &mut on_progress)
            .await
        {
            rollback.restore();
            return Err(e);
        }

        // Verifying: the whole run succeeds only at exactly zero failures
        if progress.failed > 0 {
            warn!(
                failed = progress.failed,
                "rotation write sweep failed; rolling back escrow metadata"
            );
            rollback.restore();
            progress.status = EngineStatus::Failed;
            on_progress(&progress);
            return Ok(RotationOutcome {
                phase: RotationPhase::RolledBack,
                progress,
                recovery_codes: Vec::new(),
            });
        }

        // Committing: brand-new vault under the new passphrase, published
        // together with the new salt in one atomic metadata write
        let codes = match self.commit_escrow(manager, new_passphrase, &new_salt).await {
            Ok(codes) => codes,
            Err(e) => {
                warn!(%e, "escrow metadata commit failed; rolling back");
                rollback.restore();
                return Err(e);
            }
        };

        manager.session().set(new_key);
        progress.status = EngineStatus::Completed;
        on_progress(&progress);
        info!(
            processed = progress.processed,
            succeeded = progress.succeeded,
            skipped = progress.skipped,
            "rotation complete"
        );

        Ok(RotationOutcome {
            phase: RotationPhase::Done,
            progress,
            recovery_codes: codes,
        })
    }

    async fn commit_escrow(
        &self,
        manager: &EncryptionManager,
        new_passphrase: &str,
        new_salt: &Salt,
    ) -> EngineResult<Vec<String>> {
        let (codes, vault) = generate_vault(new_passphrase, manager.kdf())?;
        manager.replace_escrow_metadata(new_salt, &vault).await?;
        Ok(codes)
    }

    /// Validation sweep: proves every encrypted record readable without
    /// writing anything. Fills `processed`, `skipped`, and `failed`.
    async fn validate_all(
        &self,
        store: &dyn RecordStore,
        plan: &[String],
        old_key: &DerivedKey,
        new_key: &DerivedKey,
        progress: &mut EngineProgress,
        on_progress: &mut impl FnMut(&EngineProgress),
    ) -> EngineResult<()> {
        for path in plan {
            let Some(kind) = EntityKind::from_path(path) else {
                continue;
            };
            if kind.encrypted_fields().is_empty() {
                continue;
            }

            let mut cursor: Option<String> = None;
            loop {
                let records = store.list(path, cursor.as_deref(), self.batch_size).await?;
                if records.is_empty() {
                    break;
                }
                cursor = records.last().map(|r| r.id.clone());

                for record in &records {
                    progress.processed += 1;
                    progress.last_processed_id = Some(record.id.clone());

                    // Plaintext records are not part of the rotation
                    if !has_fully_encrypted_fields(&record.fields, kind) {
                        progress.skipped += 1;
                        continue;
                    }
                    if decrypt_document_strict(&record.fields, kind, old_key).is_ok() {
                        continue;
                    }
                    // Double-rotation guard: a crashed earlier run may
                    // have left this record on the new key already
                    if decrypt_document_strict(&record.fields, kind, new_key).is_ok() {
                        progress.skipped += 1;
                    } else {
                        progress.failed += 1;
                        progress.record_failure(
                            &record.id,
                            "cannot decrypt with either key; corrupted or double-encrypted",
                        );
                    }
                }

                on_progress(progress);
                yield_now().await;
                if records.len() < self.batch_size {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Write sweep: re-encrypts every old-key record and commits per
    /// batch. Runs only after a clean validation sweep.
    async fn reencrypt_all(
        &self,
        store: &dyn RecordStore,
        plan: &[String],
        old_key: &DerivedKey,
        new_key: &DerivedKey,
        progress: &mut EngineProgress,
        on_progress: &mut impl FnMut(&EngineProgress),
    ) -> EngineResult<()> {
        for path in plan {
            let Some(kind) = EntityKind::from_path(path) else {
                continue;
            };
            if kind.encrypted_fields().is_empty() {
                continue;
            }

            let mut cursor: Option<String> = None;
            loop {
                let records = store.list(path, cursor.as_deref(), self.batch_size).await?;
                if records.is_empty() {
                    break;
                }
                cursor = records.last().map(|r| r.id.clone());

                let mut updates = Vec::new();
                for record in &records {
                    if !has_fully_encrypted_fields(&record.fields, kind) {
                        continue; // counted during validation
                    }
                    let plain = match decrypt_document_strict(&record.fields, kind, old_key) {
                        Ok(plain) => plain,
                        // Already on the new key — counted during validation
                        Err(_) => continue,
                    };

                    match encrypt_document(&plain, kind, new_key) {
                        Ok(resealed) if has_fully_encrypted_fields(&resealed, kind) => {
                            updates.push(RecordUpdate::new(record.path.clone(), resealed));
                        }
                        Ok(_) => {
                            progress.failed += 1;
                            progress
                                .record_failure(&record.id, "re-encryption verification failed");
                        }
                        Err(e) => {
                            progress.failed += 1;
                            progress.record_failure(&record.id, e);
                        }
                    }
                }

                if !updates.is_empty() {
                    let count = updates.len() as u64;
                    match store.batch_write(updates).await {
                        Ok(()) => progress.succeeded += count,
                        Err(e) => {
                            warn!(collection = %path, %e, "rotation batch commit failed");
                            progress.failed += count;
                            progress.record_failure("batch_commit", e);
                        }
                    }
                }

                on_progress(progress);
                yield_now().await;
                if records.len() < self.batch_size {
                    break;
                }
            }
        }
        Ok(())
    }
}
