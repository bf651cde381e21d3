//! Per-user encryption session for ledgerlock.
//!
//! Owns everything between the crypto primitives and the batch engines:
//! the persisted encryption metadata on the user's root record, the
//! in-memory key session, the device-local salt cache, unlock resolution
//! (passphrase or recovery code, always proven by a live decryption), and
//! the recovery vault lifecycle.
//!
//! The derived key lives only in a [`KeySession`] — an owned, injectable
//! cell, never module-global state — and is discarded on lock or logout.

mod recovery;
mod unlock;

pub use unlock::MAX_UNLOCK_ATTEMPTS;

use ledgerlock_crypto::{
    derive_key, encrypt_document, CryptoError, DerivedKey, EntityKind, KdfParams, Record,
    RecoveryVault, Salt,
};
use ledgerlock_storage::{RecordStore, RecordUpdate, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::info;

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("encryption is not enabled for this user")]
    NotEnabled,
    #[error("encryption is already enabled")]
    AlreadyEnabled,
    #[error("encryption is locked")]
    NotUnlocked,
    #[error("invalid encryption code ({remaining} attempts remaining)")]
    InvalidCode { remaining: u32 },
    /// Key derivation succeeded but no stored salt decrypts existing data
    /// while local and remote copies disagree — a recoverable operational
    /// fault, not a wrong code.
    #[error("stored encryption salts disagree and neither decrypts existing data")]
    SaltMismatch,
    #[error("no encryption salt found locally or remotely")]
    MissingSalt,
    #[error("too many failed unlock attempts; session reset required")]
    TooManyUnlockAttempts,
    #[error("recovery code does not match any vault entry")]
    RecoveryCodeNotFound,
    #[error("no recovery vault is configured")]
    RecoveryNotConfigured,
    #[error("concurrent operation in progress: {0}")]
    ConcurrentOperation(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type SessionResult<T> = Result<T, SessionError>;

// ============================================================================
// KeySession — the in-memory key cell
// ============================================================================

/// The session's derived key, held only in volatile memory.
///
/// A single mutable cell per session, owned by the caller and injected
/// into whatever needs to encrypt or decrypt. Cloning shares the cell.
#[derive(Clone, Default)]
pub struct KeySession {
    key: Arc<RwLock<Option<DerivedKey>>>,
}

impl KeySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: DerivedKey) {
        let mut guard = self.key.write().unwrap();
        *guard = Some(key);
    }

    pub fn clear(&self) {
        let mut guard = self.key.write().unwrap();
        *guard = None;
    }

    pub fn current(&self) -> Option<DerivedKey> {
        self.key.read().unwrap().clone()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().unwrap().is_some()
    }
}

// ============================================================================
// SaltCache — device-local copy of the derivation salt
// ============================================================================

/// Device-local storage for the main passphrase salt.
///
/// The local copy is treated as more authoritative than the remote one on
/// mismatch, since remote metadata may have been overwritten
/// non-atomically by an earlier partial failure.
pub trait SaltCache: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, salt_b64: &str);
    fn clear(&self);
}

/// In-memory salt cache (tests, or platforms without durable local state).
#[derive(Default)]
pub struct MemorySaltCache {
    salt: Mutex<Option<String>>,
}

impl MemorySaltCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaltCache for MemorySaltCache {
    fn load(&self) -> Option<String> {
        self.salt.lock().unwrap().clone()
    }

    fn store(&self, salt_b64: &str) {
        *self.salt.lock().unwrap() = Some(salt_b64.to_string());
    }

    fn clear(&self) {
        *self.salt.lock().unwrap() = None;
    }
}

// ============================================================================
// Persisted metadata
// ============================================================================

/// Encryption metadata persisted on the user's root record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionMetadata {
    pub is_encrypted: bool,
    pub encryption_salt: Option<String>,
    pub recovery_code_salt: Option<String>,
    pub recovery_code_hashes: Vec<String>,
    pub encrypted_main_codes: Vec<String>,
    pub encryption_enabled_at: Option<String>,
}

impl EncryptionMetadata {
    /// Reassembles the recovery vault, if one is configured.
    pub fn recovery_vault(&self) -> Option<RecoveryVault> {
        let salt = Salt::from_base64(self.recovery_code_salt.as_ref()?).ok()?;
        if self.recovery_code_hashes.is_empty()
            || self.recovery_code_hashes.len() != self.encrypted_main_codes.len()
        {
            return None;
        }
        Some(RecoveryVault {
            salt,
            code_hashes: self.recovery_code_hashes.clone(),
            sealed_passphrases: self.encrypted_main_codes.clone(),
        })
    }
}

// ============================================================================
// EncryptionManager
// ============================================================================

/// Orchestrates the encryption lifecycle for one user session.
pub struct EncryptionManager {
    store: Arc<dyn RecordStore>,
    salt_cache: Arc<dyn SaltCache>,
    session: KeySession,
    user_id: String,
    kdf: KdfParams,
    attempts: AtomicU32,
    operation_in_progress: AtomicBool,
}

impl EncryptionManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        salt_cache: Arc<dyn SaltCache>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            salt_cache,
            session: KeySession::new(),
            user_id: user_id.into(),
            kdf: KdfParams::default(),
            attempts: AtomicU32::new(0),
            operation_in_progress: AtomicBool::new(false),
        }
    }

    /// Overrides KDF parameters (tests use fast ones).
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session(&self) -> &KeySession {
        &self.session
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn salt_cache(&self) -> Arc<dyn SaltCache> {
        self.salt_cache.clone()
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    pub fn remaining_attempts(&self) -> u32 {
        MAX_UNLOCK_ATTEMPTS.saturating_sub(self.attempts.load(Ordering::SeqCst))
    }

    pub(crate) fn attempt_count(&self) -> &AtomicU32 {
        &self.attempts
    }

    /// Loads the user's encryption metadata (defaults when absent).
    pub async fn metadata(&self) -> SessionResult<EncryptionMetadata> {
        let path = ledgerlock_crypto::user_root_path(&self.user_id);
        let metadata = match self.store.get(&path).await? {
            Some(record) => serde_json::from_value(Value::Object(record))
                .map_err(StorageError::Serialization)?,
            None => EncryptionMetadata::default(),
        };
        Ok(metadata)
    }

    /// Merges fields into the user's root record in one atomic write.
    pub(crate) async fn save_metadata_fields(&self, fields: Record) -> SessionResult<()> {
        let path = ledgerlock_crypto::user_root_path(&self.user_id);
        self.store
            .batch_write(vec![RecordUpdate::new(path, fields)])
            .await?;
        Ok(())
    }

    /// Claims the exclusive-operation flag for rotation or recovery-code
    /// regeneration. Fails fast rather than interleaving writes.
    pub fn begin_operation(&self, name: &'static str) -> SessionResult<OperationGuard<'_>> {
        if self
            .operation_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::ConcurrentOperation(name));
        }
        Ok(OperationGuard {
            flag: &self.operation_in_progress,
        })
    }

    /// Enables encryption: new salt, derived key, recovery vault, one
    /// atomic metadata write. Returns the ten recovery codes — shown to
    /// the user once, never persisted.
    pub async fn enable(&self, passphrase: &str) -> SessionResult<Vec<String>> {
        let metadata = self.metadata().await?;
        if metadata.is_encrypted {
            return Err(SessionError::AlreadyEnabled);
        }

        let salt = Salt::random();
        let key = derive_key(passphrase, &salt, &self.kdf)?;
        let (codes, vault) = ledgerlock_crypto::generate_vault(passphrase, &self.kdf)?;

        let mut fields = Record::new();
        fields.insert("isEncrypted".into(), Value::Bool(true));
        fields.insert("encryptionSalt".into(), Value::String(salt.to_base64()));
        fields.insert(
            "encryptionEnabledAt".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        recovery::insert_vault_fields(&mut fields, &vault);
        self.save_metadata_fields(fields).await?;

        self.salt_cache.store(&salt.to_base64());
        self.session.set(key);
        info!(user = %self.user_id, "encryption enabled");
        Ok(codes)
    }

    /// Discards the in-memory key. The attempt counter survives — a
    /// locked-out session stays locked out until `reset_session`.
    pub fn lock(&self) {
        self.session.clear();
    }

    /// Full session reset: key discarded, attempt counter cleared. The
    /// only way out of the locked-out state.
    pub fn reset_session(&self) {
        self.session.clear();
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Disables encryption. Deliberately leaves already-encrypted records
    /// encrypted — run the unencryption engine first to get plaintext
    /// back. Escrow metadata stays so recovery codes keep working.
    pub async fn disable(&self) -> SessionResult<()> {
        let metadata = self.metadata().await?;
        if !metadata.is_encrypted {
            return Err(SessionError::NotEnabled);
        }

        let mut fields = Record::new();
        fields.insert("isEncrypted".into(), Value::Bool(false));
        fields.insert("encryptionEnabledAt".into(), Value::Null);
        self.save_metadata_fields(fields).await?;

        self.session.clear();
        self.salt_cache.clear();
        info!(user = %self.user_id, "encryption disabled; existing records remain encrypted");
        Ok(())
    }

    /// Encrypts a record with the session key.
    ///
    /// Fail-closed: when the session is locked this errors instead of
    /// passing plaintext through.
    pub fn encrypt_record(&self, record: &Record, kind: EntityKind) -> SessionResult<Record> {
        let key = self.session.current().ok_or(SessionError::NotUnlocked)?;
        Ok(encrypt_document(record, kind, &key)?)
    }

    /// Decrypts a record with the session key (tolerant of mixed
    /// encrypted/plaintext fields).
    pub fn decrypt_record(&self, record: &Record, kind: EntityKind) -> SessionResult<Record> {
        let key = self.session.current().ok_or(SessionError::NotUnlocked)?;
        Ok(ledgerlock_crypto::decrypt_document(record, kind, &key))
    }
}

/// RAII guard for the exclusive-operation flag.
pub struct OperationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_session_set_clear() {
        let session = KeySession::new();
        assert!(!session.is_unlocked());

        session.set(ledgerlock_crypto::generate_random_key());
        assert!(session.is_unlocked());
        assert!(session.current().is_some());

        session.clear();
        assert!(!session.is_unlocked());
        assert!(session.current().is_none());
    }

    #[test]
    fn cloned_sessions_share_the_cell() {
        let a = KeySession::new();
        let b = a.clone();
        a.set(ledgerlock_crypto::generate_random_key());
        assert!(b.is_unlocked());
        b.clear();
        assert!(!a.is_unlocked());
    }

    #[test]
    fn metadata_roundtrips_camel_case() {
        let json = serde_json::json!({
            "isEncrypted": true,
            "encryptionSalt": "c2FsdHNhbHRzYWx0c2FsdA==",
            "recoveryCodeSalt": "c2FsdHNhbHRzYWx0c2FsdA==",
            "recoveryCodeHashes": ["h1"],
            "encryptedMainCodes": ["iv:ct"],
            "email": "ignored@example.com",
        });
        let metadata: EncryptionMetadata = serde_json::from_value(json).unwrap();
        assert!(metadata.is_encrypted);
        assert_eq!(metadata.recovery_code_hashes.len(), 1);
    }

    #[test]
    fn vault_requires_matching_arrays() {
        let mut metadata = EncryptionMetadata {
            is_encrypted: true,
            recovery_code_salt: Some(Salt::random().to_base64()),
            recovery_code_hashes: vec!["h1".into(), "h2".into()],
            encrypted_main_codes: vec!["only-one".into()],
            ..Default::default()
        };
        assert!(metadata.recovery_vault().is_none());

        metadata.encrypted_main_codes.push("two".into());
        assert!(metadata.recovery_vault().is_some());
    }
}
