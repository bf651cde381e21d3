//! Unlock resolution.
//!
//! Key derivation never errors on a wrong passphrase, so every path here
//! proves a candidate key by decrypting real stored ciphertext before
//! accepting it. Input may be the main passphrase or one of the recovery
//! codes; salt resolution prefers the device-local cache over remote
//! metadata, because remote may have been overwritten non-atomically by
//! an earlier partial failure.

use crate::{EncryptionManager, EncryptionMetadata, SessionError, SessionResult};
use ledgerlock_crypto::{
    decrypt_value, derive_key, encrypt_value, normalize_recovery_code, user_collection_paths,
    CryptoError, DerivedKey, EntityKind, Salt,
};
use serde_json::Value;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Consecutive failures before the session locks out.
pub const MAX_UNLOCK_ATTEMPTS: u32 = 30;

/// How many records per collection the sample scan inspects.
const SAMPLE_SCAN_LIMIT: usize = 25;

/// Upper bound on collected samples per unlock attempt.
const MAX_SAMPLES: usize = 5;

/// Known value for the round-trip self-test used when no stored
/// ciphertext exists yet.
const SELF_TEST_VALUE: &str = "ledgerlock-unlock-self-test-v1";

/// Outcome of trying an input as the main passphrase.
enum MainAttempt {
    Unlocked(DerivedKey),
    Failed {
        /// Remote-salt derivation succeeded but the live test failed
        /// while local and remote salts disagree.
        salt_disagreement: bool,
    },
}

impl EncryptionManager {
    /// One unlock attempt with a passphrase or recovery code.
    ///
    /// Success populates the key session and resets the attempt counter;
    /// any failure increments it. After [`MAX_UNLOCK_ATTEMPTS`]
    /// consecutive failures only a full session reset unlocks again.
    pub async fn unlock(&self, code: &str) -> SessionResult<()> {
        let metadata = self.metadata().await?;
        if !metadata.is_encrypted {
            return Err(SessionError::NotEnabled);
        }
        if self.attempt_count().load(Ordering::SeqCst) >= MAX_UNLOCK_ATTEMPTS {
            return Err(SessionError::TooManyUnlockAttempts);
        }

        match self.resolve_key(code, &metadata).await {
            Ok(key) => {
                self.session().set(key);
                self.attempt_count().store(0, Ordering::SeqCst);
                debug!(user = %self.user_id(), "unlock succeeded");
                Ok(())
            }
            Err(e) => {
                let used = self.attempt_count().fetch_add(1, Ordering::SeqCst) + 1;
                if used >= MAX_UNLOCK_ATTEMPTS {
                    Err(SessionError::TooManyUnlockAttempts)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Resolves an input to a verified key: main passphrase first (local
    /// then remote salt), then recovery-code escrow.
    async fn resolve_key(
        &self,
        code: &str,
        metadata: &EncryptionMetadata,
    ) -> SessionResult<DerivedKey> {
        let salt_disagreement = match self.try_main_passphrase(code, metadata).await? {
            MainAttempt::Unlocked(key) => return Ok(key),
            MainAttempt::Failed { salt_disagreement } => salt_disagreement,
        };

        // Recovery-code path: only inputs that normalize into the code
        // format reach the vault; everything else was a passphrase guess.
        if normalize_recovery_code(code).is_ok() {
            if let Some(vault) = metadata.recovery_vault() {
                match vault.open_with_code(code, self.kdf()) {
                    Ok(main_passphrase) => {
                        debug!("recovery code matched; retrying with escrowed passphrase");
                        if let MainAttempt::Unlocked(key) =
                            self.try_main_passphrase(&main_passphrase, metadata).await?
                        {
                            return Ok(key);
                        }
                        // The escrowed passphrase no longer opens the
                        // data — the main salt is the problem, not the code
                        return Err(SessionError::SaltMismatch);
                    }
                    Err(CryptoError::RecoveryCodeNotFound) => {
                        return Err(SessionError::RecoveryCodeNotFound)
                    }
                    Err(CryptoError::DecryptionFailed) => {
                        // Hash matched but the escrow entry would not
                        // open — corrupted vault entry
                        warn!("recovery vault entry failed to open despite hash match");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if salt_disagreement {
            return Err(SessionError::SaltMismatch);
        }
        Err(SessionError::InvalidCode {
            remaining: self.remaining_attempts().saturating_sub(1),
        })
    }

    /// Tries an input as the main passphrase against the local salt, then
    /// the remote salt, with a live decryption test for each.
    async fn try_main_passphrase(
        &self,
        passphrase: &str,
        metadata: &EncryptionMetadata,
    ) -> SessionResult<MainAttempt> {
        let local_b64 = self.salt_cache().load();
        let remote_b64 = metadata.encryption_salt.clone();

        if local_b64.is_none() && remote_b64.is_none() {
            return Err(SessionError::MissingSalt);
        }

        // Step 1: locally cached salt
        if let Some(local) = &local_b64 {
            if let Ok(salt) = Salt::from_base64(local) {
                if let Ok(key) = derive_key(passphrase, &salt, self.kdf()) {
                    if self.key_opens_sample(&key).await? {
                        if remote_b64.as_deref() != Some(local.as_str()) {
                            // Local is authoritative: resynchronize the
                            // remote copy to the salt that provably works
                            warn!(
                                user = %self.user_id(),
                                "remote salt diverged from working local salt; resynchronizing"
                            );
                            let mut fields = ledgerlock_crypto::Record::new();
                            fields.insert(
                                "encryptionSalt".into(),
                                Value::String(local.clone()),
                            );
                            self.save_metadata_fields(fields).await?;
                        }
                        return Ok(MainAttempt::Unlocked(key));
                    }
                }
            } else {
                warn!("local salt cache is corrupt; ignoring it");
            }
        }

        // Step 2: remote-stored salt
        let mut salt_disagreement = false;
        if let Some(remote) = &remote_b64 {
            if local_b64.as_deref() != Some(remote.as_str()) {
                let salt = Salt::from_base64(remote)?;
                if let Ok(key) = derive_key(passphrase, &salt, self.kdf()) {
                    if self.key_opens_sample(&key).await? {
                        self.salt_cache().store(remote);
                        return Ok(MainAttempt::Unlocked(key));
                    }
                    // Derivation succeeded, live test failed, and the two
                    // salt copies disagree: flag the operational fault
                    salt_disagreement = local_b64.is_some();
                }
            }
        }

        Ok(MainAttempt::Failed { salt_disagreement })
    }

    /// Whether a passphrase opens the user's data with either stored
    /// salt (no session mutation, no attempt counting).
    pub(crate) async fn passphrase_opens_data(
        &self,
        passphrase: &str,
        metadata: &EncryptionMetadata,
    ) -> SessionResult<bool> {
        Ok(matches!(
            self.try_main_passphrase(passphrase, metadata).await?,
            MainAttempt::Unlocked(_)
        ))
    }

    /// The live decryption test: proves a key against real stored
    /// ciphertext. Several samples are tried and any one opening accepts
    /// the key — AES-GCM authentication makes a false accept infeasible,
    /// while a single corrupted record cannot veto the correct
    /// passphrase. A freshly-enabled account with no ciphertext yet
    /// degrades to an encrypt-then-decrypt round trip.
    async fn key_opens_sample(&self, key: &DerivedKey) -> SessionResult<bool> {
        let samples = self.find_sample_ciphertexts().await?;
        if samples.is_empty() {
            let sealed = encrypt_value(SELF_TEST_VALUE, key)?;
            return Ok(matches!(decrypt_value(&sealed, key), Ok(v) if v == SELF_TEST_VALUE));
        }
        Ok(samples
            .iter()
            .any(|sample| decrypt_value(sample, key).is_ok()))
    }

    /// Scans the user's collections for field values with the sealed
    /// shape, at most one per record.
    async fn find_sample_ciphertexts(&self) -> SessionResult<Vec<String>> {
        let mut samples = Vec::new();
        for path in user_collection_paths(self.user_id()) {
            let Some(kind) = EntityKind::from_path(&path) else {
                continue;
            };
            let records = self.store().list(&path, None, SAMPLE_SCAN_LIMIT).await?;
            for record in records {
                for &field in kind.encrypted_fields() {
                    if let Some(Value::String(s)) = record.fields.get(field) {
                        if ledgerlock_crypto::is_encrypted_str(s) {
                            samples.push(s.clone());
                            break;
                        }
                    }
                }
                if samples.len() >= MAX_SAMPLES {
                    return Ok(samples);
                }
            }
        }
        Ok(samples)
    }
}
