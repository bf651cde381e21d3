//! Recovery vault lifecycle on the session.
//!
//! The vault is persisted as three fields of the user's encryption
//! metadata and always replaced wholesale — regeneration kills every
//! prior code in one atomic write.

use crate::{EncryptionManager, SessionError, SessionResult};
use ledgerlock_crypto::{generate_vault, Record, RecoveryVault};
use serde_json::Value;
use tracing::info;

/// Serializes a vault into metadata fields for an atomic merge write.
pub(crate) fn insert_vault_fields(fields: &mut Record, vault: &RecoveryVault) {
    fields.insert(
        "recoveryCodeSalt".into(),
        Value::String(vault.salt.to_base64()),
    );
    fields.insert(
        "recoveryCodeHashes".into(),
        Value::Array(
            vault
                .code_hashes
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    fields.insert(
        "encryptedMainCodes".into(),
        Value::Array(
            vault
                .sealed_passphrases
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
}

impl EncryptionManager {
    /// Whether a recovery vault is configured.
    pub async fn has_recovery_vault(&self) -> SessionResult<bool> {
        Ok(self.metadata().await?.recovery_vault().is_some())
    }

    /// Publishes a new main salt and recovery vault in one atomic write.
    ///
    /// Rotation calls this only after a verified zero-failure
    /// re-encryption run; nothing here touches the key session or the
    /// local salt cache.
    pub async fn replace_escrow_metadata(
        &self,
        new_salt: &ledgerlock_crypto::Salt,
        vault: &RecoveryVault,
    ) -> SessionResult<()> {
        let mut fields = Record::new();
        fields.insert(
            "encryptionSalt".into(),
            Value::String(new_salt.to_base64()),
        );
        insert_vault_fields(&mut fields, vault);
        self.save_metadata_fields(fields).await
    }

    /// Replaces the recovery vault with ten fresh codes.
    ///
    /// The main passphrase is required (the vault escrows it, a derived
    /// key is not enough) and is verified with a live decryption test
    /// before anything is written. Serialized against rotation through
    /// the exclusive-operation flag. All previous codes stop working the
    /// moment the write lands.
    pub async fn regenerate_recovery_codes(
        &self,
        main_passphrase: &str,
    ) -> SessionResult<Vec<String>> {
        let _guard = self.begin_operation("recovery-code-regeneration")?;

        let metadata = self.metadata().await?;
        if !metadata.is_encrypted {
            return Err(SessionError::NotEnabled);
        }
        if !self.passphrase_opens_data(main_passphrase, &metadata).await? {
            return Err(SessionError::InvalidCode {
                remaining: self.remaining_attempts(),
            });
        }

        let (codes, vault) = generate_vault(main_passphrase, self.kdf())?;
        let mut fields = Record::new();
        insert_vault_fields(&mut fields, &vault);
        self.save_metadata_fields(fields).await?;

        info!(user = %self.user_id(), "recovery vault regenerated; prior codes invalidated");
        Ok(codes)
    }
}
