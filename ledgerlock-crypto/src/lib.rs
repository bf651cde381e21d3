//! Field-level encryption for ledgerlock.
//!
//! Provides client-side encryption of financial records using:
//! - PBKDF2-HMAC-SHA256 for key derivation from passphrases
//! - AES-256-GCM for authenticated encryption of individual field values
//! - SHA-256-hashed recovery codes escrowing the main passphrase
//!
//! # Architecture
//!
//! Values are sealed one field at a time and stored as
//! `base64(IV) ":" base64(ciphertext)` strings inside otherwise ordinary
//! records, so the storage provider never needs to know which fields are
//! sensitive. Whether a value is already ciphertext is inferred from that
//! string shape (`state`), which makes every higher-level operation
//! idempotent — re-encrypting an encrypted record is a no-op.
//!
//! Key derivation never fails on a wrong passphrase. The only proof that
//! a key is correct is opening real ciphertext with it; callers must
//! perform a live decryption test, never trust derivation alone.

mod cipher;
mod document;
mod error;
pub mod fields;
mod key;
pub mod recovery;
pub mod state;

pub use cipher::{decrypt_value, encrypt_value, IV_SIZE};
pub use document::{decrypt_document, decrypt_document_strict, encrypt_document};
pub use error::{CryptoError, CryptoResult};
pub use fields::{
    repayments_path, user_collection_paths, user_root_path, EntityKind, Record,
};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, PBKDF2_ITERATIONS,
    SALT_SIZE,
};
pub use recovery::{
    generate_vault, hash_recovery_code, normalize_recovery_code, verify_recovery_code,
    RecoveryVault, RECOVERY_CODE_COUNT,
};
pub use state::{has_fully_encrypted_fields, is_encrypted_str, is_encrypted_value};
