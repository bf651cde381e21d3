//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in key derivation, value sealing, and recovery.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Passphrase violates local policy (length bounds), checked before
    /// any key derivation runs.
    #[error("invalid passphrase: {0}")]
    InvalidPassphrase(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication tag mismatch — wrong key, corrupted ciphertext, or
    /// tampering. The only reliable signal that a key is wrong.
    #[error("decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,

    /// Value is not a well-formed `ivB64:ciphertextB64` pair.
    #[error("invalid encrypted value format: {0}")]
    InvalidValueFormat(String),

    #[error("invalid recovery code format: {0}")]
    InvalidRecoveryCodeFormat(String),

    #[error("recovery code does not match any vault entry")]
    RecoveryCodeNotFound,
}
