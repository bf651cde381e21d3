//! Key derivation from user passphrases.
//!
//! PBKDF2-HMAC-SHA256 with 100,000 iterations produces a 256-bit AES-GCM
//! key. Derivation is deterministic — the same passphrase and salt always
//! yield the same key, and a wrong passphrase derives without error. Only
//! a live decryption against known ciphertext proves a key correct.

use crate::error::{CryptoError, CryptoResult};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

/// Key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Passphrase length policy (not a crypto constraint).
const MIN_PASSPHRASE_LEN: usize = 8;
const MAX_PASSPHRASE_LEN: usize = 128;

/// A random salt for key derivation.
///
/// One salt exists per derivation context (main passphrase, recovery
/// codes). Immutable once created; rotation replaces it wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt. Never derived from user input.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    /// Encodes the salt for storage in record metadata.
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(self.0)
    }

    /// Decodes a salt from its stored base64 form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid salt encoding: {e}")))?;
        if bytes.len() != SALT_SIZE {
            return Err(CryptoError::KeyDerivation(format!(
                "invalid salt length: expected {SALT_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; SALT_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// A derived 256-bit symmetric key.
///
/// Never persisted — held only in volatile memory for the session's
/// lifetime and zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.write_str("DerivedKey(..)")
    }
}

/// PBKDF2 parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Fast parameters for tests — derivation dominates test runtime otherwise.
    pub fn fast_insecure() -> Self {
        Self { iterations: 16 }
    }
}

/// Derives an AES-256-GCM key from a passphrase and salt.
///
/// Deterministic: no randomness is injected here. Fails with
/// `InvalidPassphrase` when the passphrase is outside the 8..=128
/// character policy.
pub fn derive_key(passphrase: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::InvalidPassphrase(format!(
            "must be at least {MIN_PASSPHRASE_LEN} characters"
        )));
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(CryptoError::InvalidPassphrase(format!(
            "must be at most {MAX_PASSPHRASE_LEN} characters"
        )));
    }

    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        salt.as_bytes(),
        params.iterations,
        &mut out,
    );
    Ok(DerivedKey(out))
}

/// Generates a random key directly (tests and self-checks).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    DerivedKey(bytes)
}
