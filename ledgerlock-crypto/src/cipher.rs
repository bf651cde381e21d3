//! AES-256-GCM value cipher.
//!
//! Encrypted values travel as `base64(IV) ":" base64(ciphertext)` strings
//! so they can sit in ordinary string fields of stored records. A fresh
//! 12-byte IV is generated per call; the same plaintext never encrypts to
//! the same output twice.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// AES-GCM IV size in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// Encrypts a single string value under the given key.
///
/// Returns the `ivB64:ciphertextB64` wire form.
pub fn encrypt_value(plaintext: &str, key: &DerivedKey) -> CryptoResult<String> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("failed to create cipher: {e}")))?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("seal failed: {e}")))?;

    Ok(format!("{}:{}", BASE64.encode(iv), BASE64.encode(&ciphertext)))
}

/// Decrypts an `ivB64:ciphertextB64` value.
///
/// Fails with `InvalidValueFormat` when the input is not two valid base64
/// segments, and with `DecryptionFailed` on an authentication-tag
/// mismatch (wrong key, corruption, or tampering).
pub fn decrypt_value(encoded: &str, key: &DerivedKey) -> CryptoResult<String> {
    let mut parts = encoded.splitn(3, ':');
    let (iv_b64, ct_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(ct), None) if !iv.is_empty() && !ct.is_empty() => (iv, ct),
        _ => {
            return Err(CryptoError::InvalidValueFormat(
                "expected exactly two colon-separated segments".into(),
            ))
        }
    };

    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| CryptoError::InvalidValueFormat(format!("bad IV encoding: {e}")))?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidValueFormat(format!(
            "invalid IV length: expected {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    let ciphertext = BASE64
        .decode(ct_b64)
        .map_err(|e| CryptoError::InvalidValueFormat(format!("bad ciphertext encoding: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("failed to create cipher: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}
