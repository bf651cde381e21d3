//! Encryption-state detection.
//!
//! There is no authoritative ciphertext tag in stored records: whether a
//! value is encrypted is inferred purely from the `ivB64:ciphertextB64`
//! string shape. The heuristic has zero false negatives for values the
//! cipher produced (a 12-byte IV always encodes to 16 base64 chars, and
//! the GCM tag alone guarantees ≥ 20 chars of ciphertext) and very few
//! false positives for realistic plaintext.

use crate::fields::{EntityKind, Record};
use serde_json::Value;

/// Minimum encoded lengths for a plausible sealed value.
const MIN_IV_CHARS: usize = 16;
const MIN_CIPHERTEXT_CHARS: usize = 20;

fn is_base64_segment(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    // Standard alphabet with optional '=' padding only at the end
    let trimmed = s.trim_end_matches('=');
    if s.len() - trimmed.len() > 2 {
        return false;
    }
    trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Whether a string has the shape of a sealed value.
pub fn is_encrypted_str(value: &str) -> bool {
    let mut parts = value.splitn(3, ':');
    let (iv, ct) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(ct), None) => (iv, ct),
        _ => return false,
    };
    iv.len() >= MIN_IV_CHARS
        && ct.len() >= MIN_CIPHERTEXT_CHARS
        && is_base64_segment(iv)
        && is_base64_segment(ct)
}

/// Whether a JSON value is a sealed string. Numbers, objects, and arrays
/// are never classified as encrypted — only strings can be ciphertext.
pub fn is_encrypted_value(value: &Value) -> bool {
    match value {
        Value::String(s) => is_encrypted_str(s),
        _ => false,
    }
}

/// Whether every mapped field of `record` is present and encrypted.
///
/// A record with some fields encrypted and others missing or plaintext is
/// treated as not encrypted. Re-running the encryptor over such a record
/// re-seals fields that are already good, but never leaves one behind.
pub fn has_fully_encrypted_fields(record: &Record, kind: EntityKind) -> bool {
    let fields = kind.encrypted_fields();
    if fields.is_empty() {
        return false;
    }

    fields.iter().all(|&field| {
        let Some(value) = record.get(field) else {
            // A field that doesn't exist can't have been encrypted
            return false;
        };
        match value {
            Value::Null => false,
            Value::Array(entries) if field == "splits" => {
                // Every split amount must be sealed (or absent); an empty
                // list has nothing left to encrypt
                entries.iter().all(|entry| match entry.get("amount") {
                    None | Some(Value::Null) => true,
                    Some(amount) => is_encrypted_value(amount),
                })
            }
            Value::String(s) => is_encrypted_str(s),
            _ => false,
        }
    })
}
