//! Field-level encryption of whole records.
//!
//! Applies a kind's field map to seal or open the sensitive subset of a
//! record, leaving everything else untouched. Sealing is idempotent:
//! already-encrypted fields are detected and skipped, so running the
//! encryptor twice is a no-op.

use crate::cipher::{decrypt_value, encrypt_value};
use crate::error::{CryptoError, CryptoResult};
use crate::fields::{EntityKind, Record};
use crate::key::DerivedKey;
use crate::state::{is_encrypted_str, is_encrypted_value};
use serde_json::{Number, Value};
use tracing::warn;

/// Encrypts the mapped fields of a record.
///
/// - already-sealed fields are skipped
/// - numbers are coerced to their string representation before sealing
/// - nested objects are serialized to JSON and sealed as one unit
/// - `splits` lists keep their structure; only each entry's `amount` is
///   sealed, so entries stay independently decryptable
/// - fields absent from the input stay absent
///
/// Fail-closed: any seal failure is returned as an error rather than
/// producing a partially-plaintext record.
pub fn encrypt_document(
    record: &Record,
    kind: EntityKind,
    key: &DerivedKey,
) -> CryptoResult<Record> {
    let fields = kind.encrypted_fields();
    if fields.is_empty() {
        return Ok(record.clone());
    }

    let mut sealed = record.clone();
    for &field in fields {
        let Some(value) = record.get(field) else {
            continue;
        };
        match value {
            Value::Null => {}
            Value::String(s) if is_encrypted_str(s) => {}
            Value::String(s) => {
                sealed.insert(field.into(), Value::String(encrypt_value(s, key)?));
            }
            Value::Number(n) => {
                sealed.insert(
                    field.into(),
                    Value::String(encrypt_value(&n.to_string(), key)?),
                );
            }
            Value::Array(entries) if field == "splits" => {
                let mut out = Vec::with_capacity(entries.len());
                for entry in entries {
                    out.push(encrypt_split_entry(entry, key)?);
                }
                sealed.insert(field.into(), Value::Array(out));
            }
            Value::Object(_) | Value::Array(_) => {
                let json = serde_json::to_string(value)
                    .map_err(|e| CryptoError::Encryption(format!("serialize {field}: {e}")))?;
                sealed.insert(field.into(), Value::String(encrypt_value(&json, key)?));
            }
            Value::Bool(b) => {
                sealed.insert(
                    field.into(),
                    Value::String(encrypt_value(&b.to_string(), key)?),
                );
            }
        }
    }
    Ok(sealed)
}

fn encrypt_split_entry(entry: &Value, key: &DerivedKey) -> CryptoResult<Value> {
    let Some(obj) = entry.as_object() else {
        return Ok(entry.clone());
    };
    let amount = match obj.get("amount") {
        None | Some(Value::Null) => return Ok(entry.clone()),
        Some(v) if is_encrypted_value(v) => return Ok(entry.clone()),
        Some(Value::Number(n)) => encrypt_value(&n.to_string(), key)?,
        Some(Value::String(s)) => encrypt_value(s, key)?,
        Some(other) => {
            return Err(CryptoError::Encryption(format!(
                "split amount has unexpected shape: {other}"
            )))
        }
    };
    let mut out = obj.clone();
    out.insert("amount".into(), Value::String(amount));
    Ok(Value::Object(out))
}

/// Decrypts the mapped fields of a record, tolerantly.
///
/// Fields that don't look encrypted pass through unchanged, which keeps
/// mixed records readable mid-migration. A field that fails to open is
/// left in its ciphertext form so an operator can tell "not encrypted"
/// from "wrong key" and retry later with the correct key.
pub fn decrypt_document(record: &Record, kind: EntityKind, key: &DerivedKey) -> Record {
    // The tolerant pass never surfaces per-field errors
    decrypt_inner(record, kind, key, false).unwrap_or_else(|_| record.clone())
}

/// Decrypts the mapped fields of a record, strictly.
///
/// Any mapped field that fails to open is an error. Rotation uses this
/// form: a record only counts as readable under a key when every sealed
/// field opens.
pub fn decrypt_document_strict(
    record: &Record,
    kind: EntityKind,
    key: &DerivedKey,
) -> CryptoResult<Record> {
    decrypt_inner(record, kind, key, true)
}

fn decrypt_inner(
    record: &Record,
    kind: EntityKind,
    key: &DerivedKey,
    strict: bool,
) -> CryptoResult<Record> {
    let fields = kind.encrypted_fields();
    if fields.is_empty() {
        return Ok(record.clone());
    }

    let mut opened = record.clone();
    for &field in fields {
        let Some(value) = record.get(field) else {
            continue;
        };

        if field == "splits" {
            if let Some(restored) = decrypt_splits(value, key, strict)? {
                opened.insert(field.into(), restored);
            }
            continue;
        }

        let Value::String(s) = value else { continue };
        if !is_encrypted_str(s) {
            continue;
        }

        match decrypt_value(s, key) {
            Ok(plaintext) => {
                opened.insert(field.into(), restore_scalar(field, plaintext));
            }
            Err(e) if strict => return Err(e),
            Err(e) => {
                // Leave the ciphertext in place for a later retry with
                // the correct key
                warn!(field, %e, "failed to decrypt field, leaving ciphertext");
            }
        }
    }
    Ok(opened)
}

/// Opens a `splits` field: either a sealed JSON string (whole-list form)
/// or a list whose entries carry individually sealed amounts.
fn decrypt_splits(value: &Value, key: &DerivedKey, strict: bool) -> CryptoResult<Option<Value>> {
    match value {
        Value::String(s) if is_encrypted_str(s) => match decrypt_value(s, key) {
            Ok(json) => Ok(Some(
                serde_json::from_str(&json).unwrap_or(Value::String(json)),
            )),
            Err(e) if strict => Err(e),
            Err(e) => {
                warn!(%e, "failed to decrypt splits, leaving ciphertext");
                Ok(None)
            }
        },
        Value::Array(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.get("amount") {
                    Some(Value::String(s)) if is_encrypted_str(s) => match decrypt_value(s, key) {
                        Ok(plaintext) => {
                            let mut obj = entry
                                .as_object()
                                .cloned()
                                .unwrap_or_default();
                            obj.insert("amount".into(), parse_number(&plaintext));
                            out.push(Value::Object(obj));
                        }
                        Err(e) if strict => return Err(e),
                        Err(e) => {
                            warn!(%e, "failed to decrypt split amount, leaving ciphertext");
                            out.push(entry.clone());
                        }
                    },
                    _ => out.push(entry.clone()),
                }
            }
            Ok(Some(Value::Array(out)))
        }
        _ => Ok(None),
    }
}

/// Restores a decrypted scalar: numeric fields parse back to numbers,
/// everything else stays a string.
fn restore_scalar(field: &str, plaintext: String) -> Value {
    if EntityKind::is_numeric_field(field) {
        let parsed = parse_number(&plaintext);
        if !matches!(parsed, Value::String(_)) {
            return parsed;
        }
    }
    Value::String(plaintext)
}

fn parse_number(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(s.to_string())
}
