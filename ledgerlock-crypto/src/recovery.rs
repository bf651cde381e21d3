//! Recovery codes and passphrase escrow.
//!
//! Ten human-transcribable codes are generated together; each one can
//! recover the main passphrase on its own. The vault stores, per code,
//! a SHA-256 hash (for lookup — the raw code is never persisted) and the
//! main passphrase sealed under a key derived from that code with one
//! shared recovery salt. Regeneration replaces the whole vault at once,
//! so all prior codes die together.

use crate::cipher::{decrypt_value, encrypt_value};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of codes in a vault.
pub const RECOVERY_CODE_COUNT: usize = 10;

/// Symbols per code (three dash-joined groups of four).
pub const RECOVERY_CODE_SYMBOLS: usize = 12;

/// 32-symbol alphabet with the transcription-hostile 0/O/I/1 removed.
const RECOVERY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// The escrow vault persisted in the user's encryption metadata.
#[derive(Clone, Debug)]
pub struct RecoveryVault {
    /// Shared salt for deriving per-code keys.
    pub salt: Salt,
    /// SHA-256 hash of each code, base64.
    pub code_hashes: Vec<String>,
    /// Main passphrase sealed under each code's derived key, in the
    /// `ivB64:ciphertextB64` wire form.
    pub sealed_passphrases: Vec<String>,
}

/// Generates one `XXXX-XXXX-XXXX` recovery code.
pub fn generate_recovery_code() -> String {
    let mut rng = OsRng;
    let mut groups = Vec::with_capacity(3);
    for _ in 0..3 {
        let group: String = (0..4)
            .map(|_| RECOVERY_ALPHABET[rng.gen_range(0..RECOVERY_ALPHABET.len())] as char)
            .collect();
        groups.push(group);
    }
    groups.join("-")
}

/// Normalizes user input into canonical `XXXX-XXXX-XXXX` form.
///
/// Strips whitespace and dashes, uppercases, and rejects anything that is
/// not exactly 12 symbols from the recovery alphabet.
pub fn normalize_recovery_code(input: &str) -> CryptoResult<String> {
    let stripped: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if stripped.len() != RECOVERY_CODE_SYMBOLS {
        return Err(CryptoError::InvalidRecoveryCodeFormat(format!(
            "expected {RECOVERY_CODE_SYMBOLS} symbols, got {}",
            stripped.len()
        )));
    }
    if !stripped
        .bytes()
        .all(|b| RECOVERY_ALPHABET.contains(&b))
    {
        return Err(CryptoError::InvalidRecoveryCodeFormat(
            "contains symbols outside the recovery alphabet".into(),
        ));
    }

    Ok(format!(
        "{}-{}-{}",
        &stripped[0..4],
        &stripped[4..8],
        &stripped[8..12]
    ))
}

/// SHA-256 hash of a canonical code, base64-encoded.
///
/// Unsalted hashing is acceptable here: codes are random (not
/// user-chosen), the search space is 32^12, and unlock attempts are
/// rate-limited.
pub fn hash_recovery_code(code: &str) -> String {
    BASE64.encode(Sha256::digest(code.as_bytes()))
}

/// Compares a candidate code against a stored hash.
pub fn verify_recovery_code(code: &str, stored_hash: &str) -> bool {
    hash_recovery_code(code) == stored_hash
}

/// Generates a full vault: ten fresh codes, one shared salt, and the main
/// passphrase sealed under each code.
///
/// Returns `(codes, vault)` — the codes are shown to the user once and
/// never persisted.
pub fn generate_vault(
    main_passphrase: &str,
    params: &KdfParams,
) -> CryptoResult<(Vec<String>, RecoveryVault)> {
    let salt = Salt::random();
    let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
    let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
    let mut sealed_passphrases = Vec::with_capacity(RECOVERY_CODE_COUNT);

    for _ in 0..RECOVERY_CODE_COUNT {
        let code = generate_recovery_code();
        let code_key = derive_code_key(&code, &salt, params)?;
        sealed_passphrases.push(encrypt_value(main_passphrase, &code_key)?);
        code_hashes.push(hash_recovery_code(&code));
        codes.push(code);
    }

    Ok((
        codes,
        RecoveryVault {
            salt,
            code_hashes,
            sealed_passphrases,
        },
    ))
}

impl RecoveryVault {
    /// Opens the escrowed main passphrase with one recovery code.
    ///
    /// The input is normalized first; an unknown hash is
    /// `RecoveryCodeNotFound`.
    pub fn open_with_code(&self, input: &str, params: &KdfParams) -> CryptoResult<String> {
        let code = normalize_recovery_code(input)?;
        let hash = hash_recovery_code(&code);

        let index = self
            .code_hashes
            .iter()
            .position(|stored| *stored == hash)
            .ok_or(CryptoError::RecoveryCodeNotFound)?;

        let code_key = derive_code_key(&code, &self.salt, params)?;
        decrypt_value(&self.sealed_passphrases[index], &code_key)
    }
}

/// Derives the per-code escrow key. Same KDF as the main passphrase;
/// codes bypass the passphrase length policy since they are fixed-format.
fn derive_code_key(
    code: &str,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<crate::key::DerivedKey> {
    // Canonical codes are 14 chars (12 symbols + 2 dashes), inside policy
    derive_key(code, salt, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KdfParams {
        KdfParams::fast_insecure()
    }

    #[test]
    fn generated_codes_have_canonical_format() {
        for _ in 0..20 {
            let code = generate_recovery_code();
            assert_eq!(code.len(), 14);
            assert_eq!(normalize_recovery_code(&code).unwrap(), code);
        }
    }

    #[test]
    fn normalization_accepts_sloppy_input() {
        assert_eq!(
            normalize_recovery_code("abcd efgh jklm").unwrap(),
            "ABCD-EFGH-JKLM"
        );
        assert_eq!(
            normalize_recovery_code("ABCDEFGHJKLM").unwrap(),
            "ABCD-EFGH-JKLM"
        );
        assert_eq!(
            normalize_recovery_code(" abcd-EFGH-jklm ").unwrap(),
            "ABCD-EFGH-JKLM"
        );
    }

    #[test]
    fn normalization_rejects_bad_input() {
        // Too short, too long, ambiguous symbols (O, 1)
        for bad in ["ABCD-EFGH", "ABCD-EFGH-JKLM-NPQR", "ABCO-EFGH-JKLM", "ABC1-EFGH-JKLM", ""] {
            assert!(
                matches!(
                    normalize_recovery_code(bad),
                    Err(CryptoError::InvalidRecoveryCodeFormat(_))
                ),
                "accepted: {bad:?}"
            );
        }
    }

    #[test]
    fn hash_verify_roundtrip() {
        let code = generate_recovery_code();
        let hash = hash_recovery_code(&code);
        assert!(verify_recovery_code(&code, &hash));
        assert!(!verify_recovery_code(&generate_recovery_code(), &hash));
    }

    #[test]
    fn every_code_opens_the_vault() {
        let (codes, vault) = generate_vault("correct-horse-battery", &params()).unwrap();
        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);
        for code in &codes {
            assert_eq!(
                vault.open_with_code(code, &params()).unwrap(),
                "correct-horse-battery"
            );
        }
    }

    #[test]
    fn vault_accepts_sloppy_code_input() {
        let (codes, vault) = generate_vault("correct-horse-battery", &params()).unwrap();
        let sloppy = codes[0].replace('-', " ").to_lowercase();
        assert_eq!(
            vault.open_with_code(&sloppy, &params()).unwrap(),
            "correct-horse-battery"
        );
    }

    #[test]
    fn unknown_code_is_not_found() {
        let (_codes, vault) = generate_vault("correct-horse-battery", &params()).unwrap();
        let result = vault.open_with_code("AAAA-BBBB-CCCC", &params());
        assert!(matches!(result, Err(CryptoError::RecoveryCodeNotFound)));
    }

    #[test]
    fn regeneration_invalidates_prior_codes() {
        let (old_codes, _old_vault) = generate_vault("correct-horse-battery", &params()).unwrap();
        let (new_codes, new_vault) = generate_vault("correct-horse-battery", &params()).unwrap();

        for code in &old_codes {
            assert!(matches!(
                new_vault.open_with_code(code, &params()),
                Err(CryptoError::RecoveryCodeNotFound)
            ));
        }
        for code in &new_codes {
            assert!(new_vault.open_with_code(code, &params()).is_ok());
        }
    }
}
