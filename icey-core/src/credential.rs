//! Ownership tokens and their salted one-way credentials.

use crate::error::{IceyError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 36;
const SALT_BYTES: usize = 16;
const SCHEME: &str = "sha256";

/// Separator between the raw token and the record's unique id.
pub const TOKEN_SEPARATOR: char = '-';

/// Random ownership token. Never contains [`TOKEN_SEPARATOR`].
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes).replace(TOKEN_SEPARATOR, "2")
}

/// Token handed back to the submitter: `<raw token>-<unique id>`.
pub fn compose_owner_token(raw_token: &str, unique_id: &str) -> String {
    format!("{}{}{}", raw_token, TOKEN_SEPARATOR, unique_id)
}

/// Split a composite owner token at its last separator.
pub fn split_owner_token(composite: &str) -> Result<(&str, &str)> {
    match composite.rsplit_once(TOKEN_SEPARATOR) {
        Some((raw, unique)) if !raw.is_empty() && !unique.is_empty() => Ok((raw, unique)),
        _ => Err(IceyError::InvalidRequest(
            "owner token must be <token>-<id>".to_string(),
        )),
    }
}

/// Build the stored credential for `subject` + `raw_token`.
///
/// Format: `sha256$<salt hex>$<digest hex>`.
pub fn hash_credential(subject: &str, raw_token: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = salted_digest(&salt, subject, raw_token);
    format!("{}${}${}", SCHEME, hex::encode(salt), hex::encode(digest))
}

/// Check `raw_token` against a stored credential in constant time.
pub fn verify_credential(stored: &str, subject: &str, raw_token: &str) -> bool {
    let mut parts = stored.trim().splitn(3, '$');
    let (Some(scheme), Some(salt_hex), Some(digest_hex)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    if scheme != SCHEME {
        return false;
    }

    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };

    let actual = salted_digest(&salt, subject, raw_token);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn salted_digest(salt: &[u8], subject: &str, raw_token: &str) -> [u8; 32] {
    let mut inner = Sha256::new();
    inner.update(subject.as_bytes());
    inner.update(raw_token.as_bytes());
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(salt);
    outer.update(inner);
    outer.finalize().into()
}
