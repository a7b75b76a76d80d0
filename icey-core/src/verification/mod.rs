//! One-time verification codes.
//!
//! A code is stored under `icey:subject:<subject>:<code>` with an attempt
//! counter. Every successful check consumes one attempt; once the counter
//! reaches the configured maximum the key is deleted and the code is dead.

pub mod code_store;
pub mod factory;
pub mod redis;

pub use code_store::{CodeStore, MemoryCodeStore};
pub use factory::CodeStoreBuilder;
pub use self::redis::RedisCodeStore;

use crate::error::Result;
use crate::record::CODE_LEN;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn code_key(subject: &str, code: &str) -> String {
    format!("icey:subject:{}:{}", subject, code)
}

/// Validates and consumes one-time codes.
#[derive(Clone)]
pub struct VerificationGate {
    store: Arc<dyn CodeStore>,
    max_attempts: i64,
}

impl VerificationGate {
    pub fn new(store: Arc<dyn CodeStore>, max_attempts: i64) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    /// Check `code` for `subject`, consuming one attempt when it is valid.
    ///
    /// Absent, expired and exhausted codes yield `Ok(false)`; errors are
    /// reserved for code store failures.
    pub async fn verify(&self, subject: &str, code: &str) -> Result<bool> {
        let key = code_key(subject, code);

        if !self.store.exists(&key).await? {
            tracing::debug!("Verification code not found for subject {}", subject);
            return Ok(false);
        }

        // Only the atomically incremented value decides, so exactly one caller
        // can observe `max_attempts`.
        let Some(used) = self.store.incr_existing(&key).await? else {
            tracing::debug!("Verification code expired for subject {}", subject);
            return Ok(false);
        };

        if used > self.max_attempts {
            if let Err(error) = self.store.del(&key).await {
                tracing::warn!(
                    "Failed to delete exhausted verification code for subject {}: {}",
                    subject,
                    error
                );
            }
            tracing::debug!("Verification code exhausted for subject {}", subject);
            return Ok(false);
        }

        tracing::debug!(
            "Verification code accepted for subject {} (attempt {}/{})",
            subject,
            used,
            self.max_attempts
        );
        Ok(true)
    }
}

/// A freshly issued code and the subject it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub subject: String,
    pub code: String,
}

/// Issues codes for a subject phrase, as the message-channel front end does.
#[derive(Clone)]
pub struct CodeIssuer {
    store: Arc<dyn CodeStore>,
    ttl: Duration,
}

impl CodeIssuer {
    pub fn new(store: Arc<dyn CodeStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Hash `phrase` into a subject and store a fresh 6-digit code for it.
    pub async fn issue(&self, phrase: &str) -> Result<IssuedCode> {
        let subject = subject_for(phrase);
        let code = random_code();
        self.store.set(&code_key(&subject, &code), 0, self.ttl).await?;

        tracing::info!("Issued verification code for subject {}", subject);
        Ok(IssuedCode { subject, code })
    }
}

/// Hex SHA-256 of a subject phrase.
pub fn subject_for(phrase: &str) -> String {
    hex::encode(Sha256::digest(phrase.trim().as_bytes()))
}

fn random_code() -> String {
    let low = 10u32.pow(CODE_LEN as u32 - 1);
    let high = 10u32.pow(CODE_LEN as u32);
    rand::thread_rng().gen_range(low..high).to_string()
}
