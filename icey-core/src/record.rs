//! Content record identity, naming and input validation.

use crate::error::{IceyError, Result};
use std::fmt;
use std::sync::Mutex;
use ulid::{Generator, Ulid};

/// Length of a subject (hex-encoded SHA-256).
pub const SUBJECT_LEN: usize = 64;
/// Length of a verification code.
pub const CODE_LEN: usize = 6;

/// The four files making up one content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Raw submitted content (`.sj`).
    Content,
    /// Vote-value bitmap (`.bm`).
    Bitmap,
    /// Vote-validity bitmap (`.bmi`).
    Validity,
    /// Salted ownership credential (`.dt`).
    Credential,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [
        Artifact::Content,
        Artifact::Bitmap,
        Artifact::Validity,
        Artifact::Credential,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Artifact::Content => "sj",
            Artifact::Bitmap => "bm",
            Artifact::Validity => "bmi",
            Artifact::Credential => "dt",
        }
    }
}

/// `<unix millis>-<unique id>`; names every artifact of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    timestamp_ms: u64,
    unique: String,
}

impl RecordId {
    pub fn new(timestamp_ms: u64, unique: impl Into<String>) -> Result<Self> {
        let unique = unique.into();
        validate_unique_id(&unique)?;
        Ok(Self {
            timestamp_ms,
            unique,
        })
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (timestamp, unique) = value.split_once('-').ok_or_else(|| {
            IceyError::InvalidRequest(format!("record id must be <timestamp>-<id>: {}", value))
        })?;

        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IceyError::InvalidRequest(format!(
                "record id timestamp is not numeric: {}",
                value
            )));
        }

        let timestamp_ms = timestamp.parse::<u64>().map_err(|_| {
            IceyError::InvalidRequest(format!("record id timestamp out of range: {}", value))
        })?;

        Self::new(timestamp_ms, unique)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Globally unique part, also the suffix of the owner token.
    pub fn unique(&self) -> &str {
        &self.unique
    }

    pub fn file_name(&self, artifact: Artifact) -> String {
        format!("{}.{}", self, artifact.extension())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_ms, self.unique)
    }
}

pub fn validate_unique_id(unique: &str) -> Result<()> {
    if unique.is_empty() || !unique.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(IceyError::InvalidRequest(format!(
            "unique id must be non-empty and alphanumeric: {}",
            unique
        )));
    }
    Ok(())
}

/// Source of record ids.
///
/// Ids must be distinguishable within a process and unique across processes.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> RecordId;
}

/// Monotonic ULID-backed generator.
pub struct UlidGenerator {
    inner: Mutex<Generator>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn next_id(&self) -> RecordId {
        let ulid = {
            let mut generator = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Overflow within one millisecond falls back to a fresh random ULID.
            generator.generate().unwrap_or_else(|_| Ulid::new())
        };

        RecordId {
            timestamp_ms: ulid.timestamp_ms(),
            unique: ulid.to_string(),
        }
    }
}

pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.len() != SUBJECT_LEN || !subject.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IceyError::InvalidRequest(format!(
            "subject must be {} hexadecimal characters",
            SUBJECT_LEN
        )));
    }
    Ok(())
}

pub fn validate_code(code: &str) -> Result<()> {
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IceyError::InvalidRequest(format!(
            "code must be {} digits",
            CODE_LEN
        )));
    }
    Ok(())
}
