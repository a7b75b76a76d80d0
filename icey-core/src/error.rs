//! Error types for Icey.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IceyError>;

/// Caller-facing classification of an [`IceyError`].
///
/// Every variant of `IceyError` belongs to exactly one kind; transports map
/// kinds onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed subject, code, id, token or payload.
    Validation,
    /// The one-time code is absent, expired or exhausted.
    VerificationFailed,
    /// Ownership credential did not match.
    Unauthorized,
    /// No record matches the requested id.
    NotFound,
    /// Resource is locked by another holder.
    LockConflict,
    /// Shared store, code store, disk or network failure.
    Storage,
    /// Unexpected invariant violation.
    Internal,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IceyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("verification code is invalid or expired")]
    VerificationFailed,

    #[error("ownership token rejected")]
    Unauthorized,

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("{path} is locked by {}, try again later", .owner.as_deref().unwrap_or("another holder"))]
    LockConflict {
        path: String,
        owner: Option<String>,
    },

    #[error("lock operation failed on {path}: {reason}")]
    Lock { path: String, reason: String },

    #[error("versioned store error: {0}")]
    Store(String),

    #[error("code store error: {0}")]
    CodeStore(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IceyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IceyError::InvalidRequest(_) => ErrorKind::Validation,
            IceyError::VerificationFailed => ErrorKind::VerificationFailed,
            IceyError::Unauthorized => ErrorKind::Unauthorized,
            IceyError::RecordNotFound(_) => ErrorKind::NotFound,
            IceyError::LockConflict { .. } => ErrorKind::LockConflict,
            IceyError::Lock { .. }
            | IceyError::Store(_)
            | IceyError::CodeStore(_)
            | IceyError::Redis(_)
            | IceyError::Io(_) => ErrorKind::Storage,
            IceyError::Serialization(_) | IceyError::Config(_) | IceyError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Nothing inside the library retries on these; the decision belongs to
    /// the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::LockConflict | ErrorKind::Storage)
    }

    pub(crate) fn lock(path: &str, reason: impl Into<String>) -> Self {
        IceyError::Lock {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
