//! Error types for `piiseal` operations.

use crate::context::FieldContext;
use std::fmt;

/// Main error type for `piiseal` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material is missing or unusable. Never recovered locally.
    #[error("key configuration error: {0}")]
    Key(#[from] KeyError),

    /// Decryption of a single value failed (bad padding, wrong key, invalid UTF-8)
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Value carries the ciphertext prefix but is not a well-formed token
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Lookup hash and paired ciphertext disagree
    #[error(transparent)]
    Integrity(#[from] IntegrityFailure),

    /// Persistence adapter failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Settings could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving or validating the encryption key.
#[derive(Debug)]
pub enum KeyError {
    /// Neither an explicit secret nor a fallback seed is configured
    Missing,

    /// Key material failed the validation round trip
    InvalidKey {
        /// Length of the rejected key in bytes
        length: usize,
    },

    /// The key source itself could not be read
    Source(String),

    /// I/O operation failed
    Io(std::io::Error),
}

/// Cipher transformation name reported in key validation errors.
pub const ALGORITHM: &str = "AES/CBC/PKCS5Padding";

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(
                f,
                "no encryption key configured and no database URL to derive one from; \
                 set PII_ENCKEY explicitly"
            ),
            Self::InvalidKey { length } => {
                write!(f, "invalid encryption key for algorithm {ALGORITHM} ({length} bytes)")
            }
            Self::Source(msg) => write!(f, "key source unavailable: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Raised when a decrypted value no longer hashes to the lookup hash stored
/// in the primary record.
///
/// The mismatched plaintext is never carried by this error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Event: USER_ATTRIBUTE_DECRYPTION_FAILURE, Tenant: {}, Owner: {}, Field: {}", .context.tenant(), .context.owner(), .context.field())]
pub struct IntegrityFailure {
    context: FieldContext,
}

impl IntegrityFailure {
    /// Creates a failure for the given field.
    #[must_use]
    pub const fn new(context: FieldContext) -> Self {
        Self { context }
    }

    /// Returns the field the failure was detected on.
    #[must_use]
    pub const fn context(&self) -> &FieldContext {
        &self.context
    }

    /// Emits the audit line for this failure.
    pub fn log(&self) {
        tracing::warn!(
            event = "USER_ATTRIBUTE_DECRYPTION_FAILURE",
            tenant = %self.context.tenant(),
            owner = %self.context.owner(),
            field = %self.context.field(),
            "lookup hash does not match decrypted value"
        );
    }
}

/// Errors reported by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Owner record does not exist
    #[error("owner not found: {0}")]
    OwnerNotFound(String),

    /// A lock guarding shared state was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
