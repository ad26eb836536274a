use std::fmt;
use std::io;

use thiserror::Error;

use crate::registry::RegistryState;

pub type WalletResult<T> = Result<T, WalletError>;

/// Error kinds surfaced to embedders. Payload-free so callers can branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    WeakPassword,
    UsernameInvalid,
    UsernameExists,
    NoSuchUser,
    BadCredentials,
    RateLimited,
    BadVerifier,
    CryptoError,
    AuthFailed,
    NotAuthorized,
    SeedAlreadyExists,
    SecretNotFound,
    MasterKeyUnavailable,
    DatabaseCorrupt,
    StorageError,
    InvalidState,
    EntropyUnavailable,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::UsernameInvalid => "USERNAME_INVALID",
            Self::UsernameExists => "USERNAME_EXISTS",
            Self::NoSuchUser => "NO_SUCH_USER",
            Self::BadCredentials => "BAD_CREDENTIALS",
            Self::RateLimited => "RATE_LIMITED",
            Self::BadVerifier => "BAD_VERIFIER",
            Self::CryptoError => "CRYPTO_ERROR",
            Self::AuthFailed => "AUTH_FAILED",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::SeedAlreadyExists => "SEED_ALREADY_EXISTS",
            Self::SecretNotFound => "SECRET_NOT_FOUND",
            Self::MasterKeyUnavailable => "MASTER_KEY_UNAVAILABLE",
            Self::DatabaseCorrupt => "DATABASE_CORRUPT",
            Self::StorageError => "STORAGE_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::EntropyUnavailable => "ENTROPY_UNAVAILABLE",
            Self::Config => "CONFIG",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("username invalid: {0}")]
    UsernameInvalid(&'static str),

    #[error("username already registered: {0}")]
    UsernameExists(String),

    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("invalid credentials")]
    BadCredentials,

    #[error("too many failed attempts; retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("password verifier malformed: {0}")]
    BadVerifier(String),

    #[error("crypto primitive failed: {0}")]
    Crypto(String),

    #[error("AEAD authentication failed (tag mismatch)")]
    AuthFailed,

    #[error("sealed secret not accessible to this user or host: {0}")]
    NotAuthorized(String),

    #[error("wallet seed already exists for handle {0}")]
    SeedAlreadyExists(String),

    #[error("sealed secret not found: {0}")]
    SecretNotFound(String),

    #[error("master key unavailable: {0}")]
    MasterKeyUnavailable(String),

    #[error("database corrupt: {0}")]
    DatabaseCorrupt(String),

    #[error("storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("registry is {actual}; operation requires {required}")]
    InvalidState {
        required: RegistryState,
        actual: RegistryState,
    },

    #[error("machine entropy unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} failed for '{subject}': {source}")]
    Context {
        operation: &'static str,
        subject: String,
        #[source]
        source: Box<WalletError>,
    },
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WeakPassword { .. } => ErrorKind::WeakPassword,
            Self::UsernameInvalid(_) => ErrorKind::UsernameInvalid,
            Self::UsernameExists(_) => ErrorKind::UsernameExists,
            Self::NoSuchUser(_) => ErrorKind::NoSuchUser,
            Self::BadCredentials => ErrorKind::BadCredentials,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::BadVerifier(_) => ErrorKind::BadVerifier,
            Self::Crypto(_) => ErrorKind::CryptoError,
            Self::AuthFailed => ErrorKind::AuthFailed,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::SeedAlreadyExists(_) => ErrorKind::SeedAlreadyExists,
            Self::SecretNotFound(_) => ErrorKind::SecretNotFound,
            Self::MasterKeyUnavailable(_) => ErrorKind::MasterKeyUnavailable,
            Self::DatabaseCorrupt(_) => ErrorKind::DatabaseCorrupt,
            Self::Storage { .. } => ErrorKind::StorageError,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::EntropyUnavailable(_) => ErrorKind::EntropyUnavailable,
            Self::Config(_) => ErrorKind::Config,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Milliseconds until a rate-limited caller may retry.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            Self::Context { source, .. } => source.retry_after_ms(),
            _ => None,
        }
    }

    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Attaches the operation and subject to infrastructure failures.
    /// Caller-facing outcomes (bad credentials, rate limiting, ...) pass through untouched.
    pub fn during(self, operation: &'static str, subject: impl Into<String>) -> Self {
        match self.kind() {
            ErrorKind::CryptoError
            | ErrorKind::AuthFailed
            | ErrorKind::NotAuthorized
            | ErrorKind::SecretNotFound
            | ErrorKind::MasterKeyUnavailable
            | ErrorKind::DatabaseCorrupt
            | ErrorKind::StorageError
            | ErrorKind::EntropyUnavailable => Self::Context {
                operation,
                subject: subject.into(),
                source: Box::new(self),
            },
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = WalletError::DatabaseCorrupt("bad magic".into()).during("unlock", "users.db");
        assert_eq!(err.kind(), ErrorKind::DatabaseCorrupt);
        assert!(err.to_string().contains("unlock failed for 'users.db'"));
    }

    #[test]
    fn caller_errors_are_not_wrapped() {
        let err = WalletError::RateLimited {
            retry_after_ms: 1500,
        }
        .during("login", "alice");
        assert!(matches!(err, WalletError::RateLimited { .. }));
        assert_eq!(err.retry_after_ms(), Some(1500));
    }
}
