//! Unified Error Handling System
//!
//! This module provides a comprehensive, type-safe error handling system
//! using thiserror for all NLDS components. Every failure mode named in the
//! workflow engine's data-path (indexer, transfer, archive) maps onto a
//! `failure_reason()` string so it can be recorded directly against a
//! transaction's `FailedFile` rows without a second translation layer.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all NLDS operations.
#[derive(Error, Debug)]
pub enum NldsError {
    // Indexer / transfer file errors
    #[error("path not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("permission denied for {path:?} (uid={uid}, gid={gid})")]
    PermissionDenied { path: PathBuf, uid: u32, gid: u32 },

    #[error("no passwd/group entry for requesting user {user:?}")]
    UnknownRequester { user: String },

    #[error("read error: {source} (path: {path:?})")]
    ReadError {
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("write error: {source} (path: {path:?})")]
    WriteError {
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // Object store errors
    #[error("bucket already exists: {bucket}")]
    BucketExists { bucket: String },

    #[error("object missing: {object}")]
    ObjectMissing { object: String },

    #[error("size mismatch for {object}: catalogued {catalogued}, actual {actual}")]
    SizeMismatch {
        object: String,
        catalogued: u64,
        actual: u64,
    },

    // Authorization / quota errors
    #[error("quota exceeded for group {group}: requested {requested}, available {available}")]
    QuotaExceeded {
        group: String,
        requested: u64,
        available: u64,
    },

    #[error("no requirements found for service {service}")]
    NoRequirements { service: String },

    #[error("no tape resource found for service {service}")]
    NoTapeResource { service: String },

    #[error("authorization denied for operation: {operation}")]
    Authorization { operation: String },

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("invalid JWT token: {reason}")]
    InvalidToken { reason: String },

    // Infrastructure / bus errors
    #[error("bus transport error: {0}")]
    BusTransport(String),

    #[error("message unroutable: routing key {routing_key}")]
    BusUnroutable { routing_key: String },

    #[error("retries exhausted after {attempts} attempts for {what}")]
    RetriesExhausted { attempts: u32, what: String },

    // Protocol / envelope errors
    #[error("invalid routing key {key:?}: {reason}")]
    InvalidRoutingKey { key: String, reason: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("message envelope decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    // Catalog / data model errors
    #[error("holding not found: {0}")]
    HoldingNotFound(String),

    #[error("file not found in holding {holding}: {path}")]
    FileNotFound { holding: i64, path: String },

    #[error("duplicate file path within holding: {path}")]
    DuplicateFilePath { path: String },

    #[error("aggregation input is empty")]
    EmptyAggregationInput,

    // Database / config
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {field} - {message}")]
    Configuration { field: String, message: String },

    #[error("missing required configuration: {field}")]
    MissingConfiguration { field: String },

    #[error("invalid configuration value: {field} = {value}")]
    InvalidConfiguration { field: String, value: String },

    // Identity provider
    #[error("identity provider request failed: {0}")]
    IdentityProvider(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for NLDS operations.
pub type NldsResult<T> = Result<T, NldsError>;

/// Error context trait for adding additional context to errors.
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> NldsResult<T>
    where
        F: FnOnce() -> String;

    fn context(self, msg: &str) -> NldsResult<T>;
}

impl<T> ErrorContext<T> for NldsResult<T> {
    fn with_context<F>(self, f: F) -> NldsResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| NldsError::Internal(format!("{}: {}", f(), e)))
    }

    fn context(self, msg: &str) -> NldsResult<T> {
        self.map_err(|e| NldsError::Internal(format!("{}: {}", msg, e)))
    }
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> NldsResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| NldsError::Internal(format!("{}: {}", f(), e)))
    }

    fn context(self, msg: &str) -> NldsResult<T> {
        self.map_err(|e| NldsError::Internal(format!("{}: {}", msg, e)))
    }
}

/// Convenience macros for error creation, in the teacher's `bail!`/`ensure!`
/// style.
#[macro_export]
macro_rules! nlds_error {
    ($variant:ident { $($field:ident: $value:expr),* }) => {
        $crate::error::NldsError::$variant { $($field: $value),* }
    };
    ($variant:ident($value:expr)) => {
        $crate::error::NldsError::$variant($value)
    };
}

#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return Err(nlds_error!($($args)*))
    };
}

#[macro_export]
macro_rules! ensure {
    ($condition:expr, $($args:tt)*) => {
        if !$condition {
            bail!($($args)*);
        }
    };
}

/// Error category for grouping related errors in logs/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    FileSystem,
    ObjectStore,
    Authorization,
    Infrastructure,
    Protocol,
    Catalog,
    Configuration,
    IdentityProvider,
    Internal,
}

impl NldsError {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        use NldsError::*;
        match self {
            NotFound { .. }
            | PermissionDenied { .. }
            | UnknownRequester { .. }
            | ReadError { .. }
            | WriteError { .. }
            | ChecksumMismatch { .. } => ErrorCategory::FileSystem,

            BucketExists { .. } | ObjectMissing { .. } | SizeMismatch { .. } => {
                ErrorCategory::ObjectStore
            }

            QuotaExceeded { .. }
            | NoRequirements { .. }
            | NoTapeResource { .. }
            | Authorization { .. }
            | Authentication { .. }
            | InvalidToken { .. } => ErrorCategory::Authorization,

            BusTransport(_) | BusUnroutable { .. } | RetriesExhausted { .. } => {
                ErrorCategory::Infrastructure
            }

            InvalidRoutingKey { .. }
            | InvalidStateTransition { .. }
            | DecompressionFailed(_)
            | JsonSerialization(_) => ErrorCategory::Protocol,

            HoldingNotFound(_)
            | FileNotFound { .. }
            | DuplicateFilePath { .. }
            | EmptyAggregationInput => ErrorCategory::Catalog,

            Database(_)
            | Configuration { .. }
            | MissingConfiguration { .. }
            | InvalidConfiguration { .. } => ErrorCategory::Configuration,

            IdentityProvider(_) => ErrorCategory::IdentityProvider,

            Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the bus retry loop should keep retrying this error
    /// indefinitely (transport failures), as opposed to surfacing it as a
    /// terminal per-file failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NldsError::BusTransport(_))
    }

    /// The `failure_reason` string recorded against a file's retry
    /// trajectory and ultimately its `FailedFile.reason`.
    pub fn failure_reason(&self) -> &'static str {
        use NldsError::*;
        match self {
            NotFound { .. } => "not_found",
            PermissionDenied { .. } => "permission_denied",
            UnknownRequester { .. } => "permission_denied",
            ReadError { .. } => "read_error",
            WriteError { .. } => "write_error",
            ChecksumMismatch { .. } => "checksum_mismatch",
            BucketExists { .. } => "bucket_exists",
            ObjectMissing { .. } => "object_missing",
            SizeMismatch { .. } => "size_mismatch",
            QuotaExceeded { .. } => "quota_exceeded",
            NoRequirements { .. } => "no_requirements",
            NoTapeResource { .. } => "no_tape_resource",
            BusTransport(_) => "bus_transport",
            BusUnroutable { .. } => "bus_unroutable",
            RetriesExhausted { .. } => "retries_exhausted",
            _ => "internal",
        }
    }

    /// User-friendly error message for surfacing via the logging consumer.
    pub fn user_message(&self) -> String {
        match self {
            NldsError::PermissionDenied { path, .. } => {
                format!("Permission denied for '{}'", path.display())
            }
            NldsError::UnknownRequester { user } => {
                format!("No passwd entry found for user '{}'", user)
            }
            NldsError::QuotaExceeded {
                group, requested, ..
            } => format!("Group '{}' has insufficient tape quota for {} bytes", group, requested),
            NldsError::Authentication { .. } => {
                "Authentication failed. Please check your credentials.".to_string()
            }
            NldsError::Authorization { operation } => {
                format!("You don't have permission to perform: {}", operation)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let e = NldsError::NotFound {
            path: PathBuf::from("/x"),
        };
        assert_eq!(e.category(), ErrorCategory::FileSystem);
        assert_eq!(e.failure_reason(), "not_found");
    }

    #[test]
    fn test_only_bus_transport_is_retryable() {
        assert!(NldsError::BusTransport("down".into()).is_retryable());
        assert!(!NldsError::NotFound {
            path: PathBuf::from("/x")
        }
        .is_retryable());
    }

    #[test]
    fn test_error_context() {
        let result: Result<(), std::io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read configuration file");
        assert!(with_context.is_err());
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("Failed to read configuration file"));
    }

    #[test]
    fn test_user_messages() {
        let error = NldsError::QuotaExceeded {
            group: "gws_abc".to_string(),
            requested: 2000,
            available: 1000,
        };
        let message = error.user_message();
        assert!(message.contains("gws_abc"));
    }
}
