//! Result and error types for the core library

use std::fmt;

use thiserror::Error;

/// Message shown to end users for any storage fault. The internal cause
/// stays in the error's `source()`.
pub const DATABASE_USER_MESSAGE: &str = "Database error";

/// Category of a storage fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Statement preparation, execution or transaction control failed
    Query,
    /// A returned row could not be decoded
    Scan,
    /// A named parameter had no bound value
    Bind,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Query => "query",
            ErrorCode::Scan => "scan",
            ErrorCode::Bind => "bind",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database {code} error: {source}")]
    Persistence {
        code: ErrorCode,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a statement or transaction-control failure
    pub fn query(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Persistence {
            code: ErrorCode::Query,
            source: err.into(),
        }
    }

    /// Wrap a row decoding failure
    pub fn scan(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Persistence {
            code: ErrorCode::Scan,
            source: err.into(),
        }
    }

    /// A parameter binding failure
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Persistence {
            code: ErrorCode::Bind,
            source: msg.into().into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The storage fault category, if this is a persistence error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Persistence { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Text safe to show to an end user.
    ///
    /// Persistence faults collapse to a generic message; everything else is
    /// already phrased for the caller.
    pub fn user_message(&self) -> String {
        match self {
            Error::Persistence { .. } | Error::Io(_) | Error::Json(_) => {
                DATABASE_USER_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Lock contention, write conflicts and an exhausted deadline are
    /// transient; constraint violations and bad input are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::DeadlineExceeded => true,
            Error::Persistence { source, .. } => is_transient_message(&source.to_string()),
            _ => false,
        }
    }
}

/// Check if a storage error message indicates contention rather than a bad statement
pub(crate) fn is_transient_message(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        // Concurrent transaction conflicts
        || lower.contains("conflict")
        || lower.contains("busy")
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
