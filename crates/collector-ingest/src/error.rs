//! Error types for the ingestion pipeline
//!
//! Errors fall into two classes. Run-level errors (`Config`, `Session`) abort the
//! run before any file is touched and are returned to the caller. Everything else
//! is file-level: it is caught at the per-file boundary, written to the audit
//! ledger as a `FAILED` record, and the walk continues.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Collector configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote session or transfer channel could not be established
    #[error("Session error: {0}")]
    Session(String),

    /// Listing or other remote operation failed on an open channel
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote file could not be fetched to the staging area
    #[error("Download of '{path}' failed: {reason}")]
    Download { path: String, reason: String },

    /// A file reached the extractor without a recognized archive extension
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// A recognized archive is corrupt or could not be unpacked
    #[error("Archive error in '{path}': {reason}")]
    Archive { path: String, reason: String },

    /// Object storage rejected or failed the upload
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Audit ledger error: {0}")]
    Ledger(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] collector_common::CollectorError),
}

impl IngestError {
    /// Whether this error ends the whole run rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config(_) | IngestError::Session(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn download(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Download {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn archive(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn ledger(msg: impl std::fmt::Display) -> Self {
        Self::Ledger(msg.to_string())
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Ledger(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(IngestError::config("missing host").is_fatal());
        assert!(IngestError::session("connection refused").is_fatal());
        assert!(!IngestError::storage("403 Forbidden").is_fatal());
        assert!(!IngestError::UnsupportedFormat("report.rar".into()).is_fatal());
        assert!(!IngestError::download("/r/a.txt", "No such file").is_fatal());
    }

    #[test]
    fn test_messages_carry_cause() {
        let err = IngestError::archive("/r/d/b.zip", "invalid Zip archive");
        assert_eq!(err.to_string(), "Archive error in '/r/d/b.zip': invalid Zip archive");
    }
}
