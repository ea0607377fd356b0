//! Error types shared by collector crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Main error type for shared collector utilities
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}
