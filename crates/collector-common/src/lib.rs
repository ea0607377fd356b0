//! Collector Common Library
//!
//! Shared types, utilities, and error handling for the collector workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all collector workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Console/file/JSON tracing setup driven by `LOG_*` variables
//! - **Checksums**: Digests of staged files before they are published
//! - **Types**: Shared value types
//!
//! # Example
//!
//! ```no_run
//! use collector_common::{Result, CollectorError};
//! use collector_common::checksum::file_digest;
//! use collector_common::types::ChecksumAlgorithm;
//!
//! fn describe(path: &str) -> Result<()> {
//!     let digest = file_digest(path, ChecksumAlgorithm::Sha256)?;
//!     tracing::info!(size = digest.size, checksum = %digest.checksum, "Staged file");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CollectorError, Result};
