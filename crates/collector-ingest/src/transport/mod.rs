//! Remote session and file-transfer channel contracts
//!
//! A [`Connector`] opens a [`RemoteSession`]; the session hands out one
//! [`TransferChannel`] that the walker uses for the whole run. FTP and SFTP
//! clients are blocking, so adapters run every call on tokio's blocking pool
//! and hold their handle behind a mutex: one remote operation is in flight at a
//! time.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Protocol;
use crate::error::{IngestError, Result};
use crate::model::RemoteEntry;

pub mod ftp;
pub mod sftp;

pub use ftp::FtpConnector;
pub use sftp::SftpConnector;

/// Where and as whom to connect
#[derive(Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .finish()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open an authenticated session. Failures are `IngestError::Session`.
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn open_channel(&mut self) -> Result<Box<dyn TransferChannel>>;

    async fn disconnect(&mut self) -> Result<()>;
}

#[async_trait]
pub trait TransferChannel: Send {
    /// Change the working directory and return it as an absolute path
    async fn change_directory(&mut self, path: &str) -> Result<String>;

    /// Entries of `path` in the order the server returns them
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Fetch `remote_path` into `local_path`, creating parent directories.
    /// Returns the number of bytes written.
    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Connector for the configured protocol
pub fn connector_for(protocol: Protocol) -> Arc<dyn Connector> {
    match protocol {
        Protocol::Ftp => Arc::new(FtpConnector),
        Protocol::Sftp => Arc::new(SftpConnector),
    }
}

/// Run one blocking client call on the blocking pool
pub(crate) async fn blocking<T, F>(op: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::transport(format!("{} task panicked: {}", op, e)))?
}

pub(crate) fn create_parent(local_path: &Path) -> std::io::Result<()> {
    match local_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Resolve `path` against an absolute working directory
pub(crate) fn resolve_remote(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        crate::model::join_remote(cwd, path)
    }
}
