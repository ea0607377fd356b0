//! SFTP transport on ssh2
//!
//! SFTP has no server-side working directory, so the channel keeps one and
//! resolves relative paths against it.

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{blocking, create_parent, resolve_remote, Connector, RemoteSession, RemoteTarget, TransferChannel};
use crate::error::{IngestError, Result};
use crate::model::{join_remote, RemoteEntry};

/// Socket read/write timeout for the SSH session
const SESSION_TIMEOUT_MS: u32 = 60_000;

type SharedSftp = Arc<Mutex<Option<Sftp>>>;

#[derive(Debug, Clone, Default)]
pub struct SftpConnector;

impl SftpConnector {
    fn connect_sync(target: &RemoteTarget) -> Result<Session> {
        debug!("Connecting to SFTP server: {}:{}", target.host, target.port);

        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .map_err(|e| IngestError::session(format!("Failed to connect to {}:{}: {}", target.host, target.port, e)))?;

        let mut session =
            Session::new().map_err(|e| IngestError::session(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(SESSION_TIMEOUT_MS);
        session
            .handshake()
            .map_err(|e| IngestError::session(format!("SSH handshake failed: {}", e)))?;

        let auth = match &target.private_key {
            Some(key) => {
                debug!("Authenticating {} with key {}", target.username, key.display());
                session.userauth_pubkey_file(&target.username, None, key, target.password.as_deref())
            },
            None => {
                debug!("Authenticating {} with password", target.username);
                session.userauth_password(&target.username, target.password.as_deref().unwrap_or(""))
            },
        };
        auth.map_err(|e| IngestError::session(format!("SSH authentication failed: {}", e)))?;

        if !session.authenticated() {
            return Err(IngestError::session(format!(
                "SSH authentication rejected for {}",
                target.username
            )));
        }

        Ok(session)
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let target = target.clone();
        let host = target.host.clone();
        let session = blocking("SSH connect", move || Self::connect_sync(&target)).await?;

        info!(host = %host, "SSH session established");
        Ok(Box::new(SftpSession { session }))
    }
}

pub struct SftpSession {
    session: Session,
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn open_channel(&mut self) -> Result<Box<dyn TransferChannel>> {
        let session = self.session.clone();
        let (sftp, home) = blocking("SFTP open", move || {
            let sftp = session
                .sftp()
                .map_err(|e| IngestError::session(format!("Failed to open SFTP channel: {}", e)))?;
            let home = sftp
                .realpath(Path::new("."))
                .map_err(|e| IngestError::session(format!("Failed to resolve home directory: {}", e)))?;
            Ok((sftp, home))
        })
        .await?;

        Ok(Box::new(SftpChannel {
            sftp: Arc::new(Mutex::new(Some(sftp))),
            cwd: remote_string(&home),
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        let session = self.session.clone();
        blocking("SSH disconnect", move || {
            session
                .disconnect(None, "collector run finished", None)
                .map_err(|e| IngestError::transport(format!("SSH disconnect failed: {}", e)))
        })
        .await
    }
}

pub struct SftpChannel {
    sftp: SharedSftp,
    cwd: String,
}

fn remote_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Real path of a symbolic link when it leads to a directory
fn link_directory(sftp: &Sftp, link: &Path) -> Option<String> {
    let real = sftp.realpath(link).ok()?;
    match sftp.stat(&real) {
        Ok(stat) if stat.is_dir() => Some(remote_string(&real)),
        _ => None,
    }
}

async fn with_sftp<T, F>(sftp: &SharedSftp, op: &'static str, f: F) -> Result<T>
where
    F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let sftp = Arc::clone(sftp);
    blocking(op, move || {
        let guard = sftp
            .lock()
            .map_err(|_| IngestError::transport("SFTP channel lock poisoned"))?;
        let channel = guard
            .as_ref()
            .ok_or_else(|| IngestError::transport("SFTP channel is closed"))?;
        f(channel)
    })
    .await
}

#[async_trait]
impl TransferChannel for SftpChannel {
    async fn change_directory(&mut self, path: &str) -> Result<String> {
        let target = resolve_remote(&self.cwd, path);
        let resolved = with_sftp(&self.sftp, "SFTP realpath", move |sftp| {
            let real = sftp
                .realpath(Path::new(&target))
                .map_err(|e| IngestError::transport(format!("Failed to resolve {}: {}", target, e)))?;
            let stat = sftp
                .stat(&real)
                .map_err(|e| IngestError::transport(format!("Failed to stat {}: {}", target, e)))?;
            if !stat.is_dir() {
                return Err(IngestError::transport(format!("{} is not a directory", target)));
            }
            Ok(real)
        })
        .await?;

        self.cwd = remote_string(&resolved);
        debug!(cwd = %self.cwd, "Changed remote directory");
        Ok(self.cwd.clone())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = resolve_remote(&self.cwd, path);
        let listed = dir.clone();
        let raw = with_sftp(&self.sftp, "SFTP readdir", move |sftp| {
            let listing = sftp
                .readdir(Path::new(&listed))
                .map_err(|e| IngestError::transport(format!("Failed to list directory {}: {}", listed, e)))?;

            // readdir reports a link's own attributes; follow it to see what it points at
            let resolved = listing
                .into_iter()
                .map(|(path, stat)| {
                    let target = if stat.file_type().is_symlink() {
                        link_directory(sftp, &path)
                    } else {
                        None
                    };
                    (path, stat, target)
                })
                .collect::<Vec<_>>();
            Ok(resolved)
        })
        .await?;

        let entries: Vec<RemoteEntry> = raw
            .into_iter()
            .filter_map(|(path, stat, target)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    path: join_remote(&dir, &name),
                    name,
                    is_directory: stat.is_dir() || target.is_some(),
                    size: stat.size,
                    link_target: target,
                })
            })
            .collect();

        debug!("Listed {} ({} entries)", dir, entries.len());
        Ok(entries)
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let remote = resolve_remote(&self.cwd, remote_path);
        let local: PathBuf = local_path.to_path_buf();

        with_sftp(&self.sftp, "SFTP get", move |sftp| {
            let mut source = sftp
                .open(Path::new(&remote))
                .map_err(|e| IngestError::download(&remote, e))?;
            create_parent(&local).map_err(|e| IngestError::download(&remote, e))?;
            let mut file = File::create(&local).map_err(|e| IngestError::download(&remote, e))?;
            let bytes = io::copy(&mut source, &mut file).map_err(|e| IngestError::download(&remote, e))?;

            debug!("Downloaded {} bytes from {}", bytes, remote);
            Ok(bytes)
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<()> {
        let sftp = Arc::clone(&self.sftp);
        blocking("SFTP close", move || {
            match sftp.lock() {
                Ok(mut guard) => drop(guard.take()),
                Err(_) => warn!("SFTP channel lock poisoned during close"),
            }
            Ok(())
        })
        .await
    }
}
