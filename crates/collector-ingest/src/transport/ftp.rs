//! FTP transport on suppaftp
//!
//! One control connection serves as both session and transfer channel. All
//! transfers use Extended Passive Mode (EPSV) for better NAT/firewall
//! compatibility, in binary mode.

use async_trait::async_trait;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use suppaftp::FtpStream;
use tracing::{debug, info, warn};

use super::{blocking, create_parent, resolve_remote, Connector, RemoteSession, RemoteTarget, TransferChannel};
use crate::error::{IngestError, Result};
use crate::model::{join_remote, RemoteEntry};

type SharedStream = Arc<Mutex<Option<FtpStream>>>;

#[derive(Debug, Clone, Default)]
pub struct FtpConnector;

impl FtpConnector {
    fn connect_sync(target: &RemoteTarget) -> Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", target.host, target.port);

        let mut ftp_stream = FtpStream::connect(format!("{}:{}", target.host, target.port))
            .map_err(|e| IngestError::session(format!("Failed to connect to FTP server: {}", e)))?;

        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

        debug!("Logging in as: {}", target.username);
        ftp_stream
            .login(target.username.as_str(), target.password.as_deref().unwrap_or(""))
            .map_err(|e| IngestError::session(format!("FTP login failed: {}", e)))?;

        ftp_stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .map_err(|e| IngestError::session(format!("Failed to set binary mode: {}", e)))?;

        Ok(ftp_stream)
    }
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let target = target.clone();
        let host = target.host.clone();
        let stream = blocking("FTP connect", move || Self::connect_sync(&target)).await?;

        info!(host = %host, "FTP session established");
        Ok(Box::new(FtpSession {
            stream: Arc::new(Mutex::new(Some(stream))),
        }))
    }
}

/// Run `f` against the live control connection on the blocking pool
async fn with_stream<T, F>(stream: &SharedStream, op: &'static str, f: F) -> Result<T>
where
    F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let stream = Arc::clone(stream);
    blocking(op, move || {
        let mut guard = stream
            .lock()
            .map_err(|_| IngestError::transport("FTP connection lock poisoned"))?;
        let ftp = guard
            .as_mut()
            .ok_or_else(|| IngestError::transport("FTP connection already closed"))?;
        f(ftp)
    })
    .await
}

pub struct FtpSession {
    stream: SharedStream,
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn open_channel(&mut self) -> Result<Box<dyn TransferChannel>> {
        let cwd = with_stream(&self.stream, "FTP PWD", |ftp| {
            ftp.pwd()
                .map_err(|e| IngestError::session(format!("Failed to read working directory: {}", e)))
        })
        .await?;

        Ok(Box::new(FtpChannel {
            stream: Arc::clone(&self.stream),
            cwd,
            open: true,
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        let stream = Arc::clone(&self.stream);
        blocking("FTP QUIT", move || {
            let taken = stream
                .lock()
                .map_err(|_| IngestError::transport("FTP connection lock poisoned"))?
                .take();
            if let Some(mut ftp) = taken {
                if let Err(e) = ftp.quit() {
                    warn!("Failed to quit FTP session gracefully: {}", e);
                }
            }
            Ok(())
        })
        .await
    }
}

/// FTP transfer channel; shares the session's control connection
pub struct FtpChannel {
    stream: SharedStream,
    cwd: String,
    open: bool,
}

impl FtpChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(IngestError::transport("FTP channel is closed"))
        }
    }

    /// Real directory behind each link path, or `None` when the link does not
    /// lead to a directory. The working directory is restored afterwards.
    async fn resolve_links(&self, links: Vec<String>) -> Result<Vec<Option<String>>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let cwd = self.cwd.clone();
        with_stream(&self.stream, "FTP link resolve", move |ftp| {
            let targets: Vec<Option<String>> = links
                .iter()
                .map(|link| match ftp.cwd(link) {
                    Ok(()) => ftp.pwd().ok(),
                    Err(_) => None,
                })
                .collect();
            ftp.cwd(&cwd)
                .map_err(|e| IngestError::transport(format!("Failed to restore working directory {}: {}", cwd, e)))?;
            Ok(targets)
        })
        .await
    }
}

#[async_trait]
impl TransferChannel for FtpChannel {
    async fn change_directory(&mut self, path: &str) -> Result<String> {
        self.ensure_open()?;
        let target = resolve_remote(&self.cwd, path);
        let cwd = with_stream(&self.stream, "FTP CWD", move |ftp| {
            ftp.cwd(&target)
                .map_err(|e| IngestError::transport(format!("Failed to change directory to {}: {}", target, e)))?;
            ftp.pwd()
                .map_err(|e| IngestError::transport(format!("Failed to read working directory: {}", e)))
        })
        .await?;

        debug!(cwd = %cwd, "Changed remote directory");
        self.cwd = cwd.clone();
        Ok(cwd)
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.ensure_open()?;
        let dir = resolve_remote(&self.cwd, path);
        let listed = dir.clone();
        let lines = with_stream(&self.stream, "FTP LIST", move |ftp| {
            ftp.list(Some(listed.as_str()))
                .map_err(|e| IngestError::transport(format!("Failed to list directory {}: {}", listed, e)))
        })
        .await?;

        let parsed: Vec<FtpEntry> = lines.iter().filter_map(|line| FtpEntry::parse(line)).collect();
        let links: Vec<String> = parsed
            .iter()
            .filter(|entry| entry.is_link)
            .map(|entry| join_remote(&dir, &entry.name))
            .collect();
        let mut targets = self.resolve_links(links).await?.into_iter();

        let entries: Vec<RemoteEntry> = parsed
            .into_iter()
            .map(|entry| {
                let target = if entry.is_link { targets.next().flatten() } else { None };
                entry.into_remote(&dir, target)
            })
            .collect();

        debug!("Listed {} ({} entries)", dir, entries.len());
        Ok(entries)
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.ensure_open()?;
        let remote = resolve_remote(&self.cwd, remote_path);
        let local: PathBuf = local_path.to_path_buf();

        with_stream(&self.stream, "FTP RETR", move |ftp| {
            create_parent(&local).map_err(|e| IngestError::download(&remote, e))?;
            let mut file = File::create(&local).map_err(|e| IngestError::download(&remote, e))?;

            let mut data = ftp
                .retr_as_stream(&remote)
                .map_err(|e| IngestError::download(&remote, e))?;
            let copied = io::copy(&mut data, &mut file);
            let finalized = ftp.finalize_retr_stream(data);

            let bytes = copied.map_err(|e| IngestError::download(&remote, e))?;
            finalized.map_err(|e| IngestError::download(&remote, e))?;

            debug!("Downloaded {} bytes from {}", bytes, remote);
            Ok(bytes)
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Parsed FTP directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    /// Entry name (filename or directory name)
    pub name: String,

    /// Whether this is a directory
    pub is_directory: bool,

    /// File size in bytes (if available)
    pub size: Option<u64>,

    /// Symbolic link; its target type is unknown until resolved
    pub is_link: bool,
}

impl FtpEntry {
    /// Parse an FTP LIST line into an entry
    ///
    /// Unix-style servers:
    /// `drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 dirname`
    /// `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 file name.txt`
    /// `lrwxrwxrwx   1 ftp ftp    11 Jan 15 12:00 latest -> release-3`
    ///
    /// IIS/DOS-style servers:
    /// `01-15-25  12:00PM       <DIR>          dirname`
    /// `01-15-25  12:00PM                 1234 data.txt`
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        if parts[0].starts_with(|c: char| c.is_ascii_digit()) {
            return Self::parse_dos(line, &parts);
        }

        let is_directory = parts[0].starts_with('d');
        let is_link = parts[0].starts_with('l');

        // Names may contain runs of spaces; everything after the time column is the name
        let mut name = match field_tail(line, 8) {
            Some(tail) => tail.to_string(),
            None => parts.last()?.to_string(),
        };
        if is_link {
            if let Some((link, _target)) = name.split_once(" -> ") {
                name = link.to_string();
            }
        }

        let size = if parts.len() >= 5 { parts[4].parse().ok() } else { None };

        Some(Self {
            name,
            is_directory,
            size,
            is_link,
        })
    }

    fn parse_dos(line: &str, parts: &[&str]) -> Option<Self> {
        let name = field_tail(line, 3)?.to_string();
        if parts[2].eq_ignore_ascii_case("<DIR>") {
            return Some(Self {
                name,
                is_directory: true,
                size: None,
                is_link: false,
            });
        }
        Some(Self {
            name,
            is_directory: false,
            size: Some(parts[2].parse().ok()?),
            is_link: false,
        })
    }

    fn into_remote(self, dir: &str, link_target: Option<String>) -> RemoteEntry {
        RemoteEntry {
            path: join_remote(dir, &self.name),
            name: self.name,
            is_directory: self.is_directory || link_target.is_some(),
            size: self.size,
            link_target,
        }
    }
}

/// Raw text of `line` after its first `fields` whitespace-separated fields
fn field_tail(line: &str, fields: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..fields {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end_matches(['\r', '\n']);
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
