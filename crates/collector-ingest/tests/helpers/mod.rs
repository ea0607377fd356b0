//! Test helpers for collector ingestion integration tests
//!
//! - A transport that serves a local directory as the remote tree
//! - An in-memory object store with injectable upload failures
//! - An event bus that keeps what it was given
//! - A per-test environment wiring them to an orchestrator

#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use chrono::NaiveDate;
use collector_ingest::config::{CollectorConfig, Protocol, DEFAULT_PROCESS_TYPE};
use collector_ingest::error::{IngestError, Result};
use collector_ingest::events::{EventBus, IngestionEvent};
use collector_ingest::ledger::MemoryAuditLedger;
use collector_ingest::model::{join_remote, RemoteEntry};
use collector_ingest::storage::{digest_file, ObjectStore, UploadResult};
use collector_ingest::transport::{Connector, RemoteSession, RemoteTarget, TransferChannel};
use collector_ingest::Orchestrator;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub use fixtures::*;

pub const HOST: &str = "10.0.0.5";
pub const PROFILE: &str = "dev";
pub const FILE_TYPE: &str = "PM";
pub const TOPIC: &str = "ingestion-audit";
pub const COLLECTOR_ID: &str = "pm-collector-01";

pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).expect("valid date")
}

/// Key prefix every published object gets in these tests
pub fn key(rest: &str) -> String {
    format!("{}/{}/{}/2026-10-17/{}", PROFILE, FILE_TYPE, HOST, rest)
}

// ============================================================================
// Transport
// ============================================================================

/// What the fake transport saw
#[derive(Debug, Default)]
pub struct TransportLog {
    downloads: Mutex<Vec<String>>,
    channel_closed: AtomicBool,
    session_closed: AtomicBool,
}

impl TransportLog {
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().expect("log lock").clone()
    }

    pub fn channel_closed(&self) -> bool {
        self.channel_closed.load(Ordering::SeqCst)
    }

    pub fn session_closed(&self) -> bool {
        self.session_closed.load(Ordering::SeqCst)
    }
}

/// Serves `root` as the remote filesystem: remote `/r/a.txt` is `root/r/a.txt`.
/// Listings are sorted by name and start with `.` and `..` like many servers.
#[derive(Clone)]
pub struct LocalConnector {
    root: PathBuf,
    fail_connect: bool,
    fail_downloads: HashSet<String>,
    pub log: Arc<TransportLog>,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fail_connect: false,
            fail_downloads: HashSet::new(),
            log: Arc::new(TransportLog::default()),
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_download(mut self, remote_path: &str) -> Self {
        self.fail_downloads.insert(remote_path.to_string());
        self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        if self.fail_connect {
            return Err(IngestError::session("connection refused"));
        }
        Ok(Box::new(LocalSession {
            connector: self.clone(),
        }))
    }
}

struct LocalSession {
    connector: LocalConnector,
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn open_channel(&mut self) -> Result<Box<dyn TransferChannel>> {
        Ok(Box::new(LocalChannel {
            connector: self.connector.clone(),
            cwd: "/".to_string(),
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connector.log.session_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct LocalChannel {
    connector: LocalConnector,
    cwd: String,
}

impl LocalChannel {
    fn local_for(&self, remote: &str) -> PathBuf {
        self.connector.root.join(remote.trim_start_matches('/'))
    }

    /// Remote path of the real location behind `local`, following links
    fn real_remote(&self, local: &Path) -> Option<String> {
        let root = self.connector.root.canonicalize().ok()?;
        let real = local.canonicalize().ok()?;
        let relative = real.strip_prefix(&root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", segments.join("/")))
    }
}

#[async_trait]
impl TransferChannel for LocalChannel {
    async fn change_directory(&mut self, path: &str) -> Result<String> {
        let target = if path.starts_with('/') {
            path.to_string()
        } else {
            join_remote(&self.cwd, path)
        };
        if !self.local_for(&target).is_dir() {
            return Err(IngestError::transport(format!("550 {}: No such directory", target)));
        }
        self.cwd = target.clone();
        Ok(target)
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.local_for(path);
        let mut entries: Vec<RemoteEntry> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let is_link = e.file_type().map(|t| t.is_symlink()).unwrap_or(false);
                // Follows links, like a server resolving them
                let meta = std::fs::metadata(e.path()).ok();
                let is_directory = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
                let link_target = if is_link && is_directory {
                    self.real_remote(&e.path())
                } else {
                    None
                };
                RemoteEntry {
                    path: join_remote(path, &name),
                    is_directory,
                    size: meta.filter(|m| m.is_file()).map(|m| m.len()),
                    name,
                    link_target,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut listing = vec![
            RemoteEntry {
                name: ".".into(),
                path: join_remote(path, "."),
                is_directory: true,
                size: None,
                link_target: None,
            },
            RemoteEntry {
                name: "..".into(),
                path: join_remote(path, ".."),
                is_directory: true,
                size: None,
                link_target: None,
            },
        ];
        listing.extend(entries);
        Ok(listing)
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        if self.connector.fail_downloads.contains(remote_path) {
            return Err(IngestError::download(remote_path, "550 Failed to open file"));
        }
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = std::fs::copy(self.local_for(remote_path), local_path)
            .map_err(|e| IngestError::download(remote_path, e))?;
        self.connector
            .log
            .downloads
            .lock()
            .expect("log lock")
            .push(remote_path.to_string());
        Ok(bytes)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connector.log.channel_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Object store and event bus
// ============================================================================

/// Keeps uploaded bytes by key; keys ending in a failing suffix are rejected
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_suffixes: Vec<String>,
}

impl MemoryObjectStore {
    pub fn failing_on(suffixes: &[&str]) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            failing_suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().expect("store lock").keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("store lock").get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<UploadResult> {
        if self.failing_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            return Err(IngestError::storage("503 SlowDown: simulated outage"));
        }
        let data = tokio::fs::read(local_path).await?;
        let (checksum, size) = digest_file(local_path).await?;
        self.objects
            .lock()
            .expect("store lock")
            .insert(key.to_string(), data);
        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }
}

#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<(String, IngestionEvent)>>,
}

impl RecordingEventBus {
    pub fn events(&self) -> Vec<(String, IngestionEvent)> {
        self.events.lock().expect("bus lock").clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, topic: &str, event: &IngestionEvent) -> Result<()> {
        self.events
            .lock()
            .expect("bus lock")
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

// ============================================================================
// Test environment
// ============================================================================

/// Temporary remote tree + staging area + in-memory collaborators
pub struct TestEnv {
    pub dir: TempDir,
    pub ledger: MemoryAuditLedger,
    pub events: Arc<RecordingEventBus>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            ledger: MemoryAuditLedger::new(),
            events: Arc::new(RecordingEventBus::default()),
        }
    }

    pub fn remote_base(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    /// Create a remote file, e.g. `put_remote("r/d/b.zip", &bytes)`
    pub fn put_remote(&self, relative: &str, data: &[u8]) {
        let path = self.remote_base().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create remote dir");
        }
        std::fs::write(path, data).expect("write remote file");
    }

    /// `/r/a.txt` and `/r/d/b.zip` containing `c.txt`
    pub fn standard_tree(&self) {
        self.put_remote("r/a.txt", b"alpha");
        self.put_remote("r/d/b.zip", &zip_bytes(&[("c.txt", b"charlie")]));
    }

    pub fn connector(&self) -> LocalConnector {
        LocalConnector::new(self.remote_base())
    }

    pub fn config(&self) -> CollectorConfig {
        CollectorConfig {
            collector_id: COLLECTOR_ID.into(),
            protocol: Protocol::Ftp,
            host: HOST.into(),
            port: None,
            username: "collector".into(),
            password: Some("secret".into()),
            private_key: None,
            allow_empty_password: false,
            remote_root: "/r".into(),
            staging_root: self.staging_root(),
            file_type: FILE_TYPE.into(),
            delimiter: ";".into(),
            process_type: DEFAULT_PROCESS_TYPE.into(),
        }
    }

    pub fn orchestrator(&self, connector: &LocalConnector, store: &Arc<MemoryObjectStore>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(connector.clone()),
            Arc::new(self.ledger.clone()),
            store.clone(),
            self.events.clone(),
        )
        .with_profile(PROFILE)
    }
}
