//! Remote tree walker
//!
//! Depth-first over the remote tree with an explicit stack of directory
//! listings: a subdirectory is fully walked before the next sibling entry, and
//! siblings are visited in the order the server listed them. Every file goes
//! through ledger check, download, optional extraction and publish; any error on
//! that path becomes one `FAILED` outcome and the walk moves on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{self, ExtractionReport};
use crate::error::{IngestError, Result};
use crate::gateway::PublishGateway;
use crate::keys::KeyGenerator;
use crate::ledger::AuditLedger;
use crate::model::{join_remote, FileOutcome, JobStatus, RemoteEntry, StagedFile};
use crate::report::RunReport;
use crate::transport::TransferChannel;

/// One directory listing being consumed
struct Frame {
    entries: std::vec::IntoIter<RemoteEntry>,
    local_dir: PathBuf,

    /// Server-side real path of the listed directory
    real_dir: String,
}

pub struct Walker<'a> {
    channel: &'a mut dyn TransferChannel,
    ledger: &'a dyn AuditLedger,
    gateway: &'a PublishGateway,
    keys: KeyGenerator,
    staging_root: PathBuf,
    visited: HashSet<String>,
}

impl<'a> Walker<'a> {
    pub fn new(
        channel: &'a mut dyn TransferChannel,
        ledger: &'a dyn AuditLedger,
        gateway: &'a PublishGateway,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            keys: KeyGenerator::from_context(gateway.context()),
            channel,
            ledger,
            gateway,
            staging_root: staging_root.into(),
            visited: HashSet::new(),
        }
    }

    /// Walk `remote_root`, mirroring it under the staging root.
    ///
    /// Only a failure to list `remote_root` itself is returned; unreadable
    /// subdirectories are logged and skipped.
    pub async fn walk(&mut self, remote_root: &str, report: &mut RunReport) -> Result<()> {
        let root_entries = self.channel.list(remote_root).await?;
        let root_real = normalize_dir(remote_root);
        self.visited.insert(root_real.clone());

        let mut stack = vec![Frame {
            entries: root_entries.into_iter(),
            local_dir: self.staging_root.clone(),
            real_dir: root_real,
        }];

        loop {
            let (entry, local_dir, parent_real) = match stack.last_mut() {
                None => break,
                Some(frame) => match frame.entries.next() {
                    Some(entry) => (entry, frame.local_dir.clone(), frame.real_dir.clone()),
                    None => {
                        stack.pop();
                        continue;
                    },
                },
            };

            if entry.is_pseudo() {
                continue;
            }
            if entry.name.contains(['/', '\\']) || entry.name.is_empty() {
                warn!(name = %entry.name, dir = %entry.path, "Skipping entry with unusable name");
                continue;
            }

            let local_path = local_dir.join(&entry.name);

            if entry.is_directory {
                if let Some(frame) = self.enter_directory(&entry, local_path, &parent_real).await {
                    stack.push(frame);
                }
            } else {
                self.process_file(&entry, &local_path, report).await;
            }
        }

        report.stats.bytes_uploaded = self.gateway.bytes_uploaded();
        Ok(())
    }

    /// Directories are tracked by real path, so a symbolic link back to an
    /// ancestor or to an already walked directory is not listed again.
    async fn enter_directory(
        &mut self,
        entry: &RemoteEntry,
        local_dir: PathBuf,
        parent_real: &str,
    ) -> Option<Frame> {
        let real_dir = match &entry.link_target {
            Some(target) => normalize_dir(target),
            None => normalize_dir(&join_remote(parent_real, &entry.name)),
        };
        if !self.visited.insert(real_dir.clone()) {
            debug!(dir = %entry.path, real = %real_dir, "Directory already visited");
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&local_dir).await {
            warn!(dir = %local_dir.display(), error = %e, "Cannot create staging directory");
            return None;
        }

        let listed = entry.link_target.as_deref().unwrap_or(&entry.path);
        match self.channel.list(listed).await {
            Ok(entries) => {
                debug!(dir = %entry.path, entries = entries.len(), "Descending");
                Some(Frame {
                    entries: entries.into_iter(),
                    local_dir,
                    real_dir,
                })
            },
            Err(e) => {
                warn!(dir = %entry.path, error = %e, "Cannot list remote directory");
                None
            },
        }
    }

    async fn process_file(&mut self, entry: &RemoteEntry, local_path: &Path, report: &mut RunReport) {
        report.stats.files_seen += 1;
        let collector_id = &self.gateway.context().collector_id;

        match self.ledger.latest_status(collector_id, &entry.path).await {
            Ok(Some(JobStatus::Successful)) => {
                debug!(path = %entry.path, "Already ingested, skipping");
                report.push(FileOutcome::Skipped {
                    remote_path: entry.path.clone(),
                });
                return;
            },
            Ok(status) => {
                debug!(path = %entry.path, previous = ?status, "Ingesting");
            },
            Err(e) => {
                let outcome = self.gateway.fail(&entry.path, &entry.path, &e).await;
                report.push(outcome);
                return;
            },
        }

        if let Err(e) = self.channel.download(&entry.path, local_path).await {
            let outcome = self.gateway.fail(&entry.path, &entry.path, &e).await;
            report.push(outcome);
            return;
        }

        if archive::is_archive(local_path) {
            self.process_archive(entry, local_path, report).await;
        } else {
            let staged = StagedFile {
                local_path: local_path.to_path_buf(),
                origin_path: entry.path.clone(),
                source_path: entry.path.clone(),
                archive_member: false,
            };
            let outcome = self.publish(&staged).await;
            report.push(outcome);
        }
    }

    async fn process_archive(&mut self, entry: &RemoteEntry, local_path: &Path, report: &mut RunReport) {
        let archive_path = local_path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || archive::unpack_recursive(&archive_path))
            .await
            .map_err(|e| IngestError::archive(&entry.path, format!("extraction task failed: {}", e)))
            .and_then(|r| r);

        let ExtractionReport {
            root_dir,
            files,
            failures,
            archives_extracted,
        } = match extracted {
            Ok(extraction) => extraction,
            Err(e) => {
                let outcome = self.gateway.fail(&entry.path, &entry.path, &e).await;
                report.push(outcome);
                return;
            },
        };

        report.stats.archives_extracted += archives_extracted as u64;
        info!(
            archive = %entry.path,
            files = files.len(),
            nested_failures = failures.len(),
            "Unpacked archive"
        );

        for (nested, error) in failures {
            let origin = member_origin(&entry.path, &root_dir, &nested);
            let outcome = self.gateway.fail(&origin, &entry.path, &error).await;
            report.push(outcome);
        }

        for file in files {
            let staged = StagedFile {
                origin_path: member_origin(&entry.path, &root_dir, &file),
                source_path: entry.path.clone(),
                local_path: file,
                archive_member: true,
            };
            let outcome = self.publish(&staged).await;
            report.push(outcome);
        }
    }

    async fn publish(&self, staged: &StagedFile) -> FileOutcome {
        match self.keys.key_for(&staged.local_path, &self.staging_root) {
            Ok(key) => self.gateway.publish(staged, &key).await,
            Err(e) => {
                self.gateway
                    .fail(&staged.origin_path, &staged.source_path, &IngestError::from(e))
                    .await
            },
        }
    }
}

fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Remote path of an archive member: the archive's remote path followed by the
/// member's path inside the archive's extraction directory
pub fn member_origin(archive_remote: &str, root_dir: &Path, member: &Path) -> String {
    let relative = member.strip_prefix(root_dir).unwrap_or(member);
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", archive_remote.trim_end_matches('/'), relative)
}
