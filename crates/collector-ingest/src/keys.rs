//! Destination keys for object storage
//!
//! A key is `{profile}/{file_type}/{host}/{run_date}/{relative_folder}/{file_name}`,
//! where `relative_folder` is the staged file's parent directory relative to the
//! staging root. The folder segment is dropped entirely when the file sits
//! directly in the staging root. Separators are always `/`, including when a
//! staging path was written with `\`.

use collector_common::CollectorError;
use std::path::Path;

use crate::model::RunContext;

/// Build the destination key for one staged file.
///
/// Fails when `staged_file` does not lie under `staging_root` or has no file name.
pub fn key_for(
    staged_file: &Path,
    staging_root: &Path,
    profile: &str,
    file_type: &str,
    host: &str,
    run_date: &str,
) -> Result<String, CollectorError> {
    let (folder, file_name) = relative_parts(staged_file, staging_root)?;

    let prefix = format!("{}/{}/{}/{}", profile, file_type, host, run_date);
    if folder.is_empty() {
        Ok(format!("{}/{}", prefix, file_name))
    } else {
        Ok(format!("{}/{}/{}", prefix, folder.join("/"), file_name))
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn relative_parts(staged_file: &Path, staging_root: &Path) -> Result<(Vec<String>, String), CollectorError> {
    let root = normalize(staging_root);
    let root = root.trim_end_matches('/');
    let file = normalize(staged_file);

    let rest = if root.is_empty() {
        file.as_str()
    } else {
        file.strip_prefix(root)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| {
                CollectorError::InvalidPath(format!(
                    "{} is not under staging root {}",
                    staged_file.display(),
                    staging_root.display()
                ))
            })?
    };

    let mut segments = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(CollectorError::InvalidPath(format!(
                    "{} escapes the staging root",
                    staged_file.display()
                )))
            },
            other => segments.push(other.to_string()),
        }
    }

    let file_name = segments
        .pop()
        .ok_or_else(|| CollectorError::InvalidPath(format!("{} has no file name", staged_file.display())))?;

    Ok((segments, file_name))
}

/// Key builder bound to one run's profile, file type, host and date
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    profile: String,
    file_type: String,
    host: String,
    run_date: String,
}

impl KeyGenerator {
    pub fn new(
        profile: impl Into<String>,
        file_type: impl Into<String>,
        host: impl Into<String>,
        run_date: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            file_type: file_type.into(),
            host: host.into(),
            run_date: run_date.into(),
        }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        Self::new(
            ctx.profile.clone(),
            ctx.file_type.clone(),
            ctx.host.clone(),
            ctx.run_date_segment(),
        )
    }

    pub fn key_for(&self, staged_file: &Path, staging_root: &Path) -> Result<String, CollectorError> {
        key_for(
            staged_file,
            staging_root,
            &self.profile,
            &self.file_type,
            &self.host,
            &self.run_date,
        )
    }
}
