//! Archive detection and recursive extraction
//!
//! # Supported Formats
//!
//! - **Zip** (.zip): Using the zip crate
//! - **Tar** (.tar): Using the tar crate
//! - **Tar.gz** (.tar.gz): gzip stream fed straight into tar
//! - **Gzip** (.gz): single-file gzip, decompressed next to its name minus `.gz`
//!
//! An archive `d/b.tar.gz` is expanded into the sibling directory `d/b`, i.e. the
//! file name with every extension stripped. Archives found among the extracted
//! files are expanded in place the same way until no unprocessed archive remains.
//!
//! # Examples
//!
//! ```rust,ignore
//! use collector_ingest::archive::{is_archive, unpack_recursive};
//!
//! if is_archive(&staged) {
//!     let report = unpack_recursive(&staged)?;
//!     for file in &report.files {
//!         println!("{}", file.display());
//!     }
//! }
//! ```

use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Container formats the collector unpacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Gz,
}

impl ArchiveKind {
    /// Classify by file name, case-insensitively. `.tar.gz` is matched as a
    /// compound suffix before the last extension is considered.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") {
            return Some(ArchiveKind::TarGz);
        }
        match name.rsplit_once('.')?.1 {
            "zip" => Some(ArchiveKind::Zip),
            "tar" => Some(ArchiveKind::Tar),
            "gz" => Some(ArchiveKind::Gz),
            _ => None,
        }
    }
}

/// Whether the file name carries one of the recognized archive extensions
pub fn is_archive(path: &Path) -> bool {
    ArchiveKind::detect(path).is_some()
}

/// Sibling directory an archive expands into: `x.tar.gz` -> `x`
pub fn extraction_dir(archive: &Path) -> PathBuf {
    let mut stem = archive.file_name().map(PathBuf::from).unwrap_or_default();
    while let Some(next) = stem.file_stem().map(PathBuf::from) {
        if next == stem {
            break;
        }
        stem = next;
    }
    archive.with_file_name(stem)
}

/// Extract one archive into `dest_dir`, returning the regular files written.
pub fn extract(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let kind = ArchiveKind::detect(archive)
        .ok_or_else(|| IngestError::UnsupportedFormat(archive.display().to_string()))?;

    std::fs::create_dir_all(dest_dir)?;
    let written = match kind {
        ArchiveKind::Tar => extract_tar(archive, dest_dir),
        ArchiveKind::TarGz => extract_tar_gz(archive, dest_dir),
        ArchiveKind::Gz => decompress_gzip(archive, dest_dir).map(|file| vec![file]),
        ArchiveKind::Zip => extract_zip(archive, dest_dir),
    }?;

    debug!(
        archive = %archive.display(),
        dest = %dest_dir.display(),
        files = written.len(),
        "Extracted archive"
    );
    Ok(written)
}

fn open(archive: &Path) -> Result<BufReader<File>> {
    File::open(archive)
        .map(BufReader::new)
        .map_err(|e| IngestError::archive(archive.display().to_string(), e))
}

fn extract_tar(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    unpack_tar_stream(open(archive)?, archive, dest_dir)
}

fn extract_tar_gz(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    unpack_tar_stream(GzDecoder::new(open(archive)?), archive, dest_dir)
}

fn unpack_tar_stream<R: Read>(reader: R, archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let fail = |e: io::Error| IngestError::archive(archive.display().to_string(), e);
    let mut tar = tar::Archive::new(reader);
    let mut written = Vec::new();

    for entry in tar.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;
        let entry_path = entry.path().map_err(fail)?.into_owned();

        if !entry.unpack_in(dest_dir).map_err(fail)? {
            warn!(
                archive = %archive.display(),
                entry = %entry_path.display(),
                "Skipping tar entry outside extraction directory"
            );
            continue;
        }

        // Hard links and sparse entries land as regular files too
        let target = dest_dir.join(&entry_path);
        if std::fs::symlink_metadata(&target).is_ok_and(|meta| meta.is_file()) {
            written.push(target);
        }
    }

    Ok(dedupe(written))
}

/// Single-file gzip: `dest_dir/<name without .gz>`
fn decompress_gzip(archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = archive
        .file_stem()
        .ok_or_else(|| IngestError::archive(archive.display().to_string(), "gzip file has no name"))?;
    let target = dest_dir.join(name);

    let mut decoder = GzDecoder::new(open(archive)?);
    let mut out = File::create(&target)?;
    let bytes = io::copy(&mut decoder, &mut out)
        .map_err(|e| IngestError::archive(archive.display().to_string(), e))?;

    debug!(archive = %archive.display(), bytes, "Decompressed gzip");
    Ok(target)
}

fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let fail = |e: zip::result::ZipError| IngestError::archive(archive.display().to_string(), e);
    let mut zip = zip::ZipArchive::new(open(archive)?).map_err(fail)?;
    let mut written = Vec::new();

    for i in 0..zip.len() {
        let mut member = zip.by_index(i).map_err(fail)?;
        let Some(relative) = member.enclosed_name() else {
            warn!(
                archive = %archive.display(),
                entry = member.name(),
                "Skipping zip entry outside extraction directory"
            );
            continue;
        };
        let target = dest_dir.join(relative);

        if member.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut member, &mut out)
            .map_err(|e| IngestError::archive(archive.display().to_string(), e))?;
        written.push(target);
    }

    Ok(dedupe(written))
}

fn dedupe(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

/// Result of fully unpacking one archive
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Directory the outermost archive expanded into
    pub root_dir: PathBuf,

    /// Plain files uncovered at any nesting depth
    pub files: Vec<PathBuf>,

    /// Nested archives that could not be unpacked; the rest of the tree still is
    pub failures: Vec<(PathBuf, IngestError)>,

    /// Number of archives expanded, the outermost included
    pub archives_extracted: usize,
}

/// Extract `archive` and every archive found inside it, at any depth.
///
/// Each concrete archive path is expanded at most once, so the loop ends after
/// at most one pass per archive in the tree. Failure to open the outermost
/// archive is returned as an error; failures of nested archives are collected
/// in the report.
pub fn unpack_recursive(archive: &Path) -> Result<ExtractionReport> {
    let root_dir = extraction_dir(archive);
    let mut pending = extract(archive, &root_dir)?;
    let mut processed: HashSet<PathBuf> = HashSet::from([archive.to_path_buf()]);
    let mut report = ExtractionReport {
        root_dir,
        archives_extracted: 1,
        ..Default::default()
    };

    while let Some(path) = pending.pop() {
        if !is_archive(&path) {
            report.files.push(path);
            continue;
        }
        if !processed.insert(path.clone()) {
            continue;
        }

        match extract(&path, &extraction_dir(&path)) {
            Ok(found) => {
                report.archives_extracted += 1;
                pending.extend(found);
            },
            Err(e) => {
                warn!(archive = %path.display(), error = %e, "Nested archive could not be extracted");
                report.failures.push((path, e));
            },
        }
    }

    report.files.sort();
    report.files.dedup();
    Ok(report)
}
