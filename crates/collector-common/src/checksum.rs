//! Checksum utilities for staged files

use crate::error::Result;
use crate::types::{ChecksumAlgorithm, FileDigest};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Compute checksum and byte count for a file in one pass
pub fn file_digest(path: impl AsRef<Path>, algorithm: ChecksumAlgorithm) -> Result<FileDigest> {
    let mut file = std::fs::File::open(path)?;
    let (checksum, size) = digest_reader(&mut file, algorithm)?;
    Ok(FileDigest {
        checksum,
        algorithm,
        size,
    })
}

/// Hex digest and byte count of any readable source
pub fn digest_reader<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<(String, u64)> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hash_with(Sha256::new(), reader),
        ChecksumAlgorithm::Sha512 => hash_with(Sha512::new(), reader),
    }
}

fn hash_with<D: Digest, R: Read>(mut hasher: D, reader: &mut R) -> Result<(String, u64)> {
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}
