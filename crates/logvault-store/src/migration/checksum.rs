//! Content checksums and their on-disk records.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{Result, StoreError};
use crate::paths;

/// Lowercase hex SHA-256 of a file's bytes.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(|e| StoreError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read a checksum record. A missing record is `None`.
pub fn read_record(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Overwrite a checksum record.
pub fn write_record(path: &Path, checksum: &str) -> Result<()> {
    paths::write_file(path, checksum)
}
