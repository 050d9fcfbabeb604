//! Deterministic on-disk layout for a data directory.
//!
//! ```text
//! {data_dir}/
//!   ├── databases/<name>.sqlite             embedded store
//!   ├── databases/.mysql-<host>-<port>-<db>.created
//!   │                                       database-exists marker
//!   ├── migrations/<name>.sha256            last migrated checksum
//!   ├── migrations/<name>.pending           failed migration marker
//!   └── backups/<name>.sql                  exit backup
//! ```

use std::path::{Path, PathBuf};

use crate::errors::{Result, StoreError};

const MAX_NAME_LEN: usize = 64;

/// Path resolver rooted at a data directory.
#[derive(Clone, Debug)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    /// Create a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded database file for a logical name.
    pub fn database_file(&self, name: &str) -> PathBuf {
        self.root.join("databases").join(format!("{name}.sqlite"))
    }

    /// Marker recording that `database` was created on the server at
    /// `host:port`.
    pub fn mysql_marker(&self, host: &str, port: u16, database: &str) -> PathBuf {
        let host: String = host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_') { c } else { '_' })
            .collect();
        self.root
            .join("databases")
            .join(format!(".mysql-{host}-{port}-{database}.created"))
    }

    /// Directory holding checksum records and pending markers.
    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join("migrations")
    }

    /// Checksum record for a logical name.
    pub fn checksum_file(&self, name: &str) -> PathBuf {
        self.migrations_dir().join(format!("{name}.sha256"))
    }

    /// Pending-migration marker for a logical name.
    pub fn pending_file(&self, name: &str) -> PathBuf {
        self.migrations_dir().join(format!("{name}.pending"))
    }

    /// Default backup artifact for a logical name.
    pub fn backup_file(&self, name: &str) -> PathBuf {
        self.root.join("backups").join(format!("{name}.sql"))
    }
}

/// Reject names that are unsafe as file names.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Derive a `MySQL` database name from a logical name.
pub fn database_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| StoreError::io(path, e))
}

/// Remove `path`, treating a missing file as success.
pub(crate) fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
