use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::backend::LogBackend;
use crate::clock::StoreClock;
use crate::config::StoreConfig;
use crate::embedded::EmbeddedStore;
use crate::entry::{AddOptions, Page};
use crate::errors::Result;
use crate::networked::NetworkedStore;
use crate::paths::{self, StorePaths};

use super::checksum::{file_sha256, read_record, write_record};

/// Entries read from the embedded file per page.
pub const MIGRATION_PAGE_SIZE: u32 = 500;

/// What a gate run did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No embedded file exists for the name.
    NoSource,
    /// The file matches the last recorded checksum.
    Unchanged,
    /// The file was scanned and new ids were copied.
    Migrated {
        /// Entries written to the target.
        copied: u64,
        /// Entries whose id already existed in the target.
        skipped: u64,
    },
}

enum Check {
    Skip(MigrationOutcome),
    Changed(String),
}

/// One-shot, checksum-gated copy of an embedded store into a networked one.
pub struct MigrationGate {
    name: String,
    paths: StorePaths,
    clock: StoreClock,
}

impl MigrationGate {
    /// Gate for the logical `name` under `paths`.
    pub fn new(name: &str, paths: StorePaths, clock: StoreClock) -> Self {
        Self {
            name: name.to_string(),
            paths,
            clock,
        }
    }

    /// The embedded file this gate watches.
    pub fn source_path(&self) -> PathBuf {
        self.paths.database_file(&self.name)
    }

    /// Checksum of the embedded file after folding in its WAL, or `None`
    /// when there is no file.
    pub fn current_checksum(&self) -> Result<Option<String>> {
        let path = self.source_path();
        if !path.exists() {
            return Ok(None);
        }
        let source = EmbeddedStore::open_at(&self.name, &path, self.clock)?;
        let checkpointed = source.checkpoint();
        source_close(&source);
        checkpointed?;
        file_sha256(&path).map(Some)
    }

    /// Checksum recorded after the last successful run.
    pub fn recorded_checksum(&self) -> Result<Option<String>> {
        read_record(&self.paths.checksum_file(&self.name))
    }

    /// Record `checksum` as migrated.
    pub fn record_checksum(&self, checksum: &str) -> Result<()> {
        write_record(&self.paths.checksum_file(&self.name), checksum)
    }

    /// Whether an earlier run failed and is owed a retry.
    pub fn is_pending(&self) -> bool {
        self.paths.pending_file(&self.name).exists()
    }

    /// Remember that a run failed.
    pub fn mark_pending(&self) -> Result<()> {
        paths::write_file(&self.paths.pending_file(&self.name), "")
    }

    /// Forget a failed run.
    pub fn clear_pending(&self) -> Result<()> {
        paths::remove_file(&self.paths.pending_file(&self.name))
    }

    /// Run the gate against a fresh [`NetworkedStore`] built from `config`.
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn run(&self, config: &StoreConfig) -> Result<MigrationOutcome> {
        let checksum = match self.check()? {
            Check::Skip(outcome) => return Ok(outcome),
            Check::Changed(checksum) => checksum,
        };

        let target = NetworkedStore::connect(&self.name, config, &self.paths).await?;
        let copied = self.copy_into(&target).await;
        let closed = target.close().await;
        let (copied, skipped) = copied?;
        closed?;

        self.finish(&checksum, copied, skipped)
    }

    /// Run the gate against any target backend. The target is left open.
    #[instrument(skip_all, fields(name = %self.name, backend = %target.kind()))]
    pub async fn run_into(&self, target: &dyn LogBackend) -> Result<MigrationOutcome> {
        let checksum = match self.check()? {
            Check::Skip(outcome) => return Ok(outcome),
            Check::Changed(checksum) => checksum,
        };
        let (copied, skipped) = self.copy_into(target).await?;
        self.finish(&checksum, copied, skipped)
    }

    fn check(&self) -> Result<Check> {
        let Some(current) = self.current_checksum()? else {
            debug!("no embedded file, nothing to migrate");
            return Ok(Check::Skip(MigrationOutcome::NoSource));
        };
        if self.recorded_checksum()?.as_deref() == Some(current.as_str()) {
            debug!(checksum = %current, "embedded file unchanged since last migration");
            if self.is_pending() {
                self.clear_pending()?;
            }
            return Ok(Check::Skip(MigrationOutcome::Unchanged));
        }
        Ok(Check::Changed(current))
    }

    async fn copy_into(&self, target: &dyn LogBackend) -> Result<(u64, u64)> {
        let source = EmbeddedStore::open_at(&self.name, &self.source_path(), self.clock)?;
        let result = copy_entries(&source, target).await;
        source_close(&source);
        result
    }

    fn finish(&self, checksum: &str, copied: u64, skipped: u64) -> Result<MigrationOutcome> {
        self.record_checksum(checksum)?;
        self.clear_pending()?;
        info!(copied, skipped, checksum, "migration complete");
        Ok(MigrationOutcome::Migrated { copied, skipped })
    }
}

async fn copy_entries(source: &EmbeddedStore, target: &dyn LogBackend) -> Result<(u64, u64)> {
    let mut copied = 0u64;
    let mut skipped = 0u64;
    let mut offset = 0u32;

    loop {
        let page = source
            .get_logs(Page::new(MIGRATION_PAGE_SIZE, offset))
            .await?;
        let len = page.len();
        debug!(offset, len, "migrating page");

        for entry in page {
            if target.get_log_by_id(&entry.id).await?.is_some() {
                skipped += 1;
                continue;
            }
            let _ = target.add_log(entry.into(), AddOptions::replace()).await?;
            copied += 1;
        }

        if len < MIGRATION_PAGE_SIZE as usize {
            return Ok((copied, skipped));
        }
        offset += MIGRATION_PAGE_SIZE;
    }
}

fn source_close(source: &EmbeddedStore) {
    if let Err(e) = source.close_sync() {
        debug!(error = %e, "temporary embedded handle close failed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
