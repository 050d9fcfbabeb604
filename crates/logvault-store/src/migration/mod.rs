//! Checksum-gated promotion of embedded entries into `MySQL`.
//!
//! The gate hashes the embedded file and compares it with the hash recorded
//! after the last successful run. Only a changed file is scanned. The scan
//! itself is additive: ids already present in the target are never written.

mod checksum;
mod gate;

pub use checksum::{file_sha256, read_record, write_record};
pub use gate::{MIGRATION_PAGE_SIZE, MigrationGate, MigrationOutcome};
