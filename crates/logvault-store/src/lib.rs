//! # logvault-store
//!
//! Local-first key-value log store. Each logical store lives either in a
//! single `SQLite` file or in a `MySQL` database, chosen once per
//! [`LogFacade`]. Entries written while `MySQL` was unreachable are promoted
//! on close by a checksum-gated, additive [`MigrationGate`] run.
//!
//! - [`LogFacade`]: lazy backend selection, fallback, close-time migration
//! - [`EmbeddedStore`]: `SQLite` file in WAL mode with SQL-dump backups
//! - [`NetworkedStore`] / [`NetworkedPool`]: pooled `MySQL` over `sqlx`
//! - [`StoreConfig`]: layered configuration (defaults, JSON file, env)

#![deny(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod embedded;
pub mod entry;
pub mod errors;
pub mod facade;
pub mod migration;
pub mod networked;
pub mod paths;

pub use backend::{Backend, LogBackend};
pub use clock::StoreClock;
pub use config::{BackendKind, StoreConfig};
pub use embedded::EmbeddedStore;
pub use entry::{AddOptions, LogEntry, NewLog, Page, filter_logs, merge_data};
pub use errors::{Result, StoreError};
pub use facade::LogFacade;
pub use migration::{MigrationGate, MigrationOutcome};
pub use networked::{ExecResult, NetworkedPool, NetworkedStore, PoolSettings, SqlRow};
pub use paths::StorePaths;
