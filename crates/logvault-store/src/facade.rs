//! Single entry point over one logical log store.
//!
//! ```text
//! uninitialized ──first call──▶ Embedded | Networked ──close()──▶ closed
//! ```
//!
//! The backend is chosen once. With no explicit `type` the facade tries
//! `MySQL` first and falls back to the embedded file on any failure.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, LogBackend};
use crate::clock::StoreClock;
use crate::config::{BackendKind, StoreConfig};
use crate::embedded::EmbeddedStore;
use crate::entry::{AddOptions, LogEntry, NewLog, Page, filter_logs};
use crate::errors::{Result, StoreError};
use crate::migration::{MigrationGate, MigrationOutcome};
use crate::networked::{NetworkedStore, SqlRow};
use crate::paths::{StorePaths, validate_name};

/// Lazily initialised log store with backend fallback and close-time
/// migration.
pub struct LogFacade {
    name: String,
    config: StoreConfig,
    paths: StorePaths,
    clock: StoreClock,
    backend: OnceCell<Backend>,
    closed: AtomicBool,
    gate: MigrationGate,
    migration_target: Option<Arc<dyn LogBackend>>,
}

impl LogFacade {
    /// Create a facade for `name`. No backend is opened yet.
    pub fn new(name: &str, config: StoreConfig) -> Result<Self> {
        validate_name(name)?;
        let clock = StoreClock::from_config(config.timezone.as_deref())?;
        let paths = StorePaths::new(config.data_dir());
        let gate = MigrationGate::new(name, paths.clone(), clock);
        Ok(Self {
            name: name.to_string(),
            config,
            paths,
            clock,
            backend: OnceCell::new(),
            closed: AtomicBool::new(false),
            gate,
            migration_target: None,
        })
    }

    /// Promote embedded entries into `target` instead of a `MySQL` store
    /// built from the config.
    #[must_use]
    pub fn with_migration_target(mut self, target: Arc<dyn LogBackend>) -> Self {
        self.migration_target = Some(target);
        self
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// On-disk layout for this facade's data directory.
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// The active backend, once initialised.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.get().map(LogBackend::kind)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Choose and open the backend. Later calls return the same backend.
    pub async fn initialize(&self) -> Result<&Backend> {
        if self.is_closed() {
            return Err(StoreError::Closed {
                name: self.name.clone(),
            });
        }
        self.backend
            .get_or_try_init(|| self.build())
            .await
            .map_err(|e| e.in_store(&self.name))
    }

    #[instrument(skip(self), fields(name = %self.name, requested = ?self.config.backend))]
    async fn build(&self) -> Result<Backend> {
        let backend = match self.config.backend {
            Some(BackendKind::Sqlite) => self.open_embedded()?,
            Some(BackendKind::Mysql) => self.open_networked().await?,
            None => match self.open_networked().await {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(error = %e, "mysql unavailable, falling back to sqlite");
                    self.open_embedded()?
                }
            },
        };
        info!(backend = %backend.kind(), "log store initialized");
        Ok(backend)
    }

    fn open_embedded(&self) -> Result<Backend> {
        EmbeddedStore::open(&self.name, &self.paths, self.clock).map(Backend::Embedded)
    }

    async fn open_networked(&self) -> Result<Backend> {
        NetworkedStore::connect(&self.name, &self.config, &self.paths)
            .await
            .map(Backend::Networked)
    }

    fn wrap<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| e.in_store(&self.name))
    }

    /// Upsert an entry.
    pub async fn add_log(&self, log: NewLog, options: AddOptions) -> Result<LogEntry> {
        let backend = self.initialize().await?;
        self.wrap(backend.add_log(log, options).await)
    }

    /// Fetch one entry.
    pub async fn get_log_by_id(&self, id: &str) -> Result<Option<LogEntry>> {
        let backend = self.initialize().await?;
        self.wrap(backend.get_log_by_id(id).await)
    }

    /// Entries in store order.
    pub async fn get_logs(&self, page: Page) -> Result<Vec<LogEntry>> {
        let backend = self.initialize().await?;
        self.wrap(backend.get_logs(page).await)
    }

    /// Entries in store order for which `predicate` resolves true.
    ///
    /// Pagination applies before filtering.
    pub async fn get_logs_where<F, Fut>(&self, page: Page, predicate: F) -> Result<Vec<LogEntry>>
    where
        F: FnMut(&LogEntry) -> Fut,
        Fut: Future<Output = bool>,
    {
        let entries = self.get_logs(page).await?;
        Ok(filter_logs(entries, predicate).await)
    }

    /// Delete an entry. True iff it existed.
    pub async fn remove_log(&self, id: &str) -> Result<bool> {
        let backend = self.initialize().await?;
        self.wrap(backend.remove_log(id).await)
    }

    /// Run raw SQL. `MySQL` only.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>> {
        match self.initialize().await? {
            Backend::Networked(store) => self.wrap(store.query(sql, params).await),
            Backend::Embedded(_) => Err(self.unsupported("query")),
        }
    }

    /// Server connection list. `MySQL` only.
    pub async fn show_process_list(&self) -> Result<Vec<SqlRow>> {
        match self.initialize().await? {
            Backend::Networked(store) => self.wrap(store.show_process_list().await),
            Backend::Embedded(_) => Err(self.unsupported("show_process_list")),
        }
    }

    /// Wait until the backend can serve requests.
    pub async fn wait_ready(&self) -> Result<()> {
        match self.initialize().await? {
            Backend::Networked(store) => self.wrap(store.wait_ready().await),
            Backend::Embedded(_) => Ok(()),
        }
    }

    /// Write a SQL dump of the embedded file. Returns the path written.
    pub async fn backup(&self, dest: Option<&Path>) -> Result<PathBuf> {
        match self.initialize().await? {
            Backend::Embedded(store) => {
                let dest = dest.map_or_else(|| self.paths.backup_file(&self.name), Path::to_path_buf);
                self.wrap(store.backup(&dest))?;
                Ok(dest)
            }
            Backend::Networked(_) => Err(self.unsupported("backup")),
        }
    }

    /// Run the migration gate now.
    pub async fn migrate_now(&self) -> Result<MigrationOutcome> {
        self.wrap(self.run_gate().await)
    }

    async fn run_gate(&self) -> Result<MigrationOutcome> {
        match &self.migration_target {
            Some(target) => self.gate.run_into(target.as_ref()).await,
            None => self.gate.run(&self.config).await,
        }
    }

    /// Close the store, migrating embedded entries first when configured.
    ///
    /// Migration failures are logged and leave a pending marker. They never
    /// fail the close. Idempotent.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let backend = self.backend.get();
        let was_embedded = matches!(backend, Some(Backend::Embedded(_)));
        if self.config.migrate_on_close && (was_embedded || self.gate.is_pending()) {
            self.migrate_on_close().await;
        }

        if let Some(backend) = backend {
            self.wrap(backend.close().await)?;
        }
        info!("log store closed");
        Ok(())
    }

    /// Back up the embedded file, then close.
    ///
    /// Backup failures are logged only.
    pub async fn shutdown(&self) -> Result<()> {
        if let (false, Some(Backend::Embedded(store))) = (self.is_closed(), self.backend.get()) {
            let dest = self.paths.backup_file(&self.name);
            if let Err(e) = store.backup(&dest) {
                warn!(name = %self.name, error = %e, "exit backup failed");
            }
        }
        self.close().await
    }

    async fn migrate_on_close(&self) {
        match self.run_gate().await {
            Ok(outcome) => debug!(?outcome, "close-time migration finished"),
            Err(e) => {
                warn!(error = %e, "migration failed, retrying on next close");
                if let Err(mark) = self.gate.mark_pending() {
                    warn!(error = %mark, "failed to record pending migration");
                }
            }
        }
    }

    fn unsupported(&self, operation: &'static str) -> StoreError {
        StoreError::Unsupported {
            operation,
            backend: BackendKind::Sqlite,
        }
        .in_store(&self.name)
    }
}

impl fmt::Debug for LogFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFacade")
            .field("name", &self.name)
            .field("backend", &self.backend_kind())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
