//! The log-store interface and the closed set of backends.

use async_trait::async_trait;

use crate::config::BackendKind;
use crate::embedded::EmbeddedStore;
use crate::entry::{AddOptions, LogEntry, NewLog, Page};
use crate::errors::Result;
use crate::networked::NetworkedStore;

/// Operations every backend provides.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Upsert an entry by id and return what was stored.
    async fn add_log(&self, log: NewLog, options: AddOptions) -> Result<LogEntry>;

    /// Fetch one entry, `None` if absent.
    async fn get_log_by_id(&self, id: &str) -> Result<Option<LogEntry>>;

    /// Entries in store order, paginated.
    async fn get_logs(&self, page: Page) -> Result<Vec<LogEntry>>;

    /// Delete an entry. True iff a row existed.
    async fn remove_log(&self, id: &str) -> Result<bool>;

    /// Release the underlying handle. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether `close` has run.
    fn is_closed(&self) -> bool;
}

/// The backend a facade holds for its lifetime.
pub enum Backend {
    /// Embedded `SQLite`.
    Embedded(EmbeddedStore),
    /// Networked `MySQL`.
    Networked(NetworkedStore),
}

impl Backend {
    fn inner(&self) -> &dyn LogBackend {
        match self {
            Self::Embedded(store) => store,
            Self::Networked(store) => store,
        }
    }
}

#[async_trait]
impl LogBackend for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    async fn add_log(&self, log: NewLog, options: AddOptions) -> Result<LogEntry> {
        self.inner().add_log(log, options).await
    }

    async fn get_log_by_id(&self, id: &str) -> Result<Option<LogEntry>> {
        self.inner().get_log_by_id(id).await
    }

    async fn get_logs(&self, page: Page) -> Result<Vec<LogEntry>> {
        self.inner().get_logs(page).await
    }

    async fn remove_log(&self, id: &str) -> Result<bool> {
        self.inner().remove_log(id).await
    }

    async fn close(&self) -> Result<()> {
        self.inner().close().await
    }

    fn is_closed(&self) -> bool {
        self.inner().is_closed()
    }
}
