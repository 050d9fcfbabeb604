use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::backend::LogBackend;
use crate::clock::StoreClock;
use crate::config::BackendKind;
use crate::entry::{AddOptions, LogEntry, NewLog, Page, decode_data, encode_data, merge_data};
use crate::errors::{Result, StoreError};
use crate::paths::{StorePaths, validate_name};

use super::{backup, schema};

const TABLE: &str = "logs";

/// Single-file `SQLite` log store.
///
/// Calls are synchronous under the async interface; a call never yields
/// mid-operation. The connection is dropped on `close`, after which every
/// operation fails with [`StoreError::Closed`].
pub struct EmbeddedStore {
    name: String,
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    clock: StoreClock,
}

/// Columns as read, before JSON decoding.
struct RawRow {
    id: String,
    data: Option<String>,
    message: Option<String>,
    timestamp: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
            message: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }

    fn into_entry(self) -> Result<LogEntry> {
        Ok(LogEntry {
            data: decode_data(self.data.as_deref(), TABLE)?,
            id: self.id,
            message: self.message.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_default(),
        })
    }
}

impl EmbeddedStore {
    /// Open the store for `name` at its deterministic path under `paths`.
    pub fn open(name: &str, paths: &StorePaths, clock: StoreClock) -> Result<Self> {
        validate_name(name)?;
        Self::open_at(name, &paths.database_file(name), clock)
    }

    /// Open or create a store file at an explicit path.
    pub fn open_at(name: &str, path: &Path, clock: StoreClock) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let open_err = |source: rusqlite::Error| StoreError::Open {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open(path).map_err(open_err)?;
        conn.execute_batch(schema::PRAGMAS).map_err(open_err)?;
        conn.execute_batch(schema::CREATE_TABLES).map_err(open_err)?;

        info!(name, path = %path.display(), "embedded store opened");

        Ok(Self {
            name: name.to_string(),
            path: path.to_owned(),
            conn: Mutex::new(Some(conn)),
            clock,
        })
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a closure with the open connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or_else(|| StoreError::Closed {
            name: self.name.clone(),
        })?;
        f(conn)
    }

    fn add_log_sync(&self, log: NewLog, options: AddOptions) -> Result<LogEntry> {
        let timestamp = log.timestamp.unwrap_or_else(|| self.clock.now());

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let data = if options.update {
                let existing: Option<Option<String>> = tx
                    .query_row(schema::SELECT_DATA, [&log.id], |row| row.get(0))
                    .optional()?;
                match existing {
                    Some(raw) => merge_data(decode_data(raw.as_deref(), TABLE)?, log.data),
                    None => log.data,
                }
            } else {
                log.data
            };

            let encoded = encode_data(&data)?;
            let _ = tx.execute(
                schema::UPSERT_LOG,
                params![log.id, encoded, log.message, timestamp],
            )?;
            tx.commit()?;

            debug!(id = %log.id, "log written");

            Ok(LogEntry {
                id: log.id,
                data,
                message: log.message,
                timestamp,
            })
        })
    }

    fn get_log_by_id_sync(&self, id: &str) -> Result<Option<LogEntry>> {
        let raw = self.with_conn(|conn| {
            Ok(conn
                .query_row(schema::SELECT_LOG, [id], RawRow::read)
                .optional()?)
        })?;
        raw.map(RawRow::into_entry).transpose()
    }

    fn get_logs_sync(&self, page: Page) -> Result<Vec<LogEntry>> {
        let limit = page.limit.map_or(-1, i64::from);
        let offset = i64::from(page.offset.unwrap_or(0));

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(schema::SELECT_LOGS_PAGE)?;
            let rows = stmt
                .query_map(params![limit, offset], RawRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(RawRow::into_entry).collect()
    }

    fn remove_log_sync(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(schema::DELETE_LOG, [id])?;
            Ok(rows > 0)
        })
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
    }

    /// Fold the WAL into the main file so the file alone holds every commit.
    pub fn checkpoint(&self) -> Result<()> {
        self.with_conn(|conn| {
            let busy: i64 =
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
            if busy != 0 {
                debug!(name = %self.name, "wal checkpoint could not complete");
            }
            Ok(())
        })
    }

    /// Write a replayable SQL dump of the whole file to `dest`.
    #[instrument(skip(self), fields(name = %self.name))]
    pub fn backup(&self, dest: &Path) -> Result<()> {
        let dump = self.with_conn(|conn| backup::dump(conn))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        std::fs::write(dest, dump).map_err(|e| StoreError::io(dest, e))?;
        info!(dest = %dest.display(), "backup written");
        Ok(())
    }

    /// Replay a dump produced by [`EmbeddedStore::backup`].
    ///
    /// Existing tables and rows are left as they are.
    #[instrument(skip(self), fields(name = %self.name))]
    pub fn restore(&self, src: &Path) -> Result<()> {
        let sql = std::fs::read_to_string(src).map_err(|e| StoreError::io(src, e))?;
        self.with_conn(|conn| Ok(conn.execute_batch(&sql)?))?;
        info!(src = %src.display(), "backup restored");
        Ok(())
    }

    pub(crate) fn close_sync(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            info!(name = %self.name, "embedded store closed");
        }
        Ok(())
    }
}

impl fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.conn.lock().is_none())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogBackend for EmbeddedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn add_log(&self, log: NewLog, options: AddOptions) -> Result<LogEntry> {
        self.add_log_sync(log, options)
    }

    async fn get_log_by_id(&self, id: &str) -> Result<Option<LogEntry>> {
        self.get_log_by_id_sync(id)
    }

    async fn get_logs(&self, page: Page) -> Result<Vec<LogEntry>> {
        self.get_logs_sync(page)
    }

    async fn remove_log(&self, id: &str) -> Result<bool> {
        self.remove_log_sync(id)
    }

    async fn close(&self) -> Result<()> {
        self.close_sync()
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
