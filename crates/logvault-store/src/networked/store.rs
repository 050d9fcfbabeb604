use std::fmt;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use sqlx::{MySql, Transaction};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::backend::LogBackend;
use crate::clock::StoreClock;
use crate::config::{BackendKind, StoreConfig};
use crate::entry::{AddOptions, LogEntry, NewLog, Page, decode_data, encode_data, merge_data};
use crate::errors::{Result, StoreError};
use crate::paths::{StorePaths, validate_name};

use super::pool::{NetworkedPool, PoolSettings, SqlRow};

const TABLE: &str = "logs";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS logs (
    id VARCHAR(255) PRIMARY KEY,
    data TEXT,
    message TEXT,
    timestamp VARCHAR(40)
)";

const SELECT_DATA_FOR_UPDATE: &str = "SELECT data FROM logs WHERE id = ? FOR UPDATE";

const REPLACE_LOG: &str =
    "REPLACE INTO logs (id, data, message, timestamp) VALUES (?, ?, ?, ?)";

const SELECT_LOG: &str = "SELECT id, data, message, timestamp FROM logs WHERE id = ?";

const SELECT_LOGS_PAGE: &str =
    "SELECT id, data, message, timestamp FROM logs ORDER BY id LIMIT ? OFFSET ?";

const DELETE_LOG: &str = "DELETE FROM logs WHERE id = ?";

const PROCESS_LIST: &str = "SELECT * FROM information_schema.PROCESSLIST";

type LogRow = (String, Option<String>, Option<String>, Option<String>);

fn into_entry((id, data, message, timestamp): LogRow) -> Result<LogEntry> {
    Ok(LogEntry {
        data: decode_data(data.as_deref(), TABLE)?,
        id,
        message: message.unwrap_or_default(),
        timestamp: timestamp.unwrap_or_default(),
    })
}

/// Read-merge-write of one entry inside an open transaction.
async fn write_entry(
    tx: &mut Transaction<'static, MySql>,
    log: NewLog,
    update: bool,
    timestamp: String,
) -> Result<LogEntry> {
    let data = if update {
        let existing: Option<Option<String>> = sqlx::query_scalar(SELECT_DATA_FOR_UPDATE)
            .bind(log.id.clone())
            .fetch_optional(&mut **tx)
            .await?;
        match existing {
            Some(raw) => merge_data(decode_data(raw.as_deref(), TABLE)?, log.data),
            None => log.data,
        }
    } else {
        log.data
    };

    let _ = sqlx::query(REPLACE_LOG)
        .bind(log.id.clone())
        .bind(encode_data(&data)?)
        .bind(log.message.clone())
        .bind(timestamp.clone())
        .execute(&mut **tx)
        .await?;

    Ok(LogEntry {
        id: log.id,
        data,
        message: log.message,
        timestamp,
    })
}

/// `MySQL` log store over a [`NetworkedPool`].
///
/// Construction does no I/O. The pool and the `logs` table are set up on
/// the first operation, or eagerly through [`NetworkedStore::wait_ready`].
pub struct NetworkedStore {
    name: String,
    pool: NetworkedPool,
    ready: OnceCell<()>,
    clock: StoreClock,
}

impl NetworkedStore {
    /// Build an unconnected store for `name`.
    pub fn new(name: &str, config: &StoreConfig, paths: &StorePaths) -> Result<Self> {
        validate_name(name)?;
        let clock = StoreClock::from_config(config.timezone.as_deref())?;
        let settings = PoolSettings::from_config(name, config);
        Ok(Self {
            name: name.to_string(),
            pool: NetworkedPool::new(settings, paths),
            ready: OnceCell::new(),
            clock,
        })
    }

    /// Build a store and wait until it can serve requests.
    pub async fn connect(name: &str, config: &StoreConfig, paths: &StorePaths) -> Result<Self> {
        let store = Self::new(name, config, paths)?;
        store.wait_ready().await?;
        Ok(store)
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target database name.
    pub fn database(&self) -> &str {
        self.pool.database()
    }

    /// Open the pool and create the `logs` table. Runs once.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn wait_ready(&self) -> Result<()> {
        self.ensure_open()?;
        let _ = self
            .ready
            .get_or_try_init(|| async {
                self.pool.initialize().await?;
                let _ = self.pool.execute(CREATE_TABLE, &[]).await?;
                info!(database = %self.pool.database(), "networked store ready");
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Run arbitrary SQL with positional parameters.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>> {
        self.wait_ready().await?;
        self.pool.query(sql, params).await
    }

    /// Server connection list.
    pub async fn show_process_list(&self) -> Result<Vec<SqlRow>> {
        self.query(PROCESS_LIST, &[]).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(StoreError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedStore")
            .field("name", &self.name)
            .field("database", &self.pool.database())
            .field("closed", &self.pool.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogBackend for NetworkedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    #[instrument(skip(self, log), fields(name = %self.name, id = %log.id, update = options.update))]
    async fn add_log(&self, log: NewLog, options: AddOptions) -> Result<LogEntry> {
        self.wait_ready().await?;
        let timestamp = log.timestamp.clone().unwrap_or_else(|| self.clock.now());
        let update = options.update;
        let pool = self.pool.handle().await?;

        let write = async move {
            let mut tx = pool.begin().await?;
            match write_entry(&mut tx, log, update, timestamp).await {
                Ok(entry) => {
                    tx.commit().await?;
                    Ok(entry)
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "transaction rollback failed");
                    }
                    Err(e)
                }
            }
        };

        let entry = self
            .pool
            .with_query_timeout(options.timeout, write.boxed())
            .await?;
        debug!("log written");
        Ok(entry)
    }

    async fn get_log_by_id(&self, id: &str) -> Result<Option<LogEntry>> {
        self.wait_ready().await?;
        let pool = self.pool.handle().await?;
        let id = id.to_string();
        let fetch = async move {
            Ok::<_, StoreError>(
                sqlx::query_as::<_, LogRow>(SELECT_LOG)
                    .bind(id)
                    .fetch_optional(&pool)
                    .await?,
            )
        };
        let row = self.pool.with_query_timeout(None, fetch.boxed()).await?;
        row.map(into_entry).transpose()
    }

    async fn get_logs(&self, page: Page) -> Result<Vec<LogEntry>> {
        self.wait_ready().await?;
        let pool = self.pool.handle().await?;
        let limit = page.limit.map_or(u64::MAX, u64::from);
        let offset = u64::from(page.offset.unwrap_or(0));
        let fetch = async move {
            Ok::<_, StoreError>(
                sqlx::query_as::<_, LogRow>(SELECT_LOGS_PAGE)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await?,
            )
        };
        let rows = self.pool.with_query_timeout(None, fetch.boxed()).await?;
        rows.into_iter().map(into_entry).collect()
    }

    async fn remove_log(&self, id: &str) -> Result<bool> {
        self.wait_ready().await?;
        let result = self
            .pool
            .execute(DELETE_LOG, &[Value::String(id.to_string())])
            .await?;
        Ok(result.affected_rows > 0)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
