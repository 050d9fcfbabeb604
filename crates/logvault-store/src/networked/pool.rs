use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPoolOptions, MySqlRow,
};
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, MySqlConnection, MySqlPool, Row, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::paths::{self, StorePaths, database_name};

/// `ER_BAD_DB_ERROR`: the selected database does not exist.
const UNKNOWN_DATABASE: u16 = 1049;

/// A result row keyed by column name.
pub type SqlRow = Map<String, Value>;

/// Outcome of a write statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows changed by the statement.
    pub affected_rows: u64,
    /// Generated `AUTO_INCREMENT` id, if any.
    pub insert_id: Option<u64>,
}

/// Connection settings for a [`NetworkedPool`].
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Logical store name, used in errors.
    pub name: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: SecretString,
    /// Target database.
    pub database: String,
    /// Maximum pooled connections.
    pub connection_limit: u32,
    /// Deadline for establishing connections.
    pub connect_timeout: Duration,
    /// Default deadline for queries.
    pub query_timeout: Option<Duration>,
}

impl PoolSettings {
    /// Settings for the logical store `name`.
    pub fn from_config(name: &str, config: &StoreConfig) -> Self {
        Self {
            name: name.to_string(),
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config
                .database
                .clone()
                .unwrap_or_else(|| database_name(name)),
            connection_limit: config.connection_limit.max(1),
            connect_timeout: config.connect_timeout(),
            query_timeout: config.query_timeout(),
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
    }
}

#[derive(Debug)]
enum PoolState {
    Idle,
    Open(MySqlPool),
    Closed,
}

/// Bounded `MySQL` connection pool with lazy database provisioning.
///
/// INVARIANT: the pool is opened at most once. `close` is terminal.
#[derive(Debug)]
pub struct NetworkedPool {
    settings: PoolSettings,
    marker: PathBuf,
    state: Mutex<PoolState>,
    closed: AtomicBool,
}

impl NetworkedPool {
    /// Create an unopened pool. No I/O happens until [`NetworkedPool::initialize`].
    pub fn new(settings: PoolSettings, paths: &StorePaths) -> Self {
        let marker = paths.mysql_marker(&settings.host, settings.port, &settings.database);
        Self {
            settings,
            marker,
            state: Mutex::new(PoolState::Idle),
            closed: AtomicBool::new(false),
        }
    }

    /// Target database name.
    pub fn database(&self) -> &str {
        &self.settings.database
    }

    /// Marker file recording that this server already has the database.
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Open the pool, creating the database first if no marker says it exists.
    ///
    /// A marker left behind for a database the server no longer has is
    /// discarded and provisioning runs once more. Idempotent while the pool
    /// is open.
    #[instrument(skip(self), fields(database = %self.settings.database))]
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            PoolState::Open(_) => return Ok(()),
            PoolState::Closed => return Err(self.closed_error()),
            PoolState::Idle => {}
        }

        let provisioned = self.marker.exists();
        if !provisioned {
            self.create_database().await?;
        }

        let pool = match self.open_pool().await {
            Err(e) if provisioned && is_unknown_database(&e) => {
                warn!(marker = %self.marker.display(), "stale database marker, provisioning again");
                paths::remove_file(&self.marker)?;
                self.create_database().await?;
                self.open_pool().await?
            }
            opened => opened?,
        };

        *state = PoolState::Open(pool);
        info!(
            host = %self.settings.host,
            port = self.settings.port,
            max_connections = self.settings.connection_limit,
            "mysql pool opened"
        );
        Ok(())
    }

    async fn open_pool(&self) -> Result<MySqlPool> {
        let options = self
            .settings
            .connect_options()
            .database(&self.settings.database);
        let opening = MySqlPoolOptions::new()
            .max_connections(self.settings.connection_limit)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(options)
            .boxed();
        self.with_connect_timeout(opening).await
    }

    async fn create_database(&self) -> Result<()> {
        let options = self.settings.connect_options();
        let mut admin = self
            .with_connect_timeout(MySqlConnection::connect_with(&options))
            .await?;

        let sql = format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_ident(&self.settings.database)
        );
        let created = sqlx::Executor::execute(&mut admin, sqlx::raw_sql(&sql)).await;
        if let Err(e) = admin.close().await {
            debug!(error = %e, "admin connection close failed");
        }
        let _ = created?;

        if let Err(e) = paths::write_file(&self.marker, "") {
            warn!(error = %e, "failed to write database marker");
        }
        info!(database = %self.settings.database, "database provisioned");
        Ok(())
    }

    /// The open pool handle, initializing on first use.
    pub(crate) async fn handle(&self) -> Result<MySqlPool> {
        self.initialize().await?;
        match &*self.state.lock().await {
            PoolState::Open(pool) => Ok(pool.clone()),
            PoolState::Idle | PoolState::Closed => Err(self.closed_error()),
        }
    }

    /// Run a statement and return every row. No rows is an empty vector.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>> {
        let pool = self.handle().await?;
        let sql = sql.to_string();
        let params = params.to_vec();
        let fetch = async move {
            let rows = bind_all(sqlx::query(&sql), &params).fetch_all(&pool).await?;
            Ok::<Vec<SqlRow>, StoreError>(rows.iter().map(row_to_json).collect())
        };
        self.with_query_timeout(None, fetch.boxed()).await
    }

    /// Run a write statement.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let pool = self.handle().await?;
        let sql = sql.to_string();
        let params = params.to_vec();
        let run = async move {
            let result = bind_all(sqlx::query(&sql), &params).execute(&pool).await?;
            Ok::<_, StoreError>(ExecResult {
                affected_rows: result.rows_affected(),
                insert_id: Some(result.last_insert_id()).filter(|id| *id != 0),
            })
        };
        self.with_query_timeout(None, run.boxed()).await
    }

    /// Run `f` inside a transaction on one pooled connection.
    ///
    /// Commits when `f` succeeds, rolls back and returns the error when it
    /// fails. The connection goes back to the pool on every path, including
    /// when the returned future is dropped early.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Transaction<'static, MySql>) -> BoxFuture<'c, Result<T>> + Send,
    {
        let pool = self.handle().await?;
        let mut tx = pool.begin().await?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Close the pool. Later calls are no-ops.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        if let PoolState::Open(pool) = std::mem::replace(&mut *state, PoolState::Closed) {
            pool.close().await;
            info!(database = %self.settings.database, "mysql pool closed");
        }
    }

    /// Whether [`NetworkedPool::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Await `fut` under `timeout`, falling back to the configured query timeout.
    pub(crate) async fn with_query_timeout<T>(
        &self,
        timeout: Option<Duration>,
        fut: BoxFuture<'_, Result<T>>,
    ) -> Result<T> {
        match timeout.or(self.settings.query_timeout) {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn with_connect_timeout<T>(
        &self,
        fut: BoxFuture<'_, Result<T, sqlx::Error>>,
    ) -> Result<T> {
        let limit = self.settings.connect_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
            .map_err(StoreError::from)
    }

    fn closed_error(&self) -> StoreError {
        StoreError::Closed {
            name: self.settings.name.clone(),
        }
    }
}

fn is_unknown_database(err: &StoreError) -> bool {
    let StoreError::MySql(sqlx::Error::Database(db)) = err else {
        return false;
    };
    db.try_downcast_ref::<MySqlDatabaseError>()
        .is_some_and(|e| e.number() == UNKNOWN_DATABASE)
}

/// Backtick-quote a `MySQL` identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_json(row: &MySqlRow) -> SqlRow {
    let mut map = Map::new();
    for column in row.columns() {
        let _ = map.insert(column.name().to_string(), decode_column(row, column.ordinal()));
    }
    map
}

/// Decode a column into the closest JSON type. Unsupported types read as null.
fn decode_column(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(Value::Null, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(Value::Null, |bytes| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });
    }
    Value::Null
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use super::*;

    fn unreachable_settings() -> PoolSettings {
        let config = StoreConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout: 2_000,
            ..StoreConfig::default()
        };
        PoolSettings::from_config("unreachable", &config)
    }

    #[test]
    fn settings_derive_database_from_name() {
        let settings = PoolSettings::from_config("kis-2024", &StoreConfig::default());
        assert_eq!(settings.name, "kis-2024");
        assert_eq!(settings.database, "kis_2024");
        assert_eq!(settings.port, 3306);
        assert_eq!(settings.connection_limit, 5);
        assert_eq!(settings.connect_timeout, Duration::from_secs(60));
    }

    #[test]
    fn explicit_database_wins() {
        let config = StoreConfig {
            database: Some("shared".into()),
            ..StoreConfig::default()
        };
        assert_eq!(PoolSettings::from_config("x", &config).database, "shared");
    }

    #[test]
    fn settings_debug_hides_password() {
        let config = StoreConfig {
            password: SecretString::from("hunter2"),
            ..StoreConfig::default()
        };
        let settings = PoolSettings::from_config("x", &config);
        assert!(!format!("{settings:?}").contains("hunter2"));
        assert_eq!(settings.password.expose_secret(), "hunter2");
    }

    #[test]
    fn marker_is_keyed_by_server() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::new(dir.path());
        let on = |host: &str, port: u16| {
            let config = StoreConfig {
                host: host.into(),
                port,
                ..StoreConfig::default()
            };
            NetworkedPool::new(PoolSettings::from_config("kis", &config), &paths)
                .marker()
                .to_path_buf()
        };

        let primary = on("db-a", 3306);
        assert_ne!(primary, on("db-b", 3306));
        assert_ne!(primary, on("db-a", 3307));
        assert_eq!(primary, on("db-a", 3306));
        assert_eq!(primary, paths.mysql_marker("db-a", 3306, "kis"));
    }

    #[test]
    fn only_unknown_database_triggers_reprovisioning() {
        assert!(!is_unknown_database(&StoreError::Timeout(Duration::from_secs(1))));
        assert!(!is_unknown_database(&StoreError::MySql(sqlx::Error::PoolTimedOut)));
    }

    #[test]
    fn quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("logs"), "`logs`");
        assert_eq!(quote_ident("a`b"), "`a``b`");
    }

    #[tokio::test]
    async fn initialize_against_unreachable_host_fails() {
        let dir = TempDir::new().unwrap();
        let pool = NetworkedPool::new(unreachable_settings(), &StorePaths::new(dir.path()));
        assert!(pool.initialize().await.is_err());
        assert!(!pool.is_closed());
        assert!(!pool.marker().exists());
    }

    #[tokio::test]
    async fn close_is_terminal_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = NetworkedPool::new(unreachable_settings(), &StorePaths::new(dir.path()));
        pool.close().await;
        pool.close().await;
        assert!(pool.is_closed());
        assert_matches!(
            pool.initialize().await,
            Err(StoreError::Closed { name }) if name == "unreachable"
        );
        assert_matches!(pool.query("SELECT 1", &[]).await, Err(StoreError::Closed { .. }));
    }

    #[tokio::test]
    async fn closed_error_names_the_logical_store() {
        let dir = TempDir::new().unwrap();
        let pool = NetworkedPool::new(
            PoolSettings::from_config("kis-2024", &StoreConfig::default()),
            &StorePaths::new(dir.path()),
        );
        assert_eq!(pool.database(), "kis_2024");
        pool.close().await;
        let err = pool.execute("SELECT 1", &[]).await.unwrap_err();
        assert_matches!(err, StoreError::Closed { ref name } if name == "kis-2024");
        assert!(err.to_string().contains("kis-2024"));
    }

    #[tokio::test]
    async fn query_timeout_maps_to_timeout_error() {
        let dir = TempDir::new().unwrap();
        let pool = NetworkedPool::new(unreachable_settings(), &StorePaths::new(dir.path()));
        let result: Result<()> = pool
            .with_query_timeout(
                Some(Duration::from_millis(10)),
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, StoreError>(())
                }
                .boxed(),
            )
            .await;
        assert_matches!(result, Err(StoreError::Timeout(d)) if d == Duration::from_millis(10));
    }
}
