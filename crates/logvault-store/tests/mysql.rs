//! Live `MySQL` tests.
//!
//! Skipped unless `LOGVAULT_TEST_MYSQL_HOST` is set. `LOGVAULT_TEST_MYSQL_PORT`,
//! `LOGVAULT_TEST_MYSQL_USER` and `LOGVAULT_TEST_MYSQL_PASSWORD` are optional.

use std::sync::atomic::{AtomicU32, Ordering};

use logvault_store::{
    AddOptions, BackendKind, EmbeddedStore, LogBackend, LogFacade, MigrationGate,
    MigrationOutcome, NetworkedStore, NewLog, Page, StoreClock, StoreConfig, StoreError,
    StorePaths,
};
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn mysql_config(dir: &TempDir) -> Option<StoreConfig> {
    let host = std::env::var("LOGVAULT_TEST_MYSQL_HOST").ok()?;
    let env = |key: &str| std::env::var(key).ok();
    Some(StoreConfig {
        backend: Some(BackendKind::Mysql),
        host,
        port: env("LOGVAULT_TEST_MYSQL_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env("LOGVAULT_TEST_MYSQL_USER").unwrap_or_else(|| "root".into()),
        password: SecretString::from(env("LOGVAULT_TEST_MYSQL_PASSWORD").unwrap_or_default()),
        connect_timeout: 10_000,
        data_dir: Some(dir.path().to_path_buf()),
        ..StoreConfig::default()
    })
}

/// A logical name unique to this test run.
fn unique_name(prefix: &str) -> String {
    format!(
        "lvtest_{prefix}_{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

async fn drop_database(store: &NetworkedStore) {
    let sql = format!("DROP DATABASE IF EXISTS `{}`", store.database());
    let _ = store.query(&sql, &[]).await;
}

#[tokio::test]
async fn update_merges_data() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("merge");
    let store = NetworkedStore::connect(&name, &config, &StorePaths::new(dir.path()))
        .await
        .unwrap();

    let _ = store
        .add_log(NewLog::new("1", json!({"a": 1})), AddOptions::default())
        .await
        .unwrap();
    let _ = store
        .add_log(NewLog::new("1", json!({"b": 2})), AddOptions::default())
        .await
        .unwrap();
    let entry = store.get_log_by_id("1").await.unwrap().unwrap();
    assert_eq!(entry.data, json!({"a": 1, "b": 2}));

    let _ = store
        .add_log(NewLog::new("1", json!({"c": 3})), AddOptions::replace())
        .await
        .unwrap();
    let entry = store.get_log_by_id("1").await.unwrap().unwrap();
    assert_eq!(entry.data, json!({"c": 3}));

    drop_database(&store).await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn round_trip_pagination_and_remove() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("crud");
    let store = NetworkedStore::connect(&name, &config, &StorePaths::new(dir.path()))
        .await
        .unwrap();

    for id in ["A", "B", "C", "D"] {
        let _ = store
            .add_log(
                NewLog::new(id, json!({"id": id}))
                    .with_message("seeded")
                    .with_timestamp("2024-06-01T09:00:00+07:00"),
                AddOptions::default(),
            )
            .await
            .unwrap();
    }

    let b = store.get_log_by_id("B").await.unwrap().unwrap();
    assert_eq!(b.data, json!({"id": "B"}));
    assert_eq!(b.message, "seeded");
    assert_eq!(b.timestamp, "2024-06-01T09:00:00+07:00");

    let ids: Vec<_> = store
        .get_logs(Page::new(2, 1))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, ["B", "C"]);

    assert!(store.remove_log("A").await.unwrap());
    assert!(!store.remove_log("A").await.unwrap());
    assert!(store.get_log_by_id("A").await.unwrap().is_none());

    let processes = store.show_process_list().await.unwrap();
    assert!(!processes.is_empty());

    drop_database(&store).await;
    store.close().await.unwrap();
    assert!(store.is_closed());
}

#[tokio::test]
async fn failed_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("tx");
    let paths = StorePaths::new(dir.path());
    let store = NetworkedStore::connect(&name, &config, &paths).await.unwrap();
    let pool = logvault_store::NetworkedPool::new(
        logvault_store::PoolSettings::from_config(&name, &config),
        &paths,
    );

    let result: logvault_store::Result<()> = pool
        .transaction(|tx| {
            Box::pin(async move {
                let _ = sqlx::query("INSERT INTO logs (id, data, message, timestamp) VALUES ('t', NULL, '', '')")
                    .execute(&mut **tx)
                    .await?;
                Err(StoreError::Config("abort".into()))
            })
        })
        .await;
    assert!(result.is_err());
    assert!(store.get_log_by_id("t").await.unwrap().is_none());

    let rows = pool
        .query("SELECT COUNT(*) AS n FROM logs WHERE id = ?", &[json!("t")])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], json!(0));

    pool.close().await;
    drop_database(&store).await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn migration_is_additive_and_gated() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("migrate");
    let paths = StorePaths::new(dir.path());

    let target = NetworkedStore::connect(&name, &config, &paths).await.unwrap();
    let _ = target
        .add_log(NewLog::new("X", json!({"origin": "mysql"})), AddOptions::default())
        .await
        .unwrap();

    let source = EmbeddedStore::open(&name, &paths, StoreClock::Local).unwrap();
    for (id, data) in [("X", json!({"origin": "sqlite"})), ("Y", json!({"n": 1}))] {
        let _ = source
            .add_log(NewLog::new(id, data), AddOptions::default())
            .await
            .unwrap();
    }

    let gate = MigrationGate::new(&name, paths.clone(), StoreClock::Local);
    assert_eq!(
        gate.run(&config).await.unwrap(),
        MigrationOutcome::Migrated { copied: 1, skipped: 1 }
    );
    assert_eq!(gate.run(&config).await.unwrap(), MigrationOutcome::Unchanged);

    let x = target.get_log_by_id("X").await.unwrap().unwrap();
    assert_eq!(x.data, json!({"origin": "mysql"}));
    assert!(target.get_log_by_id("Y").await.unwrap().is_some());

    source.close().await.unwrap();
    drop_database(&target).await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn facade_without_type_prefers_mysql() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("facade");
    let config = StoreConfig {
        backend: None,
        ..config
    };
    let facade = LogFacade::new(&name, config.clone()).unwrap();
    facade.wait_ready().await.unwrap();
    assert_eq!(facade.backend_kind(), Some(BackendKind::Mysql));

    let rows = facade.query("SELECT 1 AS one", &[]).await.unwrap();
    assert_eq!(rows[0]["one"], json!(1));

    let cleanup = NetworkedStore::new(&name, &config, &StorePaths::new(dir.path())).unwrap();
    facade.close().await.unwrap();
    drop_database(&cleanup).await;
    cleanup.close().await.unwrap();
}

#[tokio::test]
async fn sqlite_facade_promotes_entries_on_close() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("promote");
    let paths = StorePaths::new(dir.path());
    let config = StoreConfig {
        backend: Some(BackendKind::Sqlite),
        ..config
    };

    let facade = LogFacade::new(&name, config.clone()).unwrap();
    for id in ["A", "B"] {
        let _ = facade
            .add_log(NewLog::new(id, json!({"id": id})), AddOptions::default())
            .await
            .unwrap();
    }
    facade.close().await.unwrap();

    let gate = MigrationGate::new(&name, paths.clone(), StoreClock::Local);
    assert!(!gate.is_pending());
    assert!(paths.checksum_file(&name).exists());
    assert_eq!(gate.recorded_checksum().unwrap(), gate.current_checksum().unwrap());

    let target = NetworkedStore::connect(&name, &config, &paths).await.unwrap();
    let ids: Vec<_> = target
        .get_logs(Page::all())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, ["A", "B"]);

    drop_database(&target).await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn networked_facade_retries_pending_migration_on_close() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("pending");
    let paths = StorePaths::new(dir.path());

    let source = EmbeddedStore::open(&name, &paths, StoreClock::Local).unwrap();
    let _ = source
        .add_log(NewLog::new("offline", json!({"n": 1})), AddOptions::default())
        .await
        .unwrap();
    source.close().await.unwrap();
    let gate = MigrationGate::new(&name, paths.clone(), StoreClock::Local);
    gate.mark_pending().unwrap();

    let facade = LogFacade::new(&name, config.clone()).unwrap();
    facade.wait_ready().await.unwrap();
    assert_eq!(facade.backend_kind(), Some(BackendKind::Mysql));
    facade.close().await.unwrap();

    assert!(!gate.is_pending());
    assert!(gate.recorded_checksum().unwrap().is_some());

    let target = NetworkedStore::connect(&name, &config, &paths).await.unwrap();
    let entry = target.get_log_by_id("offline").await.unwrap().unwrap();
    assert_eq!(entry.data, json!({"n": 1}));

    drop_database(&target).await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn stale_marker_is_reprovisioned() {
    let dir = TempDir::new().unwrap();
    let Some(config) = mysql_config(&dir) else { return };
    let name = unique_name("stale");
    let paths = StorePaths::new(dir.path());

    let store = NetworkedStore::new(&name, &config, &paths).unwrap();
    let marker = paths.mysql_marker(&config.host, config.port, store.database());
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
    std::fs::write(&marker, "").unwrap();

    store.wait_ready().await.unwrap();
    let _ = store
        .add_log(NewLog::new("1", json!({})), AddOptions::default())
        .await
        .unwrap();
    assert!(store.get_log_by_id("1").await.unwrap().is_some());
    assert!(marker.exists());

    drop_database(&store).await;
    store.close().await.unwrap();
}
