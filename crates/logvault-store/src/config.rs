//! Store configuration with layered sources.
//!
//! Loading flow:
//! 1. Start with compiled [`StoreConfig::default()`]
//! 2. If a JSON config file is given and exists, deep-merge it over defaults
//! 3. Apply `LOGVAULT_*` environment variable overrides (highest priority)
//!
//! Keys use camelCase on disk (`connectionLimit`, `connectTimeout`, ...).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, StoreError};

/// Which backend a store should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded single-file `SQLite` database.
    Sqlite,
    /// Networked `MySQL` database.
    Mysql,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Mysql => write!(f, "mysql"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::Mysql),
            other => Err(format!("unknown backend type: {other}")),
        }
    }
}

/// Configuration for a log store.
///
/// Every field is optional on disk. `backend: None` means "try `MySQL`,
/// fall back to `SQLite`".
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Explicit backend choice.
    #[serde(rename = "type")]
    pub backend: Option<BackendKind>,
    /// `MySQL` host.
    pub host: String,
    /// `MySQL` user.
    pub user: String,
    /// `MySQL` password. Read from disk or env, never written back out.
    #[serde(skip_serializing)]
    pub password: SecretString,
    /// `MySQL` database name. Derived from the logical name when absent.
    pub database: Option<String>,
    /// `MySQL` port.
    pub port: u16,
    /// Maximum pooled connections.
    pub connection_limit: u32,
    /// Connect timeout in milliseconds.
    pub connect_timeout: u64,
    /// Per-query timeout in milliseconds.
    pub query_timeout: Option<u64>,
    /// Root directory for embedded files, markers, and backups.
    pub data_dir: Option<PathBuf>,
    /// IANA time zone for default timestamps. Host local offset when absent.
    pub timezone: Option<String>,
    /// Whether `close()` promotes embedded entries to `MySQL`.
    pub migrate_on_close: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: None,
            host: "localhost".to_string(),
            user: "root".to_string(),
            password: SecretString::from(String::new()),
            database: None,
            port: 3306,
            connection_limit: 5,
            connect_timeout: 60_000,
            query_timeout: None,
            data_dir: None,
            timezone: None,
            migrate_on_close: true,
        }
    }
}

impl StoreConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    /// Per-query timeout as a [`Duration`], if configured.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout.map(Duration::from_millis)
    }

    /// Root data directory, defaulting to `$HOME/.cache/logvault`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Load from defaults, an optional JSON file, and `LOGVAULT_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading store config from file");
                let content =
                    std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            Some(path) => {
                debug!(path = %path.display(), "store config file not found, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `LOGVAULT_*` overrides using `lookup` to read variables.
    ///
    /// Invalid values are ignored with a warning.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = read("LOGVAULT_TYPE") {
            match v.parse() {
                Ok(kind) => self.backend = Some(kind),
                Err(e) => tracing::warn!(key = "LOGVAULT_TYPE", value = %v, error = %e, "ignoring env var"),
            }
        }
        if let Some(v) = read("LOGVAULT_HOST") {
            self.host = v;
        }
        if let Some(v) = read("LOGVAULT_USER") {
            self.user = v;
        }
        if let Some(v) = lookup("LOGVAULT_PASSWORD") {
            self.password = SecretString::from(v);
        }
        if let Some(v) = read("LOGVAULT_DATABASE") {
            self.database = Some(v);
        }
        if let Some(v) = read("LOGVAULT_PORT").and_then(|v| parse_ranged("LOGVAULT_PORT", &v, 1, 65_535)) {
            self.port = u16::try_from(v).unwrap_or(self.port);
        }
        if let Some(v) = read("LOGVAULT_CONNECTION_LIMIT")
            .and_then(|v| parse_ranged("LOGVAULT_CONNECTION_LIMIT", &v, 1, 1_000))
        {
            self.connection_limit = u32::try_from(v).unwrap_or(self.connection_limit);
        }
        if let Some(v) = read("LOGVAULT_CONNECT_TIMEOUT")
            .and_then(|v| parse_ranged("LOGVAULT_CONNECT_TIMEOUT", &v, 1, 3_600_000))
        {
            self.connect_timeout = v;
        }
        if let Some(v) = read("LOGVAULT_QUERY_TIMEOUT")
            .and_then(|v| parse_ranged("LOGVAULT_QUERY_TIMEOUT", &v, 1, 3_600_000))
        {
            self.query_timeout = Some(v);
        }
        if let Some(v) = read("LOGVAULT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = read("LOGVAULT_TIMEZONE") {
            self.timezone = Some(v);
        }
        if let Some(v) = read("LOGVAULT_MIGRATE_ON_CLOSE") {
            match parse_bool(&v) {
                Some(b) => self.migrate_on_close = b,
                None => tracing::warn!(key = "LOGVAULT_MIGRATE_ON_CLOSE", value = %v, "invalid boolean env var, ignoring"),
            }
        }
    }
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`. Nulls in
/// `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Parse a string as a boolean (`true`/`1`/`yes`/`on`, `false`/`0`/`no`/`off`).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_ranged(key: &str, val: &str, min: u64, max: u64) -> Option<u64> {
    let parsed = val.parse::<u64>().ok().filter(|n| (min..=max).contains(n));
    if parsed.is_none() {
        tracing::warn!(key, value = %val, "invalid numeric env var, ignoring");
    }
    parsed
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".cache")
        .join("logvault")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, None);
        assert_eq!(config.port, 3306);
        assert_eq!(config.connection_limit, 5);
        assert_eq!(config.connect_timeout(), Duration::from_secs(60));
        assert!(config.query_timeout().is_none());
        assert!(config.migrate_on_close);
    }

    #[test]
    fn deserializes_camel_case_keys() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"type": "mysql", "connectionLimit": 9, "connectTimeout": 1500, "host": "db"}"#,
        )
        .unwrap();
        assert_eq!(config.backend, Some(BackendKind::Mysql));
        assert_eq!(config.connection_limit, 9);
        assert_eq!(config.connect_timeout, 1500);
        assert_eq!(config.host, "db");
        assert_eq!(config.port, 3306);
    }

    #[test]
    fn debug_redacts_password() {
        let config = StoreConfig {
            password: SecretString::from("hunter2"),
            ..StoreConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("REDACTED"));
        assert_eq!(config.password.expose_secret(), "hunter2");
    }

    #[test]
    fn password_is_read_but_never_serialized() {
        let config: StoreConfig = serde_json::from_str(r#"{"password": "s3cret"}"#).unwrap();
        assert_eq!(config.password.expose_secret(), "s3cret");

        let written = serde_json::to_value(&config).unwrap();
        assert!(written.get("password").is_none());
        assert!(!written.to_string().contains("s3cret"));
    }

    #[test]
    fn load_keeps_password_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logvault.json");
        std::fs::write(&path, r#"{"password": "from-file"}"#).unwrap();
        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.password.expose_secret(), "from-file");
    }

    #[test]
    fn load_merges_file_over_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logvault.json");
        std::fs::write(&path, r#"{"type": "sqlite", "port": 3307, "timezone": null}"#).unwrap();
        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 3307);
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.connection_limit, 5);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(matches!(
            StoreConfig::load(Some(&path)),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = StoreConfig::default();
        config.apply_env_overrides_from(lookup(&[
            ("LOGVAULT_TYPE", "MySQL"),
            ("LOGVAULT_HOST", "10.0.0.5"),
            ("LOGVAULT_PORT", "3310"),
            ("LOGVAULT_CONNECTION_LIMIT", "12"),
            ("LOGVAULT_MIGRATE_ON_CLOSE", "off"),
            ("LOGVAULT_QUERY_TIMEOUT", "250"),
        ]));
        assert_eq!(config.backend, Some(BackendKind::Mysql));
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3310);
        assert_eq!(config.connection_limit, 12);
        assert!(!config.migrate_on_close);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = StoreConfig::default();
        config.apply_env_overrides_from(lookup(&[
            ("LOGVAULT_TYPE", "postgres"),
            ("LOGVAULT_PORT", "99999"),
            ("LOGVAULT_CONNECTION_LIMIT", "many"),
            ("LOGVAULT_MIGRATE_ON_CLOSE", "perhaps"),
        ]));
        assert_eq!(config.backend, None);
        assert_eq!(config.port, 3306);
        assert_eq!(config.connection_limit, 5);
        assert!(config.migrate_on_close);
    }

    #[test]
    fn empty_password_env_clears_password() {
        let mut config = StoreConfig {
            password: SecretString::from("old"),
            ..StoreConfig::default()
        };
        config.apply_env_overrides_from(lookup(&[("LOGVAULT_PASSWORD", "")]));
        assert_eq!(config.password.expose_secret(), "");
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"a": {"b": 1, "c": 2}});
        let source = serde_json::json!({"a": {"b": 9}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"]["b"], 9);
        assert_eq!(merged["a"]["c"], 2);
    }

    #[test]
    fn backend_kind_parse_and_display() {
        assert_eq!("SQLITE".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!("oracle".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Mysql.to_string(), "mysql");
    }
}
