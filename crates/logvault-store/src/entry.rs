//! Log entry types shared by both backends.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, StoreError};

/// A stored log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Caller-assigned primary key.
    pub id: String,
    /// Structured payload.
    pub data: Value,
    /// Free-form audit note.
    pub message: String,
    /// RFC 3339 timestamp with offset.
    pub timestamp: String,
}

/// A log entry to be written. `timestamp` defaults to "now".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLog {
    /// Caller-assigned primary key.
    pub id: String,
    /// Structured payload.
    #[serde(default)]
    pub data: Value,
    /// Free-form audit note.
    #[serde(default)]
    pub message: String,
    /// Explicit timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl NewLog {
    /// Entry with `id` and `data`, empty message.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            ..Self::default()
        }
    }

    /// Set the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

impl From<LogEntry> for NewLog {
    fn from(entry: LogEntry) -> Self {
        Self {
            id: entry.id,
            data: entry.data,
            message: entry.message,
            timestamp: Some(entry.timestamp),
        }
    }
}

/// Write options for `add_log`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddOptions {
    /// Merge new object data over the stored object data.
    pub update: bool,
    /// Deadline for networked writes.
    pub timeout: Option<Duration>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            update: true,
            timeout: None,
        }
    }
}

impl AddOptions {
    /// Replace stored data outright.
    pub fn replace() -> Self {
        Self {
            update: false,
            timeout: None,
        }
    }
}

/// Pagination applied at the storage layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of entries.
    pub limit: Option<u32>,
    /// Entries to skip.
    pub offset: Option<u32>,
}

impl Page {
    /// Every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// `limit` entries starting at `offset`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

/// Shallow-merge `new` over `old` when both are objects.
///
/// Keys in `new` win, keys only in `old` survive. Any other combination
/// yields `new`.
pub fn merge_data(old: Value, new: Value) -> Value {
    match (old, new) {
        (Value::Object(mut base), Value::Object(patch)) => {
            base.extend(patch);
            Value::Object(base)
        }
        (_, new) => new,
    }
}

/// Keep entries for which `predicate` resolves true, in input order.
///
/// The predicate is awaited once per entry, sequentially.
pub async fn filter_logs<F, Fut>(entries: Vec<LogEntry>, mut predicate: F) -> Vec<LogEntry>
where
    F: FnMut(&LogEntry) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries {
        if predicate(&entry).await {
            kept.push(entry);
        }
    }
    kept
}

/// Serialize `data` for a text column.
pub(crate) fn encode_data(data: &Value) -> Result<String> {
    Ok(serde_json::to_string(data)?)
}

/// Parse a text column back into `data`. NULL reads as JSON null.
pub(crate) fn decode_data(raw: Option<&str>, table: &'static str) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
            table,
            column: "data",
            detail: format!("invalid JSON: {e}"),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
