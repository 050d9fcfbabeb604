/// SQL DDL for the embedded log store.
/// WAL mode is enabled at connection time.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY,
    data TEXT,
    message TEXT,
    timestamp TEXT
);
";

pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

pub const UPSERT_LOG: &str = "INSERT INTO logs (id, data, message, timestamp) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(id) DO UPDATE SET
         data = excluded.data,
         message = excluded.message,
         timestamp = excluded.timestamp";

pub const SELECT_LOG: &str = "SELECT id, data, message, timestamp FROM logs WHERE id = ?1";

pub const SELECT_LOGS_PAGE: &str =
    "SELECT id, data, message, timestamp FROM logs ORDER BY rowid LIMIT ?1 OFFSET ?2";

pub const SELECT_DATA: &str = "SELECT data FROM logs WHERE id = ?1";

pub const DELETE_LOG: &str = "DELETE FROM logs WHERE id = ?1";
