//! Logical SQL dump of an embedded database.
//!
//! The dump can be replayed into an existing database: `CREATE` statements
//! are rewritten to `IF NOT EXISTS` and rows use `INSERT OR IGNORE`.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use rusqlite::types::ValueRef;

use crate::errors::Result;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?").unwrap()
});

static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?").unwrap()
});

/// Rewrite a `CREATE TABLE` statement to `CREATE TABLE IF NOT EXISTS`.
pub fn idempotent_create_table(sql: &str) -> String {
    CREATE_TABLE
        .replace(sql, "CREATE TABLE IF NOT EXISTS ")
        .into_owned()
}

/// Rewrite a `CREATE [UNIQUE] INDEX` statement to its `IF NOT EXISTS` form.
pub fn idempotent_create_index(sql: &str) -> String {
    CREATE_INDEX
        .replace(sql, "CREATE ${1}INDEX IF NOT EXISTS ")
        .into_owned()
}

/// Produce the dump text for every user table and index.
pub fn dump(conn: &Connection) -> Result<String> {
    let mut out = String::from("PRAGMA foreign_keys=OFF;\nBEGIN TRANSACTION;\n");

    let tables: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        rows
    };

    for (name, sql) in &tables {
        let _ = writeln!(out, "{};", idempotent_create_table(sql));
        dump_rows(conn, name, &mut out)?;
    }

    let indexes: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE type = 'index' AND sql IS NOT NULL
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        rows
    };

    for sql in &indexes {
        let _ = writeln!(out, "{};", idempotent_create_index(sql));
    }

    out.push_str("COMMIT;\n");
    Ok(out)
}

fn dump_rows(conn: &Connection, table: &str, out: &mut String) -> Result<()> {
    let quoted = quote_ident(table);
    let mut stmt = conn.prepare(&format!("SELECT * FROM {quoted} ORDER BY rowid"))?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            values.push(sql_literal(row.get_ref(idx)?));
        }
        let _ = writeln!(out, "INSERT OR IGNORE INTO {quoted} VALUES({});", values.join(","));
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_nan() => "NULL".to_string(),
        ValueRef::Real(f) if f.is_infinite() && f.is_sign_positive() => "9e999".to_string(),
        ValueRef::Real(f) if f.is_infinite() => "-9e999".to_string(),
        ValueRef::Real(f) => format!("{f:?}"),
        ValueRef::Text(bytes) => {
            format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''"))
        }
        ValueRef::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                let _ = write!(hex, "{b:02x}");
            }
            hex.push('\'');
            hex
        }
    }
}
