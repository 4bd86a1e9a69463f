// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite driver over rusqlite. Blocking calls run under
//! `block_in_place`, so this driver requires the multi-thread runtime.

use crate::driver::{
    Cleanup, ConnectConfig, Driver, IsolationLevel, OnConflict, Placeholder, RowSink,
    SqlConnection,
};
use crate::error::SqlError;
use crate::lock::FileLock;
use crate::params::sanitize_identifier;
use crate::value::Value;
use async_trait::async_trait;
use chrono::SecondsFormat;
use std::path::Path;
use tokio::task::block_in_place;

pub struct SqliteDriver;

/// Strip `sqlite://`/`sqlite:` prefixes from a DSN.
fn db_path(dsn: &str) -> &str {
    dsn.strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn)
}

fn is_memory(path: &str) -> bool {
    path.is_empty() || path.starts_with(":memory:") || path.starts_with("file::memory:")
}

fn bind_value(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Timestamp(t) => {
            rusqlite::types::Value::Text(t.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
    }
}

fn scan_value(v: rusqlite::types::ValueRef<'_>) -> Value {
    match v {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Int(i),
        rusqlite::types::ValueRef::Real(f) => Value::Float(f),
        rusqlite::types::ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

struct SqliteConn {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConn {
    fn conn(&mut self) -> Result<&mut rusqlite::Connection, SqlError> {
        self.conn.as_mut().ok_or(SqlError::Closed)
    }
}

#[async_trait]
impl SqlConnection for SqliteConn {
    async fn ping(&mut self) -> Result<(), SqlError> {
        let conn = self.conn()?;
        block_in_place(|| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }

    async fn execute(&mut self, sql: &str, values: &[Value]) -> Result<u64, SqlError> {
        let conn = self.conn()?;
        block_in_place(|| {
            let mut stmt = conn.prepare(sql)?;
            let changed =
                stmt.execute(rusqlite::params_from_iter(values.iter().map(bind_value)))?;
            Ok(changed as u64)
        })
    }

    async fn query(
        &mut self,
        sql: &str,
        values: &[Value],
        max_rows: Option<u64>,
        sink: &mut (dyn RowSink + '_),
    ) -> Result<u64, SqlError> {
        let conn = self.conn()?;
        block_in_place(|| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            sink.columns(&columns)?;

            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(bind_value)))?;
            let mut count = 0u64;
            while let Some(row) = rows.next()? {
                if let Some(max) = max_rows {
                    if count >= max {
                        break;
                    }
                }
                let mut scanned = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    scanned.push(scan_value(row.get_ref(i)?));
                }
                sink.row(&scanned)?;
                count += 1;
            }
            Ok(count)
        })
    }

    async fn begin(&mut self, _isolation: IsolationLevel) -> Result<(), SqlError> {
        // SQLite transactions are always serializable; the requested
        // level is accepted and ignored.
        let conn = self.conn()?;
        block_in_place(|| Ok(conn.execute_batch("BEGIN")?))
    }

    async fn commit(&mut self) -> Result<(), SqlError> {
        let conn = self.conn()?;
        block_in_place(|| Ok(conn.execute_batch("COMMIT")?))
    }

    async fn rollback(&mut self) -> Result<(), SqlError> {
        let conn = self.conn()?;
        block_in_place(|| Ok(conn.execute_batch("ROLLBACK")?))
    }

    async fn close(&mut self) -> Result<(), SqlError> {
        drop(self.conn.take());
        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(
        &self,
        cfg: &ConnectConfig,
    ) -> Result<(Box<dyn SqlConnection>, Option<Cleanup>), SqlError> {
        let path = db_path(&cfg.dsn).to_string();
        let mut cleanup: Option<Cleanup> = None;
        if cfg.file_lock && !is_memory(&path) {
            let lock = FileLock::acquire(Path::new(&path))?;
            cleanup = Some(Box::new(move || drop(lock)));
        }

        let conn = block_in_place(|| {
            if is_memory(&path) {
                rusqlite::Connection::open_in_memory()
            } else {
                rusqlite::Connection::open(&path)
            }
        });
        match conn {
            Ok(conn) => Ok((Box::new(SqliteConn { conn: Some(conn) }), cleanup)),
            Err(e) => {
                if let Some(cleanup) = cleanup {
                    cleanup();
                }
                Err(e.into())
            }
        }
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Question
    }

    fn supports_dollar_quoting(&self) -> bool {
        false
    }

    /// Dialect: conflict handling is an INSERT prefix; `conflict_target`
    /// and `update_columns` are accepted for interface uniformity but
    /// ignored.
    fn build_insert_query(
        &self,
        table: &str,
        columns: &[String],
        row_count: usize,
        on_conflict: OnConflict,
        _conflict_target: &[String],
        _update_columns: &[String],
    ) -> Result<String, SqlError> {
        if columns.is_empty() || row_count == 0 {
            return Err(SqlError::Config("insert needs columns and rows".to_string()));
        }
        let table = self.quote_identifier(sanitize_identifier(table)?);
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| Ok(self.quote_identifier(sanitize_identifier(c)?)))
            .collect::<Result<_, SqlError>>()?;
        let row = format!("({})", vec!["?"; columns.len()].join(", "));
        let rows = vec![row; row_count].join(", ");
        let verb = match on_conflict {
            OnConflict::Error => "INSERT",
            OnConflict::Ignore => "INSERT OR IGNORE",
            OnConflict::Replace => "INSERT OR REPLACE",
        };
        Ok(format!("{verb} INTO {table} ({}) VALUES {rows}", quoted.join(", ")))
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod sqlite_tests;
