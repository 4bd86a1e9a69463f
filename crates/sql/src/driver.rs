// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The database driver contract and its global registry.

use crate::error::SqlError;
use crate::params;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Placeholder form a driver's protocol expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Numbered `$N` placeholders (values referenced by index).
    Dollar,
    /// Positional `?` placeholders.
    Question,
}

/// Transaction isolation levels surfaced in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Conflict policy for inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    #[default]
    Error,
    Ignore,
    Replace,
}

/// Connection request handed to a driver.
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    pub dsn: String,
    pub file_lock: bool,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
}

/// Driver-specific teardown (e.g. releasing a file lock).
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Streaming row destination.
pub trait RowSink: Send {
    fn columns(&mut self, cols: &[String]) -> Result<(), SqlError>;
    fn row(&mut self, values: &[Value]) -> Result<(), SqlError>;
}

/// One logical database connection.
#[async_trait]
pub trait SqlConnection: Send {
    async fn ping(&mut self) -> Result<(), SqlError>;
    /// Non-row statement; returns rows affected.
    async fn execute(&mut self, sql: &str, values: &[Value]) -> Result<u64, SqlError>;
    /// Row-returning statement; streams into the sink, stopping early at
    /// `max_rows`. Returns the number of rows emitted.
    async fn query(
        &mut self,
        sql: &str,
        values: &[Value],
        max_rows: Option<u64>,
        sink: &mut (dyn RowSink + '_),
    ) -> Result<u64, SqlError>;
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<(), SqlError>;
    async fn commit(&mut self) -> Result<(), SqlError>;
    async fn rollback(&mut self) -> Result<(), SqlError>;
    async fn close(&mut self) -> Result<(), SqlError>;
}

/// A database-family plugin behind the SQL executor.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a logical handle. The optional cleanup releases
    /// driver-specific resources and runs exactly once on close.
    async fn connect(
        &self,
        cfg: &ConnectConfig,
    ) -> Result<(Box<dyn SqlConnection>, Option<Cleanup>), SqlError>;

    fn supports_advisory_lock(&self) -> bool {
        false
    }

    /// Block until the named lock is held. Release is expected to run
    /// under its own 30-second timeout at the call site.
    async fn acquire_advisory_lock(
        &self,
        _conn: &mut (dyn SqlConnection + '_),
        _name: &str,
    ) -> Result<(), SqlError> {
        Err(SqlError::AdvisoryUnsupported(self.name().to_string()))
    }

    async fn release_advisory_lock(
        &self,
        _conn: &mut (dyn SqlConnection + '_),
        _name: &str,
    ) -> Result<(), SqlError> {
        Err(SqlError::AdvisoryUnsupported(self.name().to_string()))
    }

    fn placeholder(&self) -> Placeholder;

    /// Whether the statement splitter honors `$tag$…$tag$` strings.
    fn supports_dollar_quoting(&self) -> bool {
        self.placeholder() == Placeholder::Dollar
    }

    fn convert_named_params(
        &self,
        query: &str,
        named: &[(String, Value)],
    ) -> Result<(String, Vec<Value>), SqlError> {
        params::convert_named(query, named, self.placeholder())
    }

    /// Double-quote an identifier, doubling internal quotes.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Multi-row INSERT in the driver's conflict dialect.
    fn build_insert_query(
        &self,
        table: &str,
        columns: &[String],
        row_count: usize,
        on_conflict: OnConflict,
        conflict_target: &[String],
        update_columns: &[String],
    ) -> Result<String, SqlError>;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Driver>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Driver>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a driver; later registrations replace earlier ones.
pub fn register_driver(driver: Arc<dyn Driver>) {
    registry().write().insert(driver.name().to_string(), driver);
}

/// Look up a driver by name.
pub fn driver(name: &str) -> Result<Arc<dyn Driver>, SqlError> {
    registry()
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| SqlError::UnknownDriver(name.to_string()))
}

/// Register the built-in SQLite and PostgreSQL drivers.
pub fn register_builtin_drivers() {
    register_driver(Arc::new(crate::sqlite::SqliteDriver));
    register_driver(Arc::new(crate::postgres::PostgresDriver));
}
