// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed SQL executor config, deserialized from the step's opaque config
//! map and validated before instantiation.

use crate::driver::{IsolationLevel, OnConflict};
use crate::error::SqlError;
use crate::readers::InputFormat;
use crate::value::Value;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default import batch size.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Result output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Csv,
}

/// User-supplied parameters: a name→value map or an ordered list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SqlParams {
    Named(IndexMap<String, serde_json::Value>),
    Positional(Vec<serde_json::Value>),
}

impl SqlParams {
    pub fn named_values(&self) -> Option<Vec<(String, Value)>> {
        match self {
            SqlParams::Named(map) => Some(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
            SqlParams::Positional(_) => None,
        }
    }

    pub fn positional_values(&self) -> Option<Vec<Value>> {
        match self {
            SqlParams::Positional(list) => {
                Some(list.iter().map(Value::from_json).collect())
            }
            SqlParams::Named(_) => None,
        }
    }
}

/// Bulk import block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ImportOptions {
    pub input_file: PathBuf,
    pub table: String,
    pub format: Option<InputFormat>,
    pub columns: Vec<String>,
    pub has_header: bool,
    pub delimiter: Option<char>,
    pub null_values: Vec<String>,
    pub batch_size: usize,
    pub on_conflict: OnConflict,
    pub conflict_target: Vec<String>,
    pub update_columns: Vec<String>,
    pub skip_rows: u64,
    pub max_rows: Option<u64>,
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            input_file: PathBuf::new(),
            table: String::new(),
            format: None,
            columns: Vec::new(),
            has_header: true,
            delimiter: None,
            null_values: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            on_conflict: OnConflict::Error,
            conflict_target: Vec::new(),
            update_columns: Vec::new(),
            skip_rows: 0,
            max_rows: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SqlExecConfig {
    pub dsn: String,
    /// Inline script body, or `file://PATH` to read one.
    pub script: Option<String>,
    pub params: Option<SqlParams>,
    pub output_format: OutputFormat,
    /// CSV header row.
    pub header: bool,
    pub null_string: String,
    pub isolation_level: IsolationLevel,
    pub transaction: bool,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub advisory_lock: Option<String>,
    pub file_lock: bool,
    pub streaming: bool,
    pub output_file: Option<PathBuf>,
    pub max_rows: Option<u64>,
    pub timeout_seconds: u64,
    pub import: Option<ImportOptions>,
}

impl Default for SqlExecConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            script: None,
            params: None,
            output_format: OutputFormat::Jsonl,
            header: true,
            null_string: String::new(),
            isolation_level: IsolationLevel::Default,
            transaction: false,
            max_open_conns: 0,
            max_idle_conns: 0,
            advisory_lock: None,
            file_lock: false,
            streaming: false,
            output_file: None,
            max_rows: None,
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            import: None,
        }
    }
}

impl SqlExecConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, SqlError> {
        let cfg: Self = match value {
            serde_json::Value::Null => Self::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| SqlError::Config(e.to_string()))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SqlError> {
        if self.dsn.is_empty() {
            return Err(SqlError::Config("dsn is required".to_string()));
        }
        if self.max_open_conns > 0 && self.max_idle_conns > self.max_open_conns {
            return Err(SqlError::Config(
                "max_idle_conns must not exceed max_open_conns".to_string(),
            ));
        }
        if self.streaming && self.output_file.is_none() {
            return Err(SqlError::Config("streaming requires output_file".to_string()));
        }
        if let Some(import) = &self.import {
            if import.input_file.as_os_str().is_empty() {
                return Err(SqlError::Config("import.input_file is required".to_string()));
            }
            if import.table.is_empty() {
                return Err(SqlError::Config("import.table is required".to_string()));
            }
            if import.batch_size == 0 {
                return Err(SqlError::Config("import.batch_size must be positive".to_string()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        if self.timeout_seconds == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_seconds)
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
