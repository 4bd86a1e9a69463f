// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQL executor error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("invalid sql config: {0}")]
    Config(String),
    #[error("unknown sql driver: {0}")]
    UnknownDriver(String),
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("parameter count mismatch: query expects {expected}, got {given}")]
    ParamCount { expected: usize, given: usize },
    #[error("invalid identifier {0:?}")]
    BadIdentifier(String),
    #[error("database is locked: {0}")]
    Locked(String),
    #[error("driver {0} does not support advisory locks")]
    AdvisoryUnsupported(String),
    #[error("connect failed after {attempts} attempts: {message}")]
    Connect { attempts: u32, message: String },
    #[error("statement {index} failed: {message}")]
    Statement { index: usize, message: String },
    #[error("driver error: {0}")]
    Driver(String),
    #[error("import failed: {0}")]
    Import(String),
    #[error("connection manager is closed")]
    Closed,
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for SqlError {
    fn from(e: rusqlite::Error) -> Self {
        SqlError::Driver(e.to_string())
    }
}

impl From<tokio_postgres::Error> for SqlError {
    fn from(e: tokio_postgres::Error) -> Self {
        SqlError::Driver(e.to_string())
    }
}

impl From<csv::Error> for SqlError {
    fn from(e: csv::Error) -> Self {
        SqlError::Driver(format!("csv: {e}"))
    }
}
