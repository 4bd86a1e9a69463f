// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framework integration: the `sqlite`/`postgres` executor types.

use crate::config::{OutputFormat, SqlExecConfig, SqlParams};
use crate::driver::{self, ConnectConfig, Driver, RowSink, SqlConnection};
use crate::error::SqlError;
use crate::import::run_import;
use crate::metrics::{self, ExecutionMetrics};
use crate::params::validate_positional;
use crate::pool::ConnectionManager;
use crate::readers::{detect_format, CsvReader, InputFormat, InputReader, JsonlReader};
use crate::split::{returns_rows, split_statements};
use crate::value::Value;
use crate::writers::{CsvWriter, JsonWriter, JsonlWriter, ResultWriter};
use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use skein_executor::{registry, Capabilities, ExecError, Executor, Writer};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline on advisory-lock release so teardown never blocks forever.
const LOCK_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

impl From<SqlError> for ExecError {
    fn from(e: SqlError) -> Self {
        match e {
            SqlError::Cancelled => ExecError::Cancelled,
            SqlError::Config(message) => ExecError::Config(message),
            other => ExecError::Other(other.to_string()),
        }
    }
}

#[derive(Default)]
struct IoSlots {
    stdout: Option<Writer>,
    stderr: Option<Writer>,
}

struct WriterRowSink<'a> {
    writer: &'a mut (dyn ResultWriter + 'a),
}

impl RowSink for WriterRowSink<'_> {
    fn columns(&mut self, cols: &[String]) -> Result<(), SqlError> {
        self.writer.write_header(cols)
    }

    fn row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        self.writer.write_row(values)
    }
}

/// Runs a SQL command, script, or bulk import through a registered
/// driver. Registered under the driver's name (`sqlite`, `postgres`).
pub struct SqlExecutor {
    driver: Arc<dyn Driver>,
    config: SqlExecConfig,
    command: String,
    io: Mutex<IoSlots>,
    kill: CancellationToken,
}

impl SqlExecutor {
    pub fn from_step(kind: &str, step: &skein_core::Step) -> Result<Self, ExecError> {
        let driver = driver::driver(kind).map_err(ExecError::from)?;
        let mut config = SqlExecConfig::from_value(&step.executor.config)?;
        if config.script.is_none() {
            config.script = step.script.clone();
        }
        let mut command = step.command.clone();
        for arg in &step.args {
            command.push(' ');
            command.push_str(arg);
        }
        Ok(Self {
            driver,
            config,
            command,
            io: Mutex::new(IoSlots::default()),
            kill: CancellationToken::new(),
        })
    }

    /// Query source precedence: script body, `file://` script, step
    /// command.
    fn query_text(&self) -> Result<String, SqlError> {
        if let Some(script) = &self.config.script {
            if let Some(path) = script.strip_prefix("file://") {
                return Ok(std::fs::read_to_string(path)?);
            }
            return Ok(script.clone());
        }
        if !self.command.trim().is_empty() {
            return Ok(self.command.clone());
        }
        Err(SqlError::Config("no script or command to execute".to_string()))
    }

    fn bind_params(&self, statement: &str) -> Result<(String, Vec<Value>), SqlError> {
        match &self.config.params {
            None => Ok((statement.to_string(), Vec::new())),
            Some(params) => {
                if let Some(named) = params.named_values() {
                    self.driver.convert_named_params(statement, &named)
                } else if let Some(values) = params.positional_values() {
                    validate_positional(statement, self.driver.placeholder(), values.len())?;
                    Ok((statement.to_string(), values))
                } else {
                    Ok((statement.to_string(), Vec::new()))
                }
            }
        }
    }

    fn make_writer(&self, out: Writer) -> Box<dyn ResultWriter> {
        match self.config.output_format {
            OutputFormat::Jsonl => Box::new(JsonlWriter::new(out)),
            OutputFormat::Json => Box::new(JsonWriter::new(out)),
            OutputFormat::Csv => Box::new(CsvWriter::new(
                out,
                self.config.header,
                self.config.null_string.clone(),
            )),
        }
    }

    /// Streaming output lands in `<output_file>.tmp` and renames into
    /// place only after a clean close.
    fn open_stream_target(&self) -> Result<(Writer, PathBuf, PathBuf), SqlError> {
        let Some(path) = self.config.output_file.clone() else {
            return Err(SqlError::Config("streaming requires output_file".to_string()));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let file = std::fs::File::create(&tmp)?;
        Ok((Box::new(file), tmp, path))
    }

    async fn run_inner(&self, stdout: Writer, stderr: &mut (dyn Write + Send)) -> Result<(), SqlError> {
        let manager = ConnectionManager::new(
            self.driver.clone(),
            ConnectConfig {
                dsn: self.config.dsn.clone(),
                file_lock: self.config.file_lock,
                max_open_conns: self.config.max_open_conns,
                max_idle_conns: self.config.max_idle_conns,
            },
        );
        manager.acquire().await?;
        let result = self.run_on_manager(&manager, stdout, stderr).await;
        manager.release().await;
        result
    }

    async fn run_on_manager(
        &self,
        manager: &ConnectionManager,
        stdout: Writer,
        stderr: &mut (dyn Write + Send),
    ) -> Result<(), SqlError> {
        let mut lease = manager.conn().await?;

        let mut advisory_held = false;
        if let Some(name) = &self.config.advisory_lock {
            if self.driver.supports_advisory_lock() {
                self.driver.acquire_advisory_lock(lease.conn(), name).await?;
                advisory_held = true;
            } else {
                tracing::warn!(
                    driver = self.driver.name(),
                    "advisory_lock configured but unsupported; proceeding without it"
                );
            }
        }

        let result = if self.config.import.is_some() {
            self.run_import_mode(lease.conn(), stderr).await
        } else {
            self.run_statements(lease.conn(), stdout, stderr).await
        };

        if advisory_held {
            if let Some(name) = &self.config.advisory_lock {
                match tokio::time::timeout(
                    LOCK_RELEASE_TIMEOUT,
                    self.driver.release_advisory_lock(lease.conn(), name),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "advisory lock release failed"),
                    Err(_) => tracing::warn!(lock = %name, "advisory lock release timed out"),
                }
            }
        }
        result
    }

    async fn run_statements(
        &self,
        conn: &mut (dyn SqlConnection + '_),
        stdout: Writer,
        stderr: &mut (dyn Write + Send),
    ) -> Result<(), SqlError> {
        let source = self.query_text()?;
        let statements = split_statements(&source, self.driver.supports_dollar_quoting());
        if statements.is_empty() {
            return Ok(());
        }

        let (mut writer, rename) = if self.config.streaming {
            let (out, tmp, target) = self.open_stream_target()?;
            (self.make_writer(out), Some((tmp, target)))
        } else {
            (self.make_writer(stdout), None)
        };

        let mut in_txn = false;
        if self.config.transaction {
            conn.begin(self.config.isolation_level).await?;
            in_txn = true;
        }

        for (index, statement) in statements.iter().enumerate() {
            let started = Utc::now();
            // Only the first statement receives user-supplied params.
            let (sql, values) = if index == 0 {
                self.bind_params(statement)?
            } else {
                (statement.clone(), Vec::new())
            };

            let outcome: Result<(Option<u64>, Option<u64>), SqlError> = if returns_rows(&sql) {
                let mut sink = WriterRowSink { writer: writer.as_mut() };
                conn.query(&sql, &values, self.config.max_rows, &mut sink)
                    .await
                    .map(|rows| (Some(rows), None))
            } else {
                conn.execute(&sql, &values).await.map(|affected| (None, Some(affected)))
            };
            let finished = Utc::now();

            match outcome {
                Ok((rows_returned, rows_affected)) => {
                    let mut record = ExecutionMetrics::new(&sql, started, finished);
                    record.rows_returned = rows_returned;
                    record.rows_affected = rows_affected;
                    metrics::emit(stderr, &record);
                }
                Err(e) => {
                    metrics::emit(
                        stderr,
                        &ExecutionMetrics::new(&sql, started, finished).failed(e.to_string()),
                    );
                    // Deferred rollback: nothing committed yet, so this
                    // is always safe.
                    if in_txn {
                        if let Err(rb) = conn.rollback().await {
                            tracing::warn!(error = %rb, "rollback failed");
                        }
                    }
                    return Err(SqlError::Statement { index, message: e.to_string() });
                }
            }
        }

        if in_txn {
            if let Err(e) = conn.commit().await {
                if let Err(rb) = conn.rollback().await {
                    tracing::warn!(error = %rb, "rollback after failed commit failed");
                }
                return Err(e);
            }
        }

        writer.close()?;
        if let Some((tmp, target)) = rename {
            std::fs::rename(tmp, target)?;
        }
        Ok(())
    }

    async fn run_import_mode(
        &self,
        conn: &mut (dyn SqlConnection + '_),
        stderr: &mut (dyn Write + Send),
    ) -> Result<(), SqlError> {
        let Some(opts) = &self.config.import else {
            return Err(SqlError::Config("import options missing".to_string()));
        };
        let format = opts.format.unwrap_or_else(|| detect_format(&opts.input_file));
        let file = std::fs::File::open(&opts.input_file)?;
        let mut reader: Box<dyn InputReader> = match format {
            InputFormat::Csv => Box::new(CsvReader::new(
                file,
                opts.delimiter.map(|c| c as u8).unwrap_or(b','),
                opts.has_header,
                opts.columns.clone(),
                &opts.null_values,
            )?),
            InputFormat::Tsv => Box::new(CsvReader::new(
                file,
                opts.delimiter.map(|c| c as u8).unwrap_or(b'\t'),
                opts.has_header,
                opts.columns.clone(),
                &opts.null_values,
            )?),
            InputFormat::Jsonl => Box::new(JsonlReader::new(
                std::io::BufReader::new(file),
                opts.columns.clone(),
            )?),
        };

        let started = Utc::now();
        let (record, result) = run_import(
            conn,
            self.driver.as_ref(),
            opts,
            reader.as_mut(),
            started,
            Utc::now,
        )
        .await;
        metrics::emit(stderr, &record);
        result
    }
}

#[async_trait]
impl Executor for SqlExecutor {
    fn set_stdout(&mut self, w: Writer) {
        self.io.lock().stdout = Some(w);
    }

    fn set_stderr(&mut self, w: Writer) {
        self.io.lock().stderr = Some(w);
    }

    async fn run(&self, ctx: &CancellationToken) -> Result<(), ExecError> {
        let (stdout, stderr) = {
            let mut io = self.io.lock();
            (io.stdout.take(), io.stderr.take())
        };
        let stdout = stdout.unwrap_or_else(|| Box::new(std::io::sink()));
        let mut stderr = stderr.unwrap_or_else(|| Box::new(std::io::sink()));

        let timeout = self.config.timeout();
        let work = self.run_inner(stdout, stderr.as_mut());
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ExecError::Cancelled),
            _ = self.kill.cancelled() => Err(ExecError::Cancelled),
            result = tokio::time::timeout(timeout, work) => match result {
                Ok(result) => Ok(result?),
                Err(_) => Err(ExecError::Other(format!("sql execution timed out after {timeout:?}"))),
            },
        }
    }

    async fn kill(&self, _signal: Signal) -> Result<(), ExecError> {
        self.kill.cancel();
        Ok(())
    }
}

/// Register the built-in SQL executor types (and their drivers).
pub fn register_builtin() {
    driver::register_builtin_drivers();
    for kind in ["sqlite", "postgres"] {
        registry::register(
            kind,
            Capabilities::COMMAND | Capabilities::SCRIPT,
            Arc::new(move |_ctx, step| {
                Ok(Box::new(SqlExecutor::from_step(kind, step)?) as Box<dyn Executor>)
            }),
        );
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
