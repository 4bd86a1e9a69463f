// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk importer: batches rows from an input reader into multi-row
//! INSERTs in the driver's conflict dialect.

use crate::config::ImportOptions;
use crate::driver::{Driver, SqlConnection};
use crate::error::SqlError;
use crate::metrics::ImportMetrics;
use crate::readers::InputReader;
use crate::value::Value;
use chrono::{DateTime, Utc};

/// Run one import. The returned metrics always reflect what happened,
/// error or not; the result carries the failure.
pub async fn run_import(
    conn: &mut (dyn SqlConnection + '_),
    driver: &dyn Driver,
    opts: &ImportOptions,
    reader: &mut dyn InputReader,
    started_at: DateTime<Utc>,
    finished_at: impl Fn() -> DateTime<Utc>,
) -> (ImportMetrics, Result<(), SqlError>) {
    let mut metrics = ImportMetrics::new(started_at, started_at);
    let result = import_inner(conn, driver, opts, reader, &mut metrics).await;
    let done = finished_at();
    metrics.finished_at = done.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    metrics.duration_ms = (done - started_at).num_milliseconds().max(0) as u64;
    if let Err(e) = &result {
        metrics.status = "failed".to_string();
        metrics.error = Some(e.to_string());
    }
    (metrics, result)
}

async fn import_inner(
    conn: &mut (dyn SqlConnection + '_),
    driver: &dyn Driver,
    opts: &ImportOptions,
    reader: &mut dyn InputReader,
    metrics: &mut ImportMetrics,
) -> Result<(), SqlError> {
    // Explicit columns win over the header-derived ones.
    let columns = if opts.columns.is_empty() {
        reader.columns()?
    } else {
        opts.columns.clone()
    };
    if columns.is_empty() {
        return Err(SqlError::Import("no columns resolved for import".to_string()));
    }

    let mut batch: Vec<Vec<Value>> = Vec::with_capacity(opts.batch_size);
    let mut kept = 0u64;
    loop {
        // Break before reading more once the projected total would
        // exceed max_rows.
        if let Some(max) = opts.max_rows {
            if kept >= max {
                break;
            }
        }
        let Some(row) = reader.read_row()? else { break };
        metrics.rows_read += 1;
        if metrics.rows_skipped < opts.skip_rows {
            metrics.rows_skipped += 1;
            continue;
        }
        kept += 1;
        batch.push(row);
        if batch.len() >= opts.batch_size {
            flush_batch(conn, driver, opts, &columns, &mut batch, metrics).await?;
        }
    }
    if !batch.is_empty() {
        flush_batch(conn, driver, opts, &columns, &mut batch, metrics).await?;
    }
    Ok(())
}

async fn flush_batch(
    conn: &mut (dyn SqlConnection + '_),
    driver: &dyn Driver,
    opts: &ImportOptions,
    columns: &[String],
    batch: &mut Vec<Vec<Value>>,
    metrics: &mut ImportMetrics,
) -> Result<(), SqlError> {
    let rows = batch.len() as u64;
    if opts.dry_run {
        metrics.rows_imported += rows;
        batch.clear();
        return Ok(());
    }

    let sql = driver.build_insert_query(
        &opts.table,
        columns,
        batch.len(),
        opts.on_conflict,
        &opts.conflict_target,
        &opts.update_columns,
    )?;
    let mut values = Vec::with_capacity(batch.len() * columns.len());
    for row in batch.drain(..) {
        values.extend(row);
    }
    conn.execute(&sql, &values)
        .await
        .map_err(|e| SqlError::Import(format!("batch {} failed: {e}", metrics.batch_count + 1)))?;
    metrics.batch_count += 1;
    metrics.rows_imported += rows;
    Ok(())
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod import_tests;
