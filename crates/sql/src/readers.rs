// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input readers for bulk import: CSV/TSV and JSONL.

use crate::error::SqlError;
use crate::value::Value;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::{BufRead, Read};
use std::path::Path;

/// Supported import formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Csv,
    Tsv,
    Jsonl,
}

/// Detect format from the file extension; anything unknown reads as CSV.
pub fn detect_format(path: &Path) -> InputFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") => InputFormat::Tsv,
        Some("jsonl") | Some("ndjson") => InputFormat::Jsonl,
        _ => InputFormat::Csv,
    }
}

/// Row source feeding the importer.
pub trait InputReader: Send {
    /// Resolved column names (explicit config wins over the header).
    fn columns(&mut self) -> Result<Vec<String>, SqlError>;
    fn read_row(&mut self) -> Result<Option<Vec<Value>>, SqlError>;
}

/// CSV/TSV reader: lazy about quoting, trims field whitespace, maps
/// configured null markers to NULL.
pub struct CsvReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    columns: Vec<String>,
    null_values: HashSet<String>,
}

impl<R: Read> CsvReader<R> {
    pub fn new(
        input: R,
        delimiter: u8,
        has_header: bool,
        columns: Vec<String>,
        null_values: &[String],
    ) -> Result<Self, SqlError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(has_header)
            .flexible(true)
            .trim(csv::Trim::Fields)
            .from_reader(input);

        let columns = if !columns.is_empty() {
            columns
        } else if has_header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            return Err(SqlError::Config(
                "columns are required when the input has no header".to_string(),
            ));
        };

        Ok(Self {
            records: reader.into_records(),
            columns,
            null_values: null_values.iter().cloned().collect(),
        })
    }
}

impl<R: Read + Send> InputReader for CsvReader<R> {
    fn columns(&mut self) -> Result<Vec<String>, SqlError> {
        Ok(self.columns.clone())
    }

    fn read_row(&mut self) -> Result<Option<Vec<Value>>, SqlError> {
        let Some(record) = self.records.next() else { return Ok(None) };
        let record = record?;
        let row = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let cell = record.get(i).unwrap_or_default();
                if self.null_values.contains(cell) {
                    Value::Null
                } else {
                    Value::Text(cell.to_string())
                }
            })
            .collect();
        Ok(Some(row))
    }
}

/// JSONL reader: one object per line. Without explicit columns, the
/// first line defines them (sorted for determinism) and its row is
/// returned first, never skipped.
pub struct JsonlReader<R: BufRead> {
    lines: std::io::Lines<R>,
    columns: Vec<String>,
    pending: Option<Vec<Value>>,
}

impl<R: BufRead> JsonlReader<R> {
    pub fn new(input: R, columns: Vec<String>) -> Result<Self, SqlError> {
        let mut reader = Self { lines: input.lines(), columns, pending: None };
        if reader.columns.is_empty() {
            if let Some(obj) = reader.next_object()? {
                let mut derived: Vec<String> = obj.keys().cloned().collect();
                derived.sort();
                reader.columns = derived;
                reader.pending = Some(reader.project(&obj));
            }
        }
        Ok(reader)
    }

    fn next_object(
        &mut self,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>, SqlError> {
        for line in self.lines.by_ref() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| SqlError::Import(format!("bad jsonl line: {e}")))?;
            match value {
                serde_json::Value::Object(obj) => return Ok(Some(obj)),
                other => {
                    return Err(SqlError::Import(format!(
                        "jsonl rows must be objects, got {other}"
                    )))
                }
            }
        }
        Ok(None)
    }

    fn project(&self, obj: &serde_json::Map<String, serde_json::Value>) -> Vec<Value> {
        self.columns
            .iter()
            .map(|col| obj.get(col).map(Value::from_json).unwrap_or(Value::Null))
            .collect()
    }
}

impl<R: BufRead + Send> InputReader for JsonlReader<R> {
    fn columns(&mut self) -> Result<Vec<String>, SqlError> {
        Ok(self.columns.clone())
    }

    fn read_row(&mut self) -> Result<Option<Vec<Value>>, SqlError> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        match self.next_object()? {
            Some(obj) => Ok(Some(self.project(&obj))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "readers_tests.rs"]
mod readers_tests;
