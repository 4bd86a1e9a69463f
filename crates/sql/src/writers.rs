// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result writers: JSONL, buffered JSON array, and CSV.

use crate::error::SqlError;
use crate::value::Value;
use std::io::Write;

/// Row-oriented output sink for query results.
pub trait ResultWriter: Send {
    fn write_header(&mut self, columns: &[String]) -> Result<(), SqlError>;
    fn write_row(&mut self, values: &[Value]) -> Result<(), SqlError>;
    fn flush(&mut self) -> Result<(), SqlError>;
    /// Finalize the output; buffered writers render here.
    fn close(&mut self) -> Result<(), SqlError>;
}

/// One JSON object per line.
pub struct JsonlWriter<W: Write + Send> {
    out: W,
    columns: Vec<String>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, columns: Vec::new() }
    }
}

impl<W: Write + Send> ResultWriter for JsonlWriter<W> {
    fn write_header(&mut self, columns: &[String]) -> Result<(), SqlError> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn write_row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        let mut obj = serde_json::Map::with_capacity(values.len());
        for (col, val) in self.columns.iter().zip(values) {
            obj.insert(col.clone(), val.to_json());
        }
        serde_json::to_writer(&mut self.out, &serde_json::Value::Object(obj))
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SqlError> {
        Ok(self.out.flush()?)
    }

    fn close(&mut self) -> Result<(), SqlError> {
        Ok(self.out.flush()?)
    }
}

/// Buffered array, pretty-printed at close.
pub struct JsonWriter<W: Write + Send> {
    out: W,
    columns: Vec<String>,
    rows: Vec<serde_json::Value>,
}

impl<W: Write + Send> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, columns: Vec::new(), rows: Vec::new() }
    }
}

impl<W: Write + Send> ResultWriter for JsonWriter<W> {
    fn write_header(&mut self, columns: &[String]) -> Result<(), SqlError> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn write_row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        let mut obj = serde_json::Map::with_capacity(values.len());
        for (col, val) in self.columns.iter().zip(values) {
            obj.insert(col.clone(), val.to_json());
        }
        self.rows.push(serde_json::Value::Object(obj));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SqlError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlError> {
        serde_json::to_writer_pretty(&mut self.out, &self.rows)
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        self.out.write_all(b"\n")?;
        Ok(self.out.flush()?)
    }
}

/// CSV with optional header row and a configurable NULL rendering.
pub struct CsvWriter<W: Write + Send> {
    inner: csv::Writer<W>,
    header: bool,
    null_string: String,
}

impl<W: Write + Send> CsvWriter<W> {
    pub fn new(out: W, header: bool, null_string: impl Into<String>) -> Self {
        Self {
            inner: csv::Writer::from_writer(out),
            header,
            null_string: null_string.into(),
        }
    }
}

impl<W: Write + Send> ResultWriter for CsvWriter<W> {
    fn write_header(&mut self, columns: &[String]) -> Result<(), SqlError> {
        if self.header {
            self.inner.write_record(columns)?;
        }
        Ok(())
    }

    fn write_row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        let fields: Vec<String> =
            values.iter().map(|v| v.to_csv_field(&self.null_string)).collect();
        self.inner.write_record(&fields)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SqlError> {
        Ok(self.inner.flush()?)
    }

    fn close(&mut self) -> Result<(), SqlError> {
        Ok(self.inner.flush()?)
    }
}

#[cfg(test)]
#[path = "writers_tests.rs"]
mod writers_tests;
