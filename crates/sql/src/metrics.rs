// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-statement and per-import metrics records, emitted as JSON lines
//! on the step's stderr stream.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash; also keys advisory locks.
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Query fingerprint for metrics records, displayed as hex.
pub fn query_hash(sql: &str) -> String {
    format!("{:016x}", fnv1a64(sql.as_bytes()))
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetrics {
    pub query_hash: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<u64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionMetrics {
    pub fn new(sql: &str, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            query_hash: query_hash(sql),
            started_at: rfc3339(started_at),
            finished_at: rfc3339(finished_at),
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            rows_affected: None,
            rows_returned: None,
            status: "completed".to_string(),
            error: None,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = "failed".to_string();
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportMetrics {
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub rows_read: u64,
    pub rows_imported: u64,
    pub rows_skipped: u64,
    pub batch_count: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportMetrics {
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            started_at: rfc3339(started_at),
            finished_at: rfc3339(finished_at),
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            rows_read: 0,
            rows_imported: 0,
            rows_skipped: 0,
            batch_count: 0,
            status: "completed".to_string(),
            error: None,
        }
    }
}

/// Write one metrics record as a JSON line.
pub fn emit<W: Write + ?Sized>(w: &mut W, record: &impl Serialize) {
    match serde_json::to_string(record) {
        Ok(line) => {
            let _ = writeln!(w, "{line}");
        }
        Err(e) => tracing::warn!(error = %e, "metrics serialization failed"),
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
