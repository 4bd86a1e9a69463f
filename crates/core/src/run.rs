// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistable run record and run-level derivations.

use crate::dag::{Precondition, TriggerType};
use crate::id::{AttemptId, RunId};
use crate::node::{Node, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Reference to another run (parent or root of a sub-run hierarchy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRef {
    pub name: String,
    pub run_id: RunId,
}

/// Deterministic identifier for one attempt of a run within its sub-run
/// hierarchy. Equal inputs yield byte-equal keys.
pub fn attempt_key(
    root_name: &str,
    root_id: &str,
    dag_name: &str,
    run_id: &str,
    attempt_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    // Length-prefix each field so ("ab","c") never collides with ("a","bc").
    for field in [root_name, root_id, dag_name, run_id, attempt_id] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in &digest[..16] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Reduce node statuses to the aggregate run status.
///
/// Any Failed wins, else any Cancelled, else any PartialSuccess, else all
/// Succeeded/Skipped reduce to Succeeded. Active nodes reduce to Running.
pub fn aggregate_status(nodes: &[Node]) -> Status {
    let mut any_running = false;
    let mut any_failed = false;
    let mut any_cancelled = false;
    let mut any_partial = false;
    for node in nodes {
        match node.status {
            Status::Failed => any_failed = true,
            Status::Cancelled => any_cancelled = true,
            Status::PartialSuccess => any_partial = true,
            Status::Running | Status::WaitingApproval => any_running = true,
            Status::Succeeded | Status::NotStarted | Status::Skipped => {}
        }
    }
    if any_failed {
        Status::Failed
    } else if any_cancelled {
        Status::Cancelled
    } else if any_running {
        Status::Running
    } else if any_partial {
        Status::PartialSuccess
    } else if nodes.is_empty() || nodes.iter().all(|n| n.status == Status::NotStarted) {
        Status::NotStarted
    } else {
        Status::Succeeded
    }
}

/// The persistable record of one run attempt (stable field set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub dag_name: String,
    pub dag_run_id: RunId,
    pub attempt_id: AttemptId,
    pub attempt_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<RunRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RunRef>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Precondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_init: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_cancel: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_wait: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStatus {
    pub fn node(&self, step: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.step == step)
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod run_tests;
