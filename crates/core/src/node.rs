// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run step record and its status state machine.

use crate::clock::Clock;
use crate::id::RunId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Status of a node (and, by reduction, of a run).
///
/// Monotone except for the explicit retry/repeat transitions back into
/// Running, and the WaitingApproval side-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
    PartialSuccess,
    WaitingApproval,
}

crate::simple_display! {
    Status {
        NotStarted => "not_started",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
        Skipped => "skipped",
        PartialSuccess => "partial_success",
        WaitingApproval => "waiting_approval",
    }
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Succeeded
                | Status::Failed
                | Status::Cancelled
                | Status::Skipped
                | Status::PartialSuccess
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, Status::Running | Status::WaitingApproval)
    }
}

/// Reference to a nested run dispatched by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRunRef {
    pub dag_run_id: RunId,
    #[serde(default)]
    pub params: String,
}

/// One turn of an agent conversation attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Approval bookkeeping for a WaitingApproval node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalState {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub approval_inputs: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid status transition {from} -> {to} on step {step}")]
    InvalidTransition {
        step: String,
        from: Status,
        to: Status,
    },
    #[error("output variable {0} already captured")]
    DuplicateOutput(String),
}

/// A step's runtime record within one run.
///
/// Owned exclusively by the scheduler; snapshots are cloned whole so a
/// reader never observes a node torn across fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub step: String,
    pub status: Status,
    #[serde(default)]
    pub stdout: PathBuf,
    #[serde(default)]
    pub stderr: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub done_count: u32,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_runs: Vec<SubRunRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_runs_repeated: Vec<SubRunRef>,
    /// Captured output variables as `NAME=VALUE` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat_messages: Vec<ChatMessage>,
    #[serde(default, flatten)]
    pub approval: ApprovalState,
}

impl Node {
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into(), ..Default::default() }
    }

    /// Start (or restart, for retry/repeat) execution.
    pub fn mark_running<C: Clock>(&mut self, clock: &C) -> Result<(), NodeError> {
        match self.status {
            Status::NotStarted | Status::WaitingApproval => {
                self.started_at = Some(clock.now_utc());
            }
            // Retry keeps the original started_at; repeat restarts a
            // Succeeded node.
            Status::Running | Status::Succeeded => {}
            from => {
                return Err(self.bad_transition(from, Status::Running));
            }
        }
        self.status = Status::Running;
        Ok(())
    }

    /// Park the node until an external approve/reject signal.
    pub fn mark_waiting<C: Clock>(&mut self, clock: &C) -> Result<(), NodeError> {
        if self.status != Status::NotStarted {
            return Err(self.bad_transition(self.status, Status::WaitingApproval));
        }
        self.started_at = Some(clock.now_utc());
        self.status = Status::WaitingApproval;
        Ok(())
    }

    /// Drive the node to a terminal status.
    ///
    /// `finished_at` is clamped to never precede `started_at`.
    pub fn mark_finished<C: Clock>(
        &mut self,
        to: Status,
        error: Option<String>,
        clock: &C,
    ) -> Result<(), NodeError> {
        if !to.is_terminal() {
            return Err(self.bad_transition(self.status, to));
        }
        if self.status.is_terminal() && self.status != Status::Succeeded {
            return Err(self.bad_transition(self.status, to));
        }
        let now = clock.now_utc();
        self.finished_at = Some(match self.started_at {
            Some(start) if now < start => start,
            _ => now,
        });
        self.status = to;
        self.error = error;
        Ok(())
    }

    /// Record a retry: increments the count and stamps `retried_at`.
    pub fn record_retry<C: Clock>(&mut self, clock: &C) {
        self.retry_count += 1;
        self.retried_at = Some(clock.now_utc());
    }

    /// Record one completed execution (the initial run and every repeat).
    pub fn record_done(&mut self) {
        self.done_count += 1;
    }

    /// Record one completed repeat iteration.
    pub fn record_repeat(&mut self) {
        self.done_count += 1;
        self.repeated = true;
    }

    /// Record a dispatched sub-run. The first dispatch lands in
    /// `sub_runs`; repeat iterations append to `sub_runs_repeated`
    /// without replacing the original.
    pub fn push_sub_run(&mut self, sub: SubRunRef, repeat: bool) {
        if repeat {
            self.sub_runs_repeated.push(sub);
        } else {
            self.sub_runs.push(sub);
        }
    }

    /// Capture an output variable. At most one writer per variable.
    pub fn capture_output(&mut self, name: &str, value: &str) -> Result<(), NodeError> {
        let prefix = format!("{name}=");
        if self.output_variables.iter().any(|v| v.starts_with(&prefix)) {
            return Err(NodeError::DuplicateOutput(name.to_string()));
        }
        self.output_variables.push(format!("{name}={value}"));
        Ok(())
    }

    /// Look up a captured output variable by name.
    pub fn output_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.output_variables
            .iter()
            .find_map(|v| v.strip_prefix(&prefix))
    }

    fn bad_transition(&self, from: Status, to: Status) -> NodeError {
        NodeError::InvalidTransition { step: self.step.clone(), from, to }
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod node_tests;
