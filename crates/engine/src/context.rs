// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run context and the consumed boundaries the scheduler depends on.

use crate::error::SchedulerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use skein_core::{AttemptId, RunId, RunRef, Status, SubRunRef};
use std::path::PathBuf;

/// Identity and environment of one run attempt.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub attempt_id: AttemptId,
    /// Root of the sub-run hierarchy; None for a top-level run.
    pub root: Option<RunRef>,
    /// Direct parent run; None for a top-level run.
    pub parent: Option<RunRef>,
    /// Directory receiving per-step and aggregate log files.
    pub log_dir: PathBuf,
    pub worker_id: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl RunContext {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: RunId::new(),
            attempt_id: AttemptId::new(),
            root: None,
            parent: None,
            log_dir: log_dir.into(),
            worker_id: None,
            queued_at: None,
            scheduled_time: None,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }
}

/// Result of one dispatched sub-run.
#[derive(Debug, Clone)]
pub struct SubRunOutcome {
    pub run_ref: SubRunRef,
    pub status: Status,
}

/// Consumed boundary: launches a nested DAG run on behalf of a step and
/// blocks until it reaches a terminal status.
#[async_trait]
pub trait SubDagRunner: Send + Sync {
    async fn run(
        &self,
        parent: &RunContext,
        dag: &str,
        params: &str,
    ) -> Result<SubRunOutcome, SchedulerError>;
}

/// External approve/reject signal for a WaitingApproval step.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub by: String,
    pub inputs: IndexMap<String, String>,
    pub reason: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(by: impl Into<String>) -> Self {
        Self { approved: true, by: by.into(), inputs: IndexMap::new(), reason: None }
    }

    pub fn reject(by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            by: by.into(),
            inputs: IndexMap::new(),
            reason: Some(reason.into()),
        }
    }
}
