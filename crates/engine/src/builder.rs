// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-status builder: turns live scheduler state into an immutable
//! persistable snapshot.

use crate::context::RunContext;
use chrono::{DateTime, Utc};
use skein_core::{attempt_key, Dag, Node, RunStatus, Status};

/// Builder assembling a [`RunStatus`] snapshot from the DAG, the run
/// context, and whatever live state the scheduler hands it.
pub struct RunStatusBuilder<'a> {
    dag: &'a Dag,
    ctx: &'a RunContext,
    created_at: DateTime<Utc>,
    status: Status,
    nodes: Vec<Node>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    log: Option<std::path::PathBuf>,
    error: Option<String>,
    on_init: Option<Node>,
    on_exit: Option<Node>,
    on_success: Option<Node>,
    on_failure: Option<Node>,
    on_cancel: Option<Node>,
    on_wait: Option<Node>,
}

impl<'a> RunStatusBuilder<'a> {
    pub fn new(dag: &'a Dag, ctx: &'a RunContext, created_at: DateTime<Utc>) -> Self {
        Self {
            dag,
            ctx,
            created_at,
            status: Status::NotStarted,
            nodes: Vec::new(),
            started_at: None,
            finished_at: None,
            pid: None,
            log: None,
            error: None,
            on_init: None,
            on_exit: None,
            on_success: None,
            on_failure: None,
            on_cancel: None,
            on_wait: None,
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started_at = at;
        self
    }

    pub fn finished_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.finished_at = at;
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn log(mut self, path: std::path::PathBuf) -> Self {
        self.log = Some(path);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn on_init(mut self, node: Option<Node>) -> Self {
        self.on_init = node;
        self
    }

    pub fn on_exit(mut self, node: Option<Node>) -> Self {
        self.on_exit = node;
        self
    }

    pub fn on_success(mut self, node: Option<Node>) -> Self {
        self.on_success = node;
        self
    }

    pub fn on_failure(mut self, node: Option<Node>) -> Self {
        self.on_failure = node;
        self
    }

    pub fn on_cancel(mut self, node: Option<Node>) -> Self {
        self.on_cancel = node;
        self
    }

    pub fn on_wait(mut self, node: Option<Node>) -> Self {
        self.on_wait = node;
        self
    }

    pub fn build(self) -> RunStatus {
        let (root_name, root_id) = match &self.ctx.root {
            Some(root) => (root.name.as_str(), root.run_id.as_str()),
            None => (self.dag.name.as_str(), self.ctx.run_id.as_str()),
        };
        let key = attempt_key(
            root_name,
            root_id,
            &self.dag.name,
            self.ctx.run_id.as_str(),
            self.ctx.attempt_id.as_str(),
        );
        RunStatus {
            dag_name: self.dag.name.clone(),
            dag_run_id: self.ctx.run_id,
            attempt_id: self.ctx.attempt_id,
            attempt_key: key,
            root: self.ctx.root.clone(),
            parent: self.ctx.parent.clone(),
            status: self.status,
            pid: self.pid,
            queued_at: self.ctx.queued_at,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            log: self.log,
            preconditions: self.dag.preconditions.clone(),
            worker_id: self.ctx.worker_id.clone(),
            trigger_type: self.dag.trigger_type,
            scheduled_time: self.ctx.scheduled_time,
            nodes: self.nodes,
            on_init: self.on_init,
            on_exit: self.on_exit,
            on_success: self.on_success,
            on_failure: self.on_failure,
            on_cancel: self.on_cancel,
            on_wait: self.on_wait,
            error: self.error,
        }
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod builder_tests;
