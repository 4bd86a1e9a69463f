// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAG blueprint: steps, policies, preconditions, lifecycle handlers.

use crate::router::RouterConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default grace period between a cancel signal and SIGKILL escalation.
pub const DEFAULT_MAX_CLEANUP_TIME: Duration = Duration::from_secs(60);

/// Errors raised while validating a DAG blueprint.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),
    #[error("step {step} depends on unknown step {dep}")]
    UnknownDependency { step: String, dep: String },
    #[error("dependency cycle involving step {0}")]
    Cycle(String),
    #[error("router on step {step} routes to unknown step {target}")]
    UnknownRouteTarget { step: String, target: String },
}

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Scheduled,
}

crate::simple_display! {
    TriggerType {
        Manual => "manual",
        Scheduled => "scheduled",
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Retry policy for a failing step.
///
/// `exit_codes` empty means every non-zero exit retries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    #[serde(default)]
    pub exit_codes: Vec<i32>,
    #[serde(with = "duration_ms", default)]
    pub interval: Duration,
}

impl RetryPolicy {
    /// Whether a failure with `exit_code` is retryable on attempt `retried`.
    pub fn should_retry(&self, exit_code: Option<i32>, retried: u32) -> bool {
        if retried >= self.max {
            return false;
        }
        if self.exit_codes.is_empty() {
            return true;
        }
        match exit_code {
            Some(code) => self.exit_codes.contains(&code),
            None => false,
        }
    }
}

/// Repeat policy for a step that re-runs after success.
///
/// The step repeats until `count` iterations are done, or until
/// `stop_condition` evaluates true when one is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatPolicy {
    pub count: u32,
    #[serde(with = "duration_ms", default)]
    pub interval: Duration,
    #[serde(default)]
    pub stop_condition: Option<Precondition>,
}

/// A condition gating step execution.
///
/// `condition` holds the (already expanded) value under test; `expected`
/// is a literal for equality or `/…/` for a regex match. With no expected
/// value the condition itself must be truthy ("true" or "1").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub condition: String,
    #[serde(default)]
    pub expected: String,
}

#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("invalid precondition regex {pattern}: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },
}

impl Precondition {
    pub fn new(condition: impl Into<String>, expected: impl Into<String>) -> Self {
        Self { condition: condition.into(), expected: expected.into() }
    }

    /// Evaluate the condition against its expected value.
    pub fn is_met(&self) -> Result<bool, PreconditionError> {
        if self.expected.is_empty() {
            let v = self.condition.trim();
            return Ok(v == "true" || v == "1");
        }
        if let Some(pattern) = regex_literal(&self.expected) {
            let re = regex::Regex::new(pattern).map_err(|source| {
                PreconditionError::BadRegex { pattern: pattern.to_string(), source }
            })?;
            return Ok(re.is_match(&self.condition));
        }
        Ok(self.condition == self.expected)
    }
}

/// Returns the inner pattern when `s` is a `/…/` regex literal.
pub(crate) fn regex_literal(s: &str) -> Option<&str> {
    if s.len() >= 2 && s.starts_with('/') && s.ends_with('/') {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Reference to a nested DAG run by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDagRef {
    pub dag: String,
    #[serde(default)]
    pub params: String,
}

/// Executor selection: a type string plus an opaque config map the
/// executor back-end deserializes itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSelector {
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Default for StepSelector {
    fn default() -> Self {
        Self { kind: "command".to_string(), config: serde_json::Value::Null }
    }
}

/// Human-approval gate carried by a step.
///
/// An approval step does not run an executor; it parks in WaitingApproval
/// until the scheduler receives an approve/reject signal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub message: String,
}

/// One unit of work within a DAG.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub executor: StepSelector,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub repeat: Option<RepeatPolicy>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub router: Option<RouterConfig>,
    /// Signal name sent on stop (default SIGTERM).
    #[serde(default)]
    pub signal_on_stop: Option<String>,
    /// Variable name capturing the step's stdout.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub sub_dag: Option<SubDagRef>,
    #[serde(default)]
    pub approval: Option<ApprovalConfig>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

/// Lifecycle handler steps.
///
/// `on_init` runs before the first regular step, `on_exit` always runs
/// after the graph; exactly one of `on_success`/`on_failure`/`on_cancel`
/// runs based on the aggregate status; `on_wait` runs when a step first
/// enters WaitingApproval.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Handlers {
    #[serde(default)]
    pub on_init: Option<Step>,
    #[serde(default)]
    pub on_exit: Option<Step>,
    #[serde(default)]
    pub on_success: Option<Step>,
    #[serde(default)]
    pub on_failure: Option<Step>,
    #[serde(default)]
    pub on_cancel: Option<Step>,
    #[serde(default)]
    pub on_wait: Option<Step>,
}

/// Immutable DAG blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub handlers: Handlers,
    /// DAG-wide container config (opaque to core; consumed by the
    /// container executor for the run-long keepalive container).
    #[serde(default)]
    pub container: Option<serde_json::Value>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(with = "duration_ms", default = "default_cleanup")]
    pub max_cleanup_time: Duration,
    /// Concurrently running steps cap; 0 means unbounded.
    #[serde(default)]
    pub max_active_steps: usize,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_cleanup() -> Duration {
    DEFAULT_MAX_CLEANUP_TIME
}

impl Dag {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            handlers: Handlers::default(),
            container: None,
            preconditions: Vec::new(),
            max_cleanup_time: DEFAULT_MAX_CLEANUP_TIME,
            max_active_steps: 0,
            trigger_type: TriggerType::Manual,
            env: Vec::new(),
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Validate step-name uniqueness, dependency closure, route targets,
    /// and (defensively) acyclicity.
    pub fn validate(&self) -> Result<(), DagError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(DagError::DuplicateStep(step.name.clone()));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(DagError::UnknownDependency {
                        step: step.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
            if let Some(router) = &step.router {
                for target in router.all_targets() {
                    if !names.contains(target) {
                        return Err(DagError::UnknownRouteTarget {
                            step: step.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }
        self.check_cycles()
    }

    // Kahn's algorithm; surplus nodes after draining sit on a cycle.
    fn check_cycles(&self) -> Result<(), DagError> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            indegree.entry(step.name.as_str()).or_insert(0);
            for dep in &step.depends_on {
                *indegree.entry(step.name.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
            }
        }
        let mut queue: Vec<&str> =
            indegree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
        let mut drained = 0usize;
        while let Some(name) = queue.pop() {
            drained += 1;
            for next in dependents.get(name).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(next);
                    }
                }
            }
        }
        if drained != indegree.len() {
            let stuck = indegree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(n, _)| n.to_string())
                .unwrap_or_default();
            return Err(DagError::Cycle(stuck));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "dag_tests.rs"]
mod dag_tests;
