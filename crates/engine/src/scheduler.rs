// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step scheduler: walks the graph, launches ready steps, and
//! reduces node outcomes into the run status.

use crate::builder::RunStatusBuilder;
use crate::context::{ApprovalDecision, RunContext, SubDagRunner};
use crate::error::SchedulerError;
use crate::node::{ExecDeps, NodeEvent, NodeRuntime};
use crate::router::resolve_value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use skein_core::{
    aggregate_status, Clock, CompiledRouter, Dag, ExpressionEval, Node, RunStatus, Status, Step,
    SystemClock,
};
use skein_executor::ExecContext;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

type UpdateFn = dyn Fn(RunStatus) + Send + Sync;

#[derive(Default, Clone)]
struct HandlerNodes {
    on_init: Option<Node>,
    on_exit: Option<Node>,
    on_success: Option<Node>,
    on_failure: Option<Node>,
    on_cancel: Option<Node>,
    on_wait: Option<Node>,
}

/// Builds a [`Scheduler`]; validation and router compilation happen once
/// here, never on the hot path.
pub struct SchedulerBuilder<C: Clock = SystemClock> {
    dag: Dag,
    ctx: RunContext,
    clock: C,
    expr_eval: Option<Arc<dyn ExpressionEval>>,
    sub_runner: Option<Arc<dyn SubDagRunner>>,
    on_update: Option<Arc<UpdateFn>>,
}

impl SchedulerBuilder<SystemClock> {
    pub fn new(dag: Dag, ctx: RunContext) -> Self {
        Self {
            dag,
            ctx,
            clock: SystemClock,
            expr_eval: None,
            sub_runner: None,
            on_update: None,
        }
    }
}

impl<C: Clock + 'static> SchedulerBuilder<C> {
    pub fn clock<C2: Clock + 'static>(self, clock: C2) -> SchedulerBuilder<C2> {
        SchedulerBuilder {
            dag: self.dag,
            ctx: self.ctx,
            clock,
            expr_eval: self.expr_eval,
            sub_runner: self.sub_runner,
            on_update: self.on_update,
        }
    }

    pub fn expression_eval(mut self, eval: Arc<dyn ExpressionEval>) -> Self {
        self.expr_eval = Some(eval);
        self
    }

    pub fn sub_dag_runner(mut self, runner: Arc<dyn SubDagRunner>) -> Self {
        self.sub_runner = Some(runner);
        self
    }

    /// Observer invoked with a fresh snapshot on every significant
    /// transition (node status change, sub-run spawn, handler completion).
    pub fn on_update(mut self, f: impl Fn(RunStatus) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Scheduler<C>, SchedulerError> {
        self.dag.validate()?;

        let mut routers = HashMap::new();
        let mut router_targets: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, step) in self.dag.steps.iter().enumerate() {
            if let Some(cfg) = &step.router {
                let compiled = cfg.compile().map_err(|source| SchedulerError::Router {
                    step: step.name.clone(),
                    source,
                })?;
                for target in cfg.all_targets() {
                    let entry = router_targets.entry(target.to_string()).or_default();
                    if !entry.contains(&idx) {
                        entry.push(idx);
                    }
                }
                routers.insert(idx, compiled);
            }
        }

        let aggregate_log = self.ctx.log_dir.join("run.log");
        let nodes: Vec<Arc<NodeRuntime<C>>> = self
            .dag
            .steps
            .iter()
            .map(|step| {
                Arc::new(NodeRuntime::new(
                    step.clone(),
                    self.clock.clone(),
                    self.ctx.log_dir.clone(),
                    aggregate_log.clone(),
                ))
            })
            .collect();
        let index = self
            .dag
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let exec_ctx = ExecContext {
            dag_name: self.dag.name.clone(),
            run_id: self.ctx.run_id.to_string(),
            working_dir: None,
            env: self.dag.env.clone(),
        };

        Ok(Scheduler {
            inner: Arc::new(Inner {
                dag: self.dag,
                ctx: self.ctx,
                clock: self.clock,
                nodes,
                index,
                routers,
                router_targets,
                gates: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                cancel_signal: Mutex::new(None),
                expr_eval: self.expr_eval,
                sub_runner: self.sub_runner,
                on_update: self.on_update,
                approvals: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HandlerNodes::default()),
                created_at: Mutex::new(None),
                started_at: Mutex::new(None),
                finished_at: Mutex::new(None),
                exec_ctx,
                aggregate_log,
            }),
        })
    }
}

/// Cloneable handle onto one run's scheduler.
pub struct Scheduler<C: Clock + 'static = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock + 'static> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct Inner<C: Clock + 'static> {
    dag: Dag,
    ctx: RunContext,
    clock: C,
    nodes: Vec<Arc<NodeRuntime<C>>>,
    index: HashMap<String, usize>,
    routers: HashMap<usize, CompiledRouter>,
    /// Step name → indices of router steps that may target it.
    router_targets: HashMap<String, Vec<usize>>,
    /// Step name → whether any completed router selected it.
    gates: Mutex<HashMap<String, bool>>,
    cancel: CancellationToken,
    cancel_signal: Mutex<Option<Signal>>,
    expr_eval: Option<Arc<dyn ExpressionEval>>,
    sub_runner: Option<Arc<dyn SubDagRunner>>,
    on_update: Option<Arc<UpdateFn>>,
    approvals: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
    handlers: Mutex<HandlerNodes>,
    created_at: Mutex<Option<DateTime<Utc>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    exec_ctx: ExecContext,
    aggregate_log: PathBuf,
}

impl<C: Clock + 'static> Scheduler<C> {
    pub fn builder(dag: Dag, ctx: RunContext) -> SchedulerBuilder<SystemClock> {
        SchedulerBuilder::new(dag, ctx)
    }

    /// Run the DAG to completion or cancellation. Never panics; step
    /// failures reduce into the returned aggregate status.
    pub async fn schedule(&self) -> Result<RunStatus, SchedulerError> {
        let inner = &self.inner;
        {
            let mut created = inner.created_at.lock();
            if created.is_some() {
                return Err(SchedulerError::Step {
                    step: inner.dag.name.clone(),
                    message: "run already scheduled".to_string(),
                });
            }
            *created = Some(inner.clock.now_utc());
        }
        std::fs::create_dir_all(&inner.ctx.log_dir)?;
        *inner.started_at.lock() = Some(inner.clock.now_utc());
        tracing::info!(dag = %inner.dag.name, run_id = %inner.ctx.run_id, "run started");

        // onInit gates the whole graph; its failure is fatal for the run.
        if let Some(step) = inner.dag.handlers.on_init.clone() {
            let node = inner.run_handler(&step).await;
            let failed = !matches!(node.status, Status::Succeeded | Status::Skipped);
            let message = node.error.clone();
            inner.handlers.lock().on_init = Some(node);
            inner.emit();
            if failed {
                let error = format!(
                    "onInit failed: {}",
                    message.unwrap_or_else(|| "unknown error".to_string())
                );
                return Ok(inner.finish(Status::Failed, Some(error)).await);
            }
        }

        let precondition_unmet = inner
            .dag
            .preconditions
            .iter()
            .any(|p| !p.is_met().unwrap_or(false));
        if precondition_unmet {
            tracing::info!(dag = %inner.dag.name, "dag preconditions not met; skipping all steps");
            for node in &inner.nodes {
                node.set_skipped(Some("dag precondition not met".to_string()));
            }
        } else {
            Inner::run_graph(inner).await;
        }

        let nodes: Vec<Node> = inner.nodes.iter().map(|n| n.snapshot()).collect();
        let mut agg = aggregate_status(&nodes);
        if inner.cancel_signal.lock().is_some() && agg != Status::Failed {
            agg = Status::Cancelled;
        }
        Ok(inner.finish(agg, collect_errors(&nodes)).await)
    }

    /// Request cancellation. Idempotent; forwards the signal (or each
    /// step's `signal_on_stop`) to running executors and escalates to
    /// SIGKILL after the DAG's max cleanup time.
    pub fn cancel(&self, signal: Option<Signal>) {
        let sig = signal.unwrap_or(Signal::SIGTERM);
        {
            let mut slot = self.inner.cancel_signal.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(sig);
        }
        tracing::info!(dag = %self.inner.dag.name, signal = %sig, "cancelling run");
        self.inner.cancel.cancel();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            for node in &inner.nodes {
                if node.is_running() {
                    node.kill(sig).await;
                }
            }
            tokio::time::sleep(inner.dag.max_cleanup_time).await;
            for node in &inner.nodes {
                if node.is_running() {
                    tracing::warn!(step = %node.step.name, "escalating to SIGKILL");
                    node.kill_with(Signal::SIGKILL).await;
                }
            }
        });
    }

    /// Approve a WaitingApproval step.
    pub fn approve(
        &self,
        step: &str,
        by: &str,
        inputs: IndexMap<String, String>,
    ) -> Result<(), SchedulerError> {
        self.send_decision(
            step,
            ApprovalDecision { approved: true, by: by.to_string(), inputs, reason: None },
        )
    }

    /// Reject a WaitingApproval step; the node fails with the reason.
    pub fn reject(&self, step: &str, by: &str, reason: &str) -> Result<(), SchedulerError> {
        self.send_decision(
            step,
            ApprovalDecision {
                approved: false,
                by: by.to_string(),
                inputs: IndexMap::new(),
                reason: Some(reason.to_string()),
            },
        )
    }

    /// Current run snapshot.
    pub fn snapshot(&self) -> RunStatus {
        self.inner.snapshot_status(None, None)
    }

    fn send_decision(&self, step: &str, decision: ApprovalDecision) -> Result<(), SchedulerError> {
        let sender = self.inner.approvals.lock().remove(step);
        match sender {
            Some(tx) => tx.send(decision).map_err(|_| SchedulerError::NotWaiting {
                step: step.to_string(),
            }),
            None => Err(SchedulerError::NotWaiting { step: step.to_string() }),
        }
    }
}

impl<C: Clock + 'static> Inner<C> {
    async fn run_graph(inner: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<NodeEvent>();
        let permits = match inner.dag.max_active_steps {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut launched = vec![false; inner.nodes.len()];
        let mut inflight = 0usize;
        let mut on_wait_task: Option<tokio::task::JoinHandle<Node>> = None;

        loop {
            let ready = inner.scan(&mut launched);
            for idx in ready {
                inflight += 1;
                let task_inner = inner.clone();
                let task_tx = tx.clone();
                let sem = semaphore.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        let _ = task_tx.send(NodeEvent::Done(idx));
                        return;
                    };
                    task_inner.run_node(idx, &task_tx).await;
                    let _ = task_tx.send(NodeEvent::Done(idx));
                });
            }

            if inner.all_terminal() {
                break;
            }
            if inflight == 0 {
                // Nothing running and nothing launchable: only reachable
                // when gates/cancellation starved the remainder.
                for node in &inner.nodes {
                    if !node.status().is_terminal() {
                        node.set_skipped(Some("unreachable".to_string()));
                    }
                }
                break;
            }

            match rx.recv().await {
                Some(NodeEvent::Done(idx)) => {
                    inflight -= 1;
                    inner.apply_router(idx);
                    inner.emit();
                }
                Some(NodeEvent::Transition(_)) => inner.emit(),
                Some(NodeEvent::Waiting(_)) => {
                    inner.emit();
                    if on_wait_task.is_none() {
                        if let Some(step) = inner.dag.handlers.on_wait.clone() {
                            let task_inner = inner.clone();
                            on_wait_task = Some(tokio::spawn(async move {
                                task_inner.run_handler(&step).await
                            }));
                        }
                    }
                }
                None => break,
            }
        }

        if let Some(task) = on_wait_task {
            if let Ok(node) = task.await {
                inner.handlers.lock().on_wait = Some(node);
            }
        }
    }

    async fn run_node(&self, idx: usize, tx: &mpsc::UnboundedSender<NodeEvent>) {
        let deps = ExecDeps {
            exec_ctx: &self.exec_ctx,
            sub_runner: self.sub_runner.as_deref(),
            run_ctx: &self.ctx,
            cancel: &self.cancel,
            approvals: &self.approvals,
        };
        self.nodes[idx].execute(idx, &deps, tx).await;
    }

    /// Collect newly-ready steps (declaration order) and resolve skips to
    /// a fixpoint so cascades settle in one pass.
    fn scan(&self, launched: &mut [bool]) -> Vec<usize> {
        let mut ready = Vec::new();
        loop {
            let mut changed = false;
            for idx in 0..self.nodes.len() {
                if launched[idx] {
                    continue;
                }
                let node = &self.nodes[idx];
                if node.status() != Status::NotStarted {
                    launched[idx] = true;
                    continue;
                }
                if self.cancel.is_cancelled() {
                    node.set_cancelled(Some("run cancelled".to_string()));
                    launched[idx] = true;
                    changed = true;
                    continue;
                }

                let mut blocked = false;
                let mut dep_failed = false;
                for dep in &node.step.depends_on {
                    let Some(dep_idx) = self.index.get(dep) else { continue };
                    let status = self.nodes[*dep_idx].status();
                    if !status.is_terminal() {
                        blocked = true;
                        break;
                    }
                    if matches!(status, Status::Failed | Status::Cancelled) {
                        dep_failed = true;
                    }
                }
                if blocked {
                    continue;
                }
                if dep_failed {
                    node.set_skipped(Some("upstream step failed".to_string()));
                    launched[idx] = true;
                    changed = true;
                    continue;
                }

                if let Some(parents) = self.router_targets.get(&node.step.name) {
                    if parents.iter().any(|p| !self.nodes[*p].status().is_terminal()) {
                        continue;
                    }
                    let gate = self.gates.lock().get(&node.step.name).copied();
                    if gate != Some(true) {
                        node.set_skipped(Some("not selected by router".to_string()));
                        launched[idx] = true;
                        changed = true;
                        continue;
                    }
                }

                launched[idx] = true;
                ready.push(idx);
                changed = true;
            }
            if !changed {
                break;
            }
        }
        ready
    }

    /// After a router step completes, record which targets it selected.
    /// Multiple routers targeting one step OR their selections.
    fn apply_router(&self, idx: usize) {
        let Some(compiled) = self.routers.get(&idx) else { return };
        let node = &self.nodes[idx];
        let Some(cfg) = node.step.router.as_ref() else { return };
        let snapshot = node.snapshot();

        if snapshot.status == Status::Succeeded {
            let exit_code = node.last_exit_code();
            let value = resolve_value(&cfg.value, &snapshot, exit_code);
            let selected: HashSet<String> =
                match compiled.select(&value, exit_code, self.expr_eval.as_deref()) {
                    Ok(v) => v.into_iter().collect(),
                    Err(e) => {
                        tracing::warn!(
                            step = %node.step.name,
                            error = %e,
                            "router evaluation failed; falling back to default routes"
                        );
                        compiled.default.iter().cloned().collect()
                    }
                };
            tracing::info!(step = %node.step.name, value = %value, targets = ?selected, "router selected");
            let mut gates = self.gates.lock();
            for target in cfg.all_targets() {
                let hit = selected.contains(target);
                gates
                    .entry(target.to_string())
                    .and_modify(|g| *g = *g || hit)
                    .or_insert(hit);
            }
        } else {
            let mut gates = self.gates.lock();
            for target in cfg.all_targets() {
                gates.entry(target.to_string()).or_insert(false);
            }
        }
    }

    /// Run one lifecycle handler step to completion and return its node.
    async fn run_handler(&self, step: &Step) -> Node {
        tracing::debug!(handler = %step.name, "running lifecycle handler");
        let rt = NodeRuntime::new(
            step.clone(),
            self.clock.clone(),
            self.ctx.log_dir.clone(),
            self.aggregate_log.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let deps = ExecDeps {
            exec_ctx: &self.exec_ctx,
            sub_runner: self.sub_runner.as_deref(),
            run_ctx: &self.ctx,
            cancel: &self.cancel,
            approvals: &self.approvals,
        };
        rt.execute(0, &deps, &tx).await;
        while rx.try_recv().is_ok() {}
        rt.snapshot()
    }

    /// Run the terminal-status handler and onExit, then build the final
    /// record. Exactly one of onSuccess/onFailure/onCancel runs.
    async fn finish(&self, mut status: Status, mut error: Option<String>) -> RunStatus {
        let terminal_handler = match status {
            Status::Failed => self.dag.handlers.on_failure.clone().map(|s| ("onFailure", s)),
            Status::Cancelled => self.dag.handlers.on_cancel.clone().map(|s| ("onCancel", s)),
            _ => self.dag.handlers.on_success.clone().map(|s| ("onSuccess", s)),
        };
        if let Some((kind, step)) = terminal_handler {
            let node = self.run_handler(&step).await;
            let failed = node.status == Status::Failed;
            let message = node.error.clone();
            {
                let mut handlers = self.handlers.lock();
                match kind {
                    "onFailure" => handlers.on_failure = Some(node),
                    "onCancel" => handlers.on_cancel = Some(node),
                    _ => handlers.on_success = Some(node),
                }
            }
            if failed {
                status = Status::Failed;
                let msg = format!(
                    "{kind} failed: {}",
                    message.unwrap_or_else(|| "unknown error".to_string())
                );
                error = Some(match error {
                    Some(prev) => format!("{prev}; {msg}"),
                    None => msg,
                });
            }
            self.emit();
        }

        if let Some(step) = self.dag.handlers.on_exit.clone() {
            let node = self.run_handler(&step).await;
            let failed = node.status == Status::Failed;
            let message = node.error.clone();
            self.handlers.lock().on_exit = Some(node);
            if failed {
                status = Status::Failed;
                let msg = format!(
                    "onExit failed: {}",
                    message.unwrap_or_else(|| "unknown error".to_string())
                );
                error = Some(match error {
                    Some(prev) => format!("{prev}; {msg}"),
                    None => msg,
                });
            }
            self.emit();
        }

        *self.finished_at.lock() = Some(self.clock.now_utc());
        let final_status = self.snapshot_status(Some(status), error);
        tracing::info!(
            dag = %self.dag.name,
            run_id = %self.ctx.run_id,
            status = %final_status.status,
            "run finished"
        );
        if let Some(cb) = &self.on_update {
            cb(final_status.clone());
        }
        final_status
    }

    fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status().is_terminal())
    }

    fn emit(&self) {
        if let Some(cb) = &self.on_update {
            cb(self.snapshot_status(None, None));
        }
    }

    fn snapshot_status(&self, status: Option<Status>, error: Option<String>) -> RunStatus {
        let nodes: Vec<Node> = self.nodes.iter().map(|n| n.snapshot()).collect();
        let agg = status.unwrap_or_else(|| aggregate_status(&nodes));
        let error = error.or_else(|| collect_errors(&nodes));
        let handlers = self.handlers.lock().clone();
        let created_at = self.created_at.lock().unwrap_or_else(|| self.clock.now_utc());
        RunStatusBuilder::new(&self.dag, &self.ctx, created_at)
            .status(agg)
            .nodes(nodes)
            .started_at(*self.started_at.lock())
            .finished_at(*self.finished_at.lock())
            .pid(std::process::id())
            .log(self.aggregate_log.clone())
            .error(error)
            .on_init(handlers.on_init)
            .on_exit(handlers.on_exit)
            .on_success(handlers.on_success)
            .on_failure(handlers.on_failure)
            .on_cancel(handlers.on_cancel)
            .on_wait(handlers.on_wait)
            .build()
    }
}

/// Wrap each failed step's error with its name and join them.
fn collect_errors(nodes: &[Node]) -> Option<String> {
    let messages: Vec<String> = nodes
        .iter()
        .filter(|n| n.status == Status::Failed)
        .map(|n| {
            format!(
                "step {}: {}",
                n.step,
                n.error.as_deref().unwrap_or("failed")
            )
        })
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;
