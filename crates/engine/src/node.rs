// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-step runtime: drives one node through preconditions, approval,
//! executor attempts with retries, and repeat iterations.

use crate::context::{ApprovalDecision, RunContext, SubDagRunner};
use crate::signal::signal_from_name;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use skein_core::{Clock, Node, Status, Step, SubDagRef};
use skein_executor::{
    parse_exit_code, registry, ExecContext, ExecError, Executor, MultiWriter, TailBuf, TailWriter,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Cap on bytes captured into an output variable.
const MAX_OUTPUT_CAPTURE: usize = 1024 * 1024;

/// Events the node task reports to the scheduler coordinator.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NodeEvent {
    /// Status or bookkeeping changed; a snapshot checkpoint is due.
    Transition(usize),
    /// The node entered WaitingApproval.
    Waiting(usize),
    /// The node reached a terminal status.
    Done(usize),
}

/// Dependencies threaded into one node execution.
pub(crate) struct ExecDeps<'a> {
    pub exec_ctx: &'a ExecContext,
    pub sub_runner: Option<&'a dyn SubDagRunner>,
    pub run_ctx: &'a RunContext,
    pub cancel: &'a CancellationToken,
    pub approvals: &'a Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

enum AttemptError {
    Cancelled,
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
}

/// Buffer capturing step stdout for the `output` variable, capped so a
/// chatty step cannot balloon the run record.
#[derive(Clone)]
struct CaptureBuf {
    inner: Arc<Mutex<Vec<u8>>>,
    cap: usize,
}

impl CaptureBuf {
    fn new(cap: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())), cap }
    }

    fn contents_trimmed(&self) -> String {
        let buf = self.inner.lock();
        String::from_utf8_lossy(&buf).trim_end_matches('\n').to_string()
    }
}

impl Write for CaptureBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.inner.lock();
        let room = self.cap.saturating_sub(buf.len());
        buf.extend_from_slice(&data[..data.len().min(room)]);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runtime wrapper around one [`Node`]. The scheduler owns all node
/// runtimes; executors only ever borrow writers and a cancel token.
pub(crate) struct NodeRuntime<C: Clock> {
    pub(crate) step: Step,
    clock: C,
    data: Mutex<Node>,
    running: Mutex<Option<Arc<dyn Executor>>>,
    exit_code: Mutex<Option<i32>>,
    log_dir: PathBuf,
    aggregate_log: PathBuf,
}

impl<C: Clock> NodeRuntime<C> {
    pub(crate) fn new(step: Step, clock: C, log_dir: PathBuf, aggregate_log: PathBuf) -> Self {
        let data = Mutex::new(Node::new(&step.name));
        Self {
            step,
            clock,
            data,
            running: Mutex::new(None),
            exit_code: Mutex::new(None),
            log_dir,
            aggregate_log,
        }
    }

    pub(crate) fn snapshot(&self) -> Node {
        self.data.lock().clone()
    }

    pub(crate) fn status(&self) -> Status {
        self.data.lock().status
    }

    pub(crate) fn last_exit_code(&self) -> i32 {
        self.exit_code.lock().unwrap_or(0)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Forward a stop signal to the in-flight executor, honoring the
    /// step's `signal_on_stop` override.
    pub(crate) async fn kill(&self, default_signal: Signal) {
        let signal = self
            .step
            .signal_on_stop
            .as_deref()
            .map(signal_from_name)
            .unwrap_or(default_signal);
        self.kill_with(signal).await;
    }

    /// Forward an exact signal (SIGKILL escalation path).
    pub(crate) async fn kill_with(&self, signal: Signal) {
        let exec = self.running.lock().clone();
        if let Some(exec) = exec {
            if let Err(e) = exec.kill(signal).await {
                tracing::warn!(step = %self.step.name, signal = %signal, error = %e, "kill failed");
            }
        }
    }

    pub(crate) fn set_skipped(&self, reason: Option<String>) {
        let mut data = self.data.lock();
        if let Err(e) = data.mark_finished(Status::Skipped, reason, &self.clock) {
            tracing::warn!(step = %self.step.name, error = %e, "skip transition rejected");
        }
    }

    pub(crate) fn set_cancelled(&self, reason: Option<String>) {
        let mut data = self.data.lock();
        if let Err(e) = data.mark_finished(Status::Cancelled, reason, &self.clock) {
            tracing::warn!(step = %self.step.name, error = %e, "cancel transition rejected");
        }
    }

    /// Drive the node to a terminal status. The caller reports
    /// [`NodeEvent::Done`] when this returns.
    pub(crate) async fn execute(
        &self,
        idx: usize,
        deps: &ExecDeps<'_>,
        tx: &mpsc::UnboundedSender<NodeEvent>,
    ) {
        // Preconditions: unmet means Skipped, never an error.
        for p in &self.step.preconditions {
            match p.is_met() {
                Ok(true) => {}
                Ok(false) => {
                    self.set_skipped(Some(format!(
                        "precondition not met: {} != {}",
                        p.condition, p.expected
                    )));
                    return;
                }
                Err(e) => {
                    self.set_skipped(Some(e.to_string()));
                    return;
                }
            }
        }

        if self.step.approval.is_some() {
            self.approval_gate(idx, deps, tx).await;
            return;
        }

        if self.run_with_retries(idx, deps, tx, false).await.is_err() {
            return;
        }
        {
            let mut data = self.data.lock();
            data.record_done();
            if let Err(e) = data.mark_finished(Status::Succeeded, None, &self.clock) {
                tracing::warn!(step = %self.step.name, error = %e, "success transition rejected");
            }
        }
        let _ = tx.send(NodeEvent::Transition(idx));

        if let Some(repeat) = self.step.repeat.clone() {
            self.repeat_loop(idx, deps, tx, &repeat).await;
        }
    }

    /// Repeat Succeeded → Running → Succeeded until the policy stops it.
    async fn repeat_loop(
        &self,
        idx: usize,
        deps: &ExecDeps<'_>,
        tx: &mpsc::UnboundedSender<NodeEvent>,
        repeat: &skein_core::RepeatPolicy,
    ) {
        loop {
            if deps.cancel.is_cancelled() {
                return;
            }
            let more = match &repeat.stop_condition {
                Some(cond) => !cond.is_met().unwrap_or(true),
                None => self.data.lock().done_count < repeat.count,
            };
            if !more {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(repeat.interval) => {}
                _ = deps.cancel.cancelled() => return,
            }
            if self.run_with_retries(idx, deps, tx, true).await.is_err() {
                return;
            }
            {
                let mut data = self.data.lock();
                data.record_repeat();
                if let Err(e) = data.mark_finished(Status::Succeeded, None, &self.clock) {
                    tracing::warn!(step = %self.step.name, error = %e, "repeat transition rejected");
                }
            }
            let _ = tx.send(NodeEvent::Transition(idx));
        }
    }

    /// One logical execution: retries sequentially until success, a
    /// non-retryable failure, or cancellation. Terminal failure states are
    /// written here; success is left to the caller.
    async fn run_with_retries(
        &self,
        idx: usize,
        deps: &ExecDeps<'_>,
        tx: &mpsc::UnboundedSender<NodeEvent>,
        is_repeat: bool,
    ) -> Result<(), ()> {
        loop {
            {
                let mut data = self.data.lock();
                if let Err(e) = data.mark_running(&self.clock) {
                    tracing::warn!(step = %self.step.name, error = %e, "run transition rejected");
                    return Err(());
                }
            }
            let _ = tx.send(NodeEvent::Transition(idx));

            let attempt = if let Some(sub) = &self.step.sub_dag {
                self.dispatch_sub_run(sub, deps, is_repeat).await
            } else {
                self.run_executor(deps).await
            };

            match attempt {
                Ok(()) => return Ok(()),
                Err(AttemptError::Cancelled) => {
                    self.set_cancelled(Some("cancelled".to_string()));
                    return Err(());
                }
                Err(AttemptError::Failed { exit_code, message }) => {
                    let retried = self.data.lock().retry_count;
                    if self.step.retry.should_retry(exit_code, retried) {
                        {
                            self.data.lock().record_retry(&self.clock);
                        }
                        let _ = tx.send(NodeEvent::Transition(idx));
                        tracing::info!(
                            step = %self.step.name,
                            retry = retried + 1,
                            max = self.step.retry.max,
                            "retrying after {message}"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.step.retry.interval) => continue,
                            _ = deps.cancel.cancelled() => {
                                self.set_cancelled(Some("cancelled".to_string()));
                                return Err(());
                            }
                        }
                    }
                    let mut data = self.data.lock();
                    if let Err(e) =
                        data.mark_finished(Status::Failed, Some(message), &self.clock)
                    {
                        tracing::warn!(step = %self.step.name, error = %e, "fail transition rejected");
                    }
                    return Err(());
                }
            }
        }
    }

    /// One executor invocation with fresh writers.
    async fn run_executor(&self, deps: &ExecDeps<'_>) -> Result<(), AttemptError> {
        let stdout_path = self.log_dir.join(format!("{}.out.log", self.step.name));
        let stderr_path = self.log_dir.join(format!("{}.err.log", self.step.name));
        {
            let mut data = self.data.lock();
            data.stdout = stdout_path.clone();
            data.stderr = stderr_path.clone();
        }

        let capture = self.step.output.as_ref().map(|_| CaptureBuf::new(MAX_OUTPUT_CAPTURE));
        let tail = TailBuf::default();
        let (stdout_w, stderr_w) = self
            .open_writers(&stdout_path, &stderr_path, capture.clone(), tail.clone())
            .map_err(|e| AttemptError::Failed { exit_code: None, message: e.to_string() })?;

        let mut exec = registry::create(&self.step.executor.kind, deps.exec_ctx, &self.step)
            .map_err(|e| AttemptError::Failed { exit_code: None, message: e.to_string() })?;
        exec.set_stdout(stdout_w);
        exec.set_stderr(stderr_w);
        let exec: Arc<dyn Executor> = Arc::from(exec);

        // Seed conversation history on agent back-ends.
        if let Some(chat) = exec.chat() {
            let prior = self.data.lock().chat_messages.clone();
            if !prior.is_empty() {
                chat.set_context(prior);
            }
        }

        *self.running.lock() = Some(exec.clone());
        let result = exec.run(deps.cancel).await;
        *self.running.lock() = None;

        let code = exec.exit_code().or_else(|| match &result {
            Ok(()) => Some(0),
            // Structured accessor preferred; fall back to the error text.
            Err(e) => e.exit_code().or_else(|| parse_exit_code(&e.to_string())),
        });
        *self.exit_code.lock() = code;

        if let Some(chat) = exec.chat() {
            self.data.lock().chat_messages = chat.messages();
        }

        match result {
            Ok(()) => {
                if let (Some(name), Some(cap)) = (&self.step.output, capture) {
                    let value = cap.contents_trimmed();
                    if let Err(e) = self.data.lock().capture_output(name, &value) {
                        tracing::warn!(step = %self.step.name, error = %e, "output capture rejected");
                    }
                }
                Ok(())
            }
            Err(ExecError::Cancelled) => Err(AttemptError::Cancelled),
            Err(e) if deps.cancel.is_cancelled() => {
                tracing::debug!(step = %self.step.name, error = %e, "failed during cancellation");
                Err(AttemptError::Cancelled)
            }
            Err(e) => Err(AttemptError::Failed {
                exit_code: code,
                message: tail.annotate(&e.to_string()),
            }),
        }
    }

    fn open_writers(
        &self,
        stdout_path: &PathBuf,
        stderr_path: &PathBuf,
        capture: Option<CaptureBuf>,
        tail: TailBuf,
    ) -> std::io::Result<(skein_executor::Writer, skein_executor::Writer)> {
        std::fs::create_dir_all(&self.log_dir)?;
        let open = |path: &PathBuf| {
            std::fs::OpenOptions::new().create(true).append(true).open(path)
        };

        let mut out = MultiWriter::new().with(Box::new(open(stdout_path)?));
        let mut err = MultiWriter::new().with(Box::new(open(stderr_path)?));
        // Run-wide aggregate stream shared by every step.
        out.push(Box::new(open(&self.aggregate_log)?));
        err.push(Box::new(open(&self.aggregate_log)?));
        if let Some(cap) = capture {
            out.push(Box::new(cap));
        }
        Ok((Box::new(out), Box::new(TailWriter::new(err, tail))))
    }

    async fn dispatch_sub_run(
        &self,
        sub: &SubDagRef,
        deps: &ExecDeps<'_>,
        is_repeat: bool,
    ) -> Result<(), AttemptError> {
        let Some(runner) = deps.sub_runner else {
            return Err(AttemptError::Failed {
                exit_code: None,
                message: format!("no sub-dag runner configured (dag {})", sub.dag),
            });
        };

        let outcome = tokio::select! {
            outcome = runner.run(deps.run_ctx, &sub.dag, &sub.params) => outcome,
            _ = deps.cancel.cancelled() => return Err(AttemptError::Cancelled),
        };

        match outcome {
            Ok(outcome) => {
                {
                    let mut data = self.data.lock();
                    let repeat_slot = is_repeat || !data.sub_runs.is_empty();
                    data.push_sub_run(outcome.run_ref, repeat_slot);
                }
                match outcome.status {
                    Status::Succeeded | Status::PartialSuccess | Status::Skipped => Ok(()),
                    Status::Cancelled => Err(AttemptError::Cancelled),
                    status => Err(AttemptError::Failed {
                        exit_code: None,
                        message: format!("sub-run of dag {} finished {status}", sub.dag),
                    }),
                }
            }
            Err(e) => Err(AttemptError::Failed { exit_code: None, message: e.to_string() }),
        }
    }

    /// Approval steps are pure gates: WaitingApproval until an external
    /// signal resolves them to Succeeded or Failed.
    async fn approval_gate(
        &self,
        idx: usize,
        deps: &ExecDeps<'_>,
        tx: &mpsc::UnboundedSender<NodeEvent>,
    ) {
        // Register the decision channel before going visible as
        // WaitingApproval, so an approve racing the transition still
        // finds its sender.
        let (decision_tx, decision_rx) = oneshot::channel();
        deps.approvals.lock().insert(self.step.name.clone(), decision_tx);
        {
            let mut data = self.data.lock();
            if let Err(e) = data.mark_waiting(&self.clock) {
                tracing::warn!(step = %self.step.name, error = %e, "wait transition rejected");
                deps.approvals.lock().remove(&self.step.name);
                return;
            }
        }
        let _ = tx.send(NodeEvent::Waiting(idx));

        let decision = tokio::select! {
            d = decision_rx => d.ok(),
            _ = deps.cancel.cancelled() => None,
        };
        deps.approvals.lock().remove(&self.step.name);

        let now = self.clock.now_utc();
        match decision {
            None => self.set_cancelled(Some("cancelled while waiting for approval".to_string())),
            Some(d) if d.approved => {
                let mut data = self.data.lock();
                data.approval.approved_at = Some(now);
                data.approval.approved_by = Some(d.by);
                data.approval.approval_inputs = d.inputs;
                if let Err(e) = data.mark_finished(Status::Succeeded, None, &self.clock) {
                    tracing::warn!(step = %self.step.name, error = %e, "approve transition rejected");
                }
            }
            Some(d) => {
                let mut data = self.data.lock();
                data.approval.rejected_at = Some(now);
                data.approval.rejected_by = Some(d.by);
                let reason = d.reason.unwrap_or_else(|| "rejected".to_string());
                data.approval.rejection_reason = Some(reason.clone());
                if let Err(e) = data.mark_finished(Status::Failed, Some(reason), &self.clock) {
                    tracing::warn!(step = %self.step.name, error = %e, "reject transition rejected");
                }
            }
        }
    }
}
