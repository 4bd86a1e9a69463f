// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The contract every executor back-end implements.

use crate::error::ExecError;
use async_trait::async_trait;
use nix::sys::signal::Signal;
use skein_core::ChatMessage;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Output sink handed to an executor for one invocation.
pub type Writer = Box<dyn std::io::Write + Send>;

/// Per-invocation context shared by every executor factory.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub dag_name: String,
    pub run_id: String,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Chat-context accessor for agent-capable executors.
///
/// The scheduler seeds conversation history before `run` and collects new
/// messages after it.
pub trait ChatMessageHandler: Send + Sync {
    fn set_context(&self, messages: Vec<ChatMessage>);
    fn messages(&self) -> Vec<ChatMessage>;
}

/// A back-end that performs one step's work.
///
/// Writers are set while the scheduler still has exclusive access; `run`
/// and `kill` may then race, so both take `&self` and implementations keep
/// mutable state behind interior mutability. Executors must not retain
/// writers beyond one `run`.
#[async_trait]
pub trait Executor: Send + Sync {
    fn set_stdout(&mut self, w: Writer);
    fn set_stderr(&mut self, w: Writer);

    /// Perform the work. Blocks until completion or `ctx` cancellation;
    /// every internal wait loop must select on `ctx`.
    async fn run(&self, ctx: &CancellationToken) -> Result<(), ExecError>;

    /// Deliver a stop signal. Callable concurrently with `run`; returns
    /// promptly without waiting for the work to wind down.
    async fn kill(&self, signal: Signal) -> Result<(), ExecError>;

    /// Authoritative exit code, when the back-end has one.
    fn exit_code(&self) -> Option<i32> {
        None
    }

    /// Agent back-ends expose their conversation here.
    fn chat(&self) -> Option<&dyn ChatMessageHandler> {
        None
    }
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Executor")
    }
}
