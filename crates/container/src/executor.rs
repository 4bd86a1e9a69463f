// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framework integration: the `docker`/`container` executor type.

use crate::client::ContainerClient;
use crate::config::ContainerExecConfig;
use crate::error::ContainerError;
use crate::runtime::{ContainerRuntime, ExecSpec, LogSink};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use skein_executor::{registry, Capabilities, ExecError, Executor, Writer};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl From<ContainerError> for ExecError {
    fn from(e: ContainerError) -> Self {
        match e {
            ContainerError::Cancelled => ExecError::Cancelled,
            ContainerError::Config(message) => ExecError::Config(message),
            other => ExecError::Other(other.to_string()),
        }
    }
}

#[derive(Default)]
struct IoSlots {
    stdout: Option<Writer>,
    stderr: Option<Writer>,
}

/// Sink adapting the framework writers to the runtime's log stream.
struct WriterSink {
    stdout: Writer,
    stderr: Writer,
}

impl LogSink for WriterSink {
    fn stdout_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stdout.write_all(data)
    }

    fn stderr_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stderr.write_all(data)
    }
}

/// Runs a step in a container: exec into the configured named container
/// when one is given, otherwise a fresh container running the step's
/// command, removed afterwards per `auto_remove`.
pub struct ContainerExecutor {
    config: ContainerExecConfig,
    command: Vec<String>,
    client: Arc<ContainerClient>,
    io: Mutex<IoSlots>,
    exit_code: Mutex<Option<i32>>,
}

impl ContainerExecutor {
    pub fn from_step(
        runtime: Arc<dyn ContainerRuntime>,
        step: &skein_core::Step,
    ) -> Result<Self, ExecError> {
        let config = ContainerExecConfig::from_value(&step.executor.config)?;
        let mut command = Vec::new();
        if !step.command.is_empty() {
            command.push(step.command.clone());
            command.extend(step.args.iter().cloned());
        }
        if command.is_empty() && config.is_exec_mode() {
            return Err(ExecError::Config(format!(
                "step {}: container exec needs a command",
                step.name
            )));
        }
        let client = Arc::new(ContainerClient::new(runtime, config.clone()));
        Ok(Self {
            config,
            command,
            client,
            io: Mutex::new(IoSlots::default()),
            exit_code: Mutex::new(None),
        })
    }

    fn take_sink(&self) -> Result<WriterSink, ExecError> {
        let mut io = self.io.lock();
        match (io.stdout.take(), io.stderr.take()) {
            (Some(stdout), Some(stderr)) => Ok(WriterSink { stdout, stderr }),
            _ => Err(ExecError::Config("writers not set before run".to_string())),
        }
    }

    async fn run_exec_mode(
        &self,
        sink: &mut WriterSink,
        ctx: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        self.client.attach().await?;
        let opts = self.config.exec.clone().unwrap_or_default();
        let spec = ExecSpec {
            cmd: self.command.clone(),
            env: opts.env,
            user: opts.user,
            privileged: opts.privileged,
            tty: opts.tty,
            working_dir: opts.working_dir.or_else(|| self.config.working_dir.clone()),
        };
        self.client.exec(&spec, sink, ctx).await
    }

    async fn run_fresh_container(
        &self,
        sink: &mut WriterSink,
        ctx: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        self.client.start(ctx).await?;
        let result = if self.command.is_empty() {
            // Entrypoint/command startup does the work itself.
            self.client.attach_and_wait(sink, ctx).await
        } else {
            let spec = ExecSpec {
                cmd: self.command.clone(),
                env: Vec::new(),
                user: self.config.user.clone(),
                privileged: false,
                tty: false,
                working_dir: self.config.working_dir.clone(),
            };
            self.client.exec(&spec, sink, ctx).await
        };
        if let Err(e) = self.client.stop(None).await {
            tracing::debug!(error = %e, "container stop after run failed");
        }
        if let Err(e) = self.client.close().await {
            tracing::warn!(error = %e, "container close failed");
        }
        result
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    fn set_stdout(&mut self, w: Writer) {
        self.io.lock().stdout = Some(w);
    }

    fn set_stderr(&mut self, w: Writer) {
        self.io.lock().stderr = Some(w);
    }

    async fn run(&self, ctx: &CancellationToken) -> Result<(), ExecError> {
        let mut sink = self.take_sink()?;
        let result = if self.config.is_exec_mode() {
            self.run_exec_mode(&mut sink, ctx).await
        } else {
            self.run_fresh_container(&mut sink, ctx).await
        };
        let _ = sink.stdout.flush();
        let _ = sink.stderr.flush();

        match result {
            Ok(code) => {
                *self.exit_code.lock() = Some(code as i32);
                if ctx.is_cancelled() {
                    return Err(ExecError::Cancelled);
                }
                if code == 0 {
                    Ok(())
                } else {
                    Err(ExecError::ExitStatus(code as i32))
                }
            }
            Err(ContainerError::Cancelled) => Err(ExecError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn kill(&self, signal: Signal) -> Result<(), ExecError> {
        self.client.stop(Some(signal.as_str())).await.map_err(ExecError::from)
    }

    fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }
}

/// Register the `docker` executor type (and its `container` alias)
/// backed by the given runtime driver.
pub fn register_with_runtime(runtime: Arc<dyn ContainerRuntime>) {
    for kind in ["docker", "container"] {
        let runtime = runtime.clone();
        registry::register(
            kind,
            Capabilities::COMMAND,
            Arc::new(move |_ctx, step| {
                Ok(Box::new(ContainerExecutor::from_step(runtime.clone(), step)?)
                    as Box<dyn Executor>)
            }),
        );
    }
}

/// Register the built-in container executor against the local Docker
/// Engine socket.
pub fn register_builtin() {
    register_with_runtime(Arc::new(crate::docker::DockerApi::new()));
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
