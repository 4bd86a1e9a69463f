// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in command executor: runs a step's command (or script body) as a
//! local process in its own process group.

use crate::contract::{ExecContext, Executor, Writer};
use crate::error::ExecError;
use crate::registry::{self, Capabilities};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct IoSlots {
    stdout: Option<Writer>,
    stderr: Option<Writer>,
}

#[derive(Default)]
struct RunState {
    pgid: Option<i32>,
    exit_code: Option<i32>,
}

/// Local process executor. Registered under the `command` type.
pub struct CommandExecutor {
    command: String,
    args: Vec<String>,
    script: Option<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    io: Mutex<IoSlots>,
    state: Mutex<RunState>,
}

impl CommandExecutor {
    pub fn from_step(ctx: &ExecContext, step: &skein_core::Step) -> Result<Self, ExecError> {
        if step.command.is_empty() && step.script.is_none() {
            return Err(ExecError::Config(format!(
                "step {}: command executor needs a command or script",
                step.name
            )));
        }
        let mut env = ctx.env.clone();
        env.extend(step.env.iter().cloned());
        Ok(Self {
            command: step.command.clone(),
            args: step.args.clone(),
            script: step.script.clone(),
            env,
            cwd: step.working_dir.clone().or_else(|| ctx.working_dir.clone()),
            io: Mutex::new(IoSlots::default()),
            state: Mutex::new(RunState::default()),
        })
    }

    fn build_command(&self) -> Result<(tokio::process::Command, Option<PathBuf>), ExecError> {
        let (program, args, script_path) = if let Some(script) = &self.script {
            let path = std::env::temp_dir().join(format!("skein-script-{}.sh", nanoid::nanoid!(8)));
            std::fs::write(&path, script)?;
            ("sh".to_string(), vec![path.display().to_string()], Some(path))
        } else if !self.args.is_empty() {
            (self.command.clone(), self.args.clone(), None)
        } else {
            // A bare command line goes through the shell so quoting and
            // pipes behave as written.
            ("sh".to_string(), vec!["-c".to_string(), self.command.clone()], None)
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        Ok((cmd, script_path))
    }

    fn signal_group(&self, signal: Signal) {
        let pgid = self.state.lock().pgid;
        if let Some(pgid) = pgid {
            match killpg(Pid::from_raw(pgid), signal) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid, signal = %signal, error = %e, "killpg failed"),
            }
        }
    }
}

fn pump(
    mut src: impl AsyncRead + Unpin + Send + 'static,
    mut dst: Writer,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match src.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = dst.write_all(&buf[..n]) {
                        tracing::warn!(error = %e, "log writer failed");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "process output stream closed");
                    break;
                }
            }
        }
        let _ = dst.flush();
    })
}

#[async_trait]
impl Executor for CommandExecutor {
    fn set_stdout(&mut self, w: Writer) {
        self.io.lock().stdout = Some(w);
    }

    fn set_stderr(&mut self, w: Writer) {
        self.io.lock().stderr = Some(w);
    }

    async fn run(&self, ctx: &CancellationToken) -> Result<(), ExecError> {
        let (stdout_w, stderr_w) = {
            let mut io = self.io.lock();
            (io.stdout.take(), io.stderr.take())
        };

        let (mut cmd, script_path) = self.build_command()?;
        let mut child = cmd.spawn()?;
        if let Some(pid) = child.id() {
            self.state.lock().pgid = Some(pid as i32);
        }

        let mut pumps = Vec::new();
        if let (Some(out), Some(w)) = (child.stdout.take(), stdout_w) {
            pumps.push(pump(out, w));
        }
        if let (Some(err), Some(w)) = (child.stderr.take(), stderr_w) {
            pumps.push(pump(err, w));
        }

        let result = tokio::select! {
            status = child.wait() => status.map_err(ExecError::from).map(Some),
            _ = ctx.cancelled() => {
                self.signal_group(Signal::SIGTERM);
                let _ = child.wait().await;
                Ok(None)
            }
        };

        for p in pumps {
            let _ = p.await;
        }
        if let Some(path) = script_path {
            let _ = std::fs::remove_file(path);
        }
        self.state.lock().pgid = None;

        match result? {
            None => Err(ExecError::Cancelled),
            Some(status) => {
                let code = status.code().unwrap_or_else(|| {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal().map(|s| 128 + s).unwrap_or(-1)
                });
                self.state.lock().exit_code = Some(code);
                if code == 0 {
                    Ok(())
                } else {
                    Err(ExecError::ExitStatus(code))
                }
            }
        }
    }

    async fn kill(&self, signal: Signal) -> Result<(), ExecError> {
        self.signal_group(signal);
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        self.state.lock().exit_code
    }
}

/// Register the built-in `command` executor type.
pub fn register_builtin() {
    registry::register(
        "command",
        Capabilities::COMMAND | Capabilities::SCRIPT,
        Arc::new(|ctx, step| {
            Ok(Box::new(CommandExecutor::from_step(ctx, step)?) as Box<dyn Executor>)
        }),
    );
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod command_tests;
