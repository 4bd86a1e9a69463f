// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container lifecycle client: startup modes, pull policy, readiness
//! gating, stop escalation, auto-removal.

use crate::config::{ContainerExecConfig, PullPolicy, StartupMode, WaitFor};
use crate::error::ContainerError;
use crate::keepalive::{self, KEEPALIVE_CONTAINER_PATH};
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecSpec, LogSink, Platform};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Readiness deadline.
pub const READY_TIMEOUT: Duration = Duration::from_secs(120);
/// Poll cadence for readiness, exec-inspect, and stop waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Grace before a stop is escalated to SIGKILL.
const STOP_FORCE_KILL_AFTER: Duration = Duration::from_secs(5);
/// How long to wait for a stopped container to report not-running.
const STOP_WAIT: Duration = Duration::from_secs(30);

/// One client exclusively owns the container it created and removes it on
/// close when `auto_remove` is set; attached to an existing named
/// container it owns nothing.
pub struct ContainerClient {
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerExecConfig,
    container_id: Mutex<Option<String>>,
    owns_container: Mutex<bool>,
    keepalive_bind: Mutex<Option<PathBuf>>,
    in_container: bool,
}

impl ContainerClient {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ContainerExecConfig) -> Self {
        Self {
            runtime,
            config,
            container_id: Mutex::new(None),
            owns_container: Mutex::new(false),
            keepalive_bind: Mutex::new(None),
            in_container: keepalive::inside_container(),
        }
    }

    /// Override in-container detection (hosts embedding the orchestrator
    /// know their environment better than the marker probe).
    pub fn with_in_container(mut self, in_container: bool) -> Self {
        self.in_container = in_container;
        self
    }

    pub fn container_id(&self) -> Option<String> {
        self.container_id.lock().clone()
    }

    fn require_id(&self) -> Result<String, ContainerError> {
        self.container_id
            .lock()
            .clone()
            .ok_or_else(|| ContainerError::Config("no container started".to_string()))
    }

    /// Attach to the configured existing container (exec mode); it must
    /// be running.
    pub async fn attach(&self) -> Result<String, ContainerError> {
        let Some(name) = self.config.container_name.clone() else {
            return Err(ContainerError::Config("container_name required for attach".to_string()));
        };
        let state = self.runtime.inspect_container(&name).await?;
        if !state.running {
            return Err(ContainerError::NotRunning(name));
        }
        *self.container_id.lock() = Some(name.clone());
        *self.owns_container.lock() = false;
        Ok(name)
    }

    /// Create and start a container per the configured startup mode, then
    /// wait for readiness.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<String, ContainerError> {
        let Some(image) = self.config.image.clone() else {
            return Err(ContainerError::Config("image required to start a container".to_string()));
        };
        let platform = self.resolve_platform().await?;
        self.ensure_image(&image, &platform).await?;

        let mut spec = ContainerSpec {
            name: self.config.container_name.clone(),
            image,
            entrypoint: None,
            cmd: None,
            env: self.config.env.clone(),
            binds: self.config.volumes.clone(),
            user: self.config.user.clone(),
            working_dir: self.config.working_dir.clone(),
            platform: Some(platform.clone()),
        };

        match self.config.startup {
            StartupMode::Keepalive => {
                let keepalive = keepalive::resolve(
                    self.config.keepalive_dir.as_deref(),
                    &platform,
                    self.in_container,
                );
                if let Some(host_path) = &keepalive.bind {
                    spec.binds.push(format!(
                        "{}:{}:ro",
                        host_path.display(),
                        KEEPALIVE_CONTAINER_PATH
                    ));
                    *self.keepalive_bind.lock() = Some(host_path.clone());
                }
                spec.cmd = Some(keepalive.cmd);
            }
            StartupMode::Entrypoint => {}
            StartupMode::Command => {
                spec.cmd = Some(self.config.command.clone());
            }
        }

        let id = self.runtime.create_container(&spec).await?;
        *self.container_id.lock() = Some(id.clone());
        *self.owns_container.lock() = true;
        self.runtime.start_container(&id).await?;
        self.wait_ready(&id, cancel).await?;
        Ok(id)
    }

    async fn resolve_platform(&self) -> Result<Platform, ContainerError> {
        match &self.config.platform {
            Some(s) => Platform::parse(s),
            None => self.runtime.host_platform().await,
        }
    }

    /// Pull policy: `always` pulls, `never` never does, `missing` pulls
    /// only when no local image matches the resolved platform.
    async fn ensure_image(&self, image: &str, platform: &Platform) -> Result<(), ContainerError> {
        match self.config.pull {
            PullPolicy::Always => self.runtime.pull_image(image, Some(platform)).await,
            PullPolicy::Never => Ok(()),
            PullPolicy::Missing => {
                let local = self.runtime.list_images(image).await?;
                for id in &local {
                    match self.runtime.inspect_image(id).await {
                        Ok(info) if platform.matches(&info.platform) => return Ok(()),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(image = %id, error = %e, "image inspect failed")
                        }
                    }
                }
                self.runtime.pull_image(image, Some(platform)).await
            }
        }
    }

    /// Poll until the configured readiness condition holds, then satisfy
    /// the optional log-pattern gate.
    pub async fn wait_ready(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        let mut mode = self.config.wait_for;
        let mut warned_no_healthcheck = false;

        loop {
            let state = self.runtime.inspect_container(id).await?;
            if matches!(state.status.as_str(), "exited" | "dead" | "removing") {
                return Err(ContainerError::FailedEarly {
                    id: id.to_string(),
                    state: state.status,
                });
            }
            let ready = match mode {
                WaitFor::Running => state.running,
                WaitFor::Healthy => match &state.health {
                    Some(health) => match health.as_str() {
                        "healthy" => true,
                        "unhealthy" => {
                            return Err(ContainerError::FailedEarly {
                                id: id.to_string(),
                                state: "unhealthy".to_string(),
                            })
                        }
                        _ => false,
                    },
                    None if state.running => {
                        // No healthcheck configured on the image.
                        if !warned_no_healthcheck {
                            tracing::warn!(
                                container = %id,
                                "wait_for healthy requested but image has no healthcheck; falling back to running"
                            );
                            warned_no_healthcheck = true;
                            mode = WaitFor::Running;
                        }
                        true
                    }
                    None => false,
                },
            };
            if ready {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ContainerError::ReadyTimeout {
                    id: id.to_string(),
                    seconds: READY_TIMEOUT.as_secs(),
                    state: state.status,
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return Err(ContainerError::Cancelled),
            }
        }

        if let Some(pattern) = &self.config.log_pattern {
            self.wait_for_log_pattern(id, pattern, cancel).await?;
        }
        Ok(())
    }

    /// Follow logs until the first line matching the pattern; stream end
    /// without a match is a failure.
    async fn wait_for_log_pattern(
        &self,
        id: &str,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| ContainerError::Config(format!("invalid log_pattern: {e}")))?;
        let stop = cancel.child_token();
        let mut sink = PatternSink {
            re,
            line: Vec::new(),
            matched: false,
            stop: stop.clone(),
        };
        self.runtime.stream_logs(id, true, &mut sink, &stop).await?;
        if sink.matched {
            Ok(())
        } else if cancel.is_cancelled() {
            Err(ContainerError::Cancelled)
        } else {
            Err(ContainerError::PatternNotSeen { pattern: pattern.to_string() })
        }
    }

    /// Exec a command in the attached/started container.
    pub async fn exec(
        &self,
        spec: &ExecSpec,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        let id = self.require_id()?;
        self.runtime.exec(&id, spec, sink, cancel).await
    }

    /// Stream logs and wait for the container to stop; returns the exit
    /// code.
    pub async fn attach_and_wait(
        &self,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<i64, ContainerError> {
        let id = self.require_id()?;
        let logs = self.runtime.stream_logs(&id, true, sink, cancel);
        let wait = self.runtime.wait_container(&id);
        let (log_result, exit) = tokio::join!(logs, wait);
        if let Err(e) = log_result {
            tracing::debug!(container = %id, error = %e, "log stream ended with error");
        }
        exit
    }

    /// Graceful stop: mapped signal, deferred SIGKILL after 5 s, then
    /// wait up to 30 s for not-running.
    pub async fn stop(&self, signal: Option<&str>) -> Result<(), ContainerError> {
        let Some(id) = self.container_id() else { return Ok(()) };
        let state = self.runtime.inspect_container(&id).await?;
        if !state.running {
            return Ok(());
        }
        self.runtime.stop_container(&id, signal).await?;

        {
            let runtime = self.runtime.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(STOP_FORCE_KILL_AFTER).await;
                if let Ok(state) = runtime.inspect_container(&id).await {
                    if state.running {
                        tracing::warn!(container = %id, "still running after stop; sending SIGKILL");
                        let _ = runtime.kill_container(&id, "SIGKILL").await;
                    }
                }
            });
        }

        let deadline = tokio::time::Instant::now() + STOP_WAIT;
        loop {
            let state = self.runtime.inspect_container(&id).await?;
            if !state.running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ContainerError::ReadyTimeout {
                    id,
                    seconds: STOP_WAIT.as_secs(),
                    state: "running".to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Remove the owned container (force) when auto-removal is on, and
    /// unlink the keepalive binary bind source.
    pub async fn close(&self) -> Result<(), ContainerError> {
        let owns = *self.owns_container.lock();
        if owns && self.config.auto_remove {
            if let Some(id) = self.container_id() {
                self.runtime.remove_container(&id, true).await?;
            }
        }
        if let Some(path) = self.keepalive_bind.lock().take() {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

/// Sink feeding a regex line matcher; cancels its stream token on match.
struct PatternSink {
    re: regex::Regex,
    line: Vec<u8>,
    matched: bool,
    stop: CancellationToken,
}

impl PatternSink {
    fn scan(&mut self, data: &[u8]) {
        if self.matched {
            return;
        }
        for &b in data {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.line);
                if self.re.is_match(line.trim_end()) {
                    self.matched = true;
                    self.stop.cancel();
                    return;
                }
                self.line.clear();
            } else {
                self.line.push(b);
            }
        }
    }
}

impl LogSink for PatternSink {
    fn stdout_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.scan(data);
        Ok(())
    }

    fn stderr_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.scan(data);
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
