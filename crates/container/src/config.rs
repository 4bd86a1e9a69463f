// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed container executor config, deserialized from the step's opaque
//! config map and validated before instantiation.

use crate::error::ContainerError;
use serde::Deserialize;
use std::path::PathBuf;

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    Always,
    Never,
    #[default]
    Missing,
}

/// How a freshly created container starts up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Keep the container alive for the run; steps exec into it.
    #[default]
    Keepalive,
    /// Respect the image ENTRYPOINT/CMD untouched.
    Entrypoint,
    /// Run the configured command array as PID 1.
    Command,
}

/// Base readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitFor {
    #[default]
    Running,
    Healthy,
}

/// Options for exec-in-existing-container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExecOptions {
    pub user: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ContainerExecConfig {
    pub image: Option<String>,
    pub container_name: Option<String>,
    pub exec: Option<ExecOptions>,
    pub pull: PullPolicy,
    pub platform: Option<String>,
    pub startup: StartupMode,
    /// Startup command for [`StartupMode::Command`].
    pub command: Vec<String>,
    pub wait_for: WaitFor,
    /// After base readiness, wait for the first log line matching this
    /// regex before declaring the container ready.
    pub log_pattern: Option<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub auto_remove: bool,
    /// Directory holding per-platform keepalive binaries.
    pub keepalive_dir: Option<PathBuf>,
}

impl ContainerExecConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ContainerError> {
        let cfg: Self = match value {
            serde_json::Value::Null => Self::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| ContainerError::Config(e.to_string()))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ContainerError> {
        if self.image.is_none() && self.container_name.is_none() {
            return Err(ContainerError::Config(
                "one of image or container_name is required".to_string(),
            ));
        }
        if self.image.is_some() && self.exec.is_some() && self.container_name.is_none() {
            return Err(ContainerError::Config(
                "exec with an image requires container_name".to_string(),
            ));
        }
        if self.startup == StartupMode::Command && self.command.is_empty() {
            return Err(ContainerError::Config(
                "startup mode command requires a non-empty command".to_string(),
            ));
        }
        if let Some(pattern) = &self.log_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                ContainerError::Config(format!("invalid log_pattern {pattern:?}: {e}"))
            })?;
        }
        if let Some(platform) = &self.platform {
            crate::runtime::Platform::parse(platform)?;
        }
        Ok(())
    }

    /// Whether the step executes in an existing named container.
    pub fn is_exec_mode(&self) -> bool {
        self.container_name.is_some()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
