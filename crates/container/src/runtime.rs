// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The container runtime driver trait and its wire-neutral types.

use crate::error::ContainerError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Normalized platform triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Parse `os/arch[/variant]`, normalizing common architecture aliases.
    pub fn parse(s: &str) -> Result<Self, ContainerError> {
        let mut parts = s.split('/');
        let os = parts.next().unwrap_or_default();
        let arch = parts.next().unwrap_or_default();
        if os.is_empty() || arch.is_empty() {
            return Err(ContainerError::BadPlatform(s.to_string()));
        }
        let variant = parts.next().map(str::to_string);
        Ok(Self::new(os, arch, variant))
    }

    pub fn new(os: &str, arch: &str, variant: Option<String>) -> Self {
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            os: os.to_ascii_lowercase(),
            arch: arch.to_string(),
            variant: variant.filter(|v| !v.is_empty()),
        }
    }

    /// Whether an image platform satisfies this requested platform.
    /// A missing requested variant accepts any image variant.
    pub fn matches(&self, image: &Platform) -> bool {
        if self.os != image.os || self.arch != image.arch {
            return false;
        }
        match &self.variant {
            None => true,
            Some(v) => image.variant.as_deref() == Some(v.as_str()),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new("linux", "amd64", None)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.arch, v),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

/// Creation request for a new container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    /// None respects the image ENTRYPOINT.
    pub entrypoint: Option<Vec<String>>,
    /// None respects the image CMD.
    pub cmd: Option<Vec<String>>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// `host:container[:ro]` bind specs.
    pub binds: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub platform: Option<Platform>,
}

/// Point-in-time container state from inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    /// Runtime status string (`created`, `running`, `exited`, `dead`, …).
    pub status: String,
    pub exit_code: Option<i64>,
    /// Healthcheck status when the container has one configured.
    pub health: Option<String>,
}

/// Image metadata needed for pull-policy decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub platform: Platform,
    pub has_healthcheck: bool,
}

/// Exec request against a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    pub working_dir: Option<String>,
}

/// Demultiplexed log destination.
pub trait LogSink: Send {
    fn stdout_chunk(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn stderr_chunk(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Driver boundary to the container engine. The orchestration client and
/// executor are written against this trait; the Docker Engine API
/// implementation lives in [`crate::docker`], a scripted fake in
/// [`crate::fake`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;
    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerState, ContainerError>;
    /// Graceful stop; `signal` is a name like `SIGTERM` when given.
    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<(), ContainerError>;
    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), ContainerError>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError>;
    /// Blocks until the container is no longer running; returns its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, ContainerError>;
    /// Streams demultiplexed logs into `sink` until the stream ends or
    /// `cancel` fires.
    async fn stream_logs(
        &self,
        id: &str,
        follow: bool,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError>;
    /// Runs a command in the container, streaming output; returns the
    /// exec's exit code from exec-inspect.
    async fn exec(
        &self,
        id: &str,
        spec: &ExecSpec,
        sink: &mut (dyn LogSink + '_),
        cancel: &CancellationToken,
    ) -> Result<i64, ContainerError>;
    async fn pull_image(
        &self,
        image: &str,
        platform: Option<&Platform>,
    ) -> Result<(), ContainerError>;
    /// Local image ids matching a reference filter.
    async fn list_images(&self, reference: &str) -> Result<Vec<String>, ContainerError>;
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, ContainerError>;
    async fn host_platform(&self) -> Result<Platform, ContainerError>;
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod runtime_tests;
