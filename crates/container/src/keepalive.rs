// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keepalive command resolution for run-long containers.
//!
//! Created containers in keepalive mode need something to run. When the
//! orchestrator itself runs inside a container, a shell sleep loop is the
//! only portable choice; on a host, a tiny per-platform keepalive binary
//! is bind-mounted read-only into the container instead.

use crate::runtime::Platform;
use std::path::{Path, PathBuf};

/// Where the keepalive binary is mounted inside the container.
pub const KEEPALIVE_CONTAINER_PATH: &str = "/run/skein/keepalive";

/// Resolved keepalive startup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveCommand {
    pub cmd: Vec<String>,
    /// Host path to bind-mount (read-only) when using the binary; the
    /// host file is unlinked on client close.
    pub bind: Option<PathBuf>,
}

fn shell_fallback() -> KeepaliveCommand {
    KeepaliveCommand {
        cmd: vec![
            "sh".to_string(),
            "-c".to_string(),
            "while true; do sleep 86400; done".to_string(),
        ],
        bind: None,
    }
}

/// Detect whether this process runs inside a container.
pub fn inside_container() -> bool {
    detect_markers(Path::new("/"), std::env::var_os("KUBERNETES_SERVICE_HOST").is_some())
}

/// Marker probe split out for tests: dockerenv / containerenv files,
/// container runtimes in /proc/1/cgroup, or a Kubernetes service env.
pub(crate) fn detect_markers(root: &Path, k8s_env: bool) -> bool {
    if k8s_env {
        return true;
    }
    if root.join(".dockerenv").exists() || root.join("run/.containerenv").exists() {
        return true;
    }
    let cgroup = root.join("proc/1/cgroup");
    if let Ok(contents) = std::fs::read_to_string(cgroup) {
        for marker in ["docker", "containerd", "kubepods", "lxc"] {
            if contents.contains(marker) {
                return true;
            }
        }
    }
    false
}

/// Resolve the keepalive command for a target platform.
///
/// Looks for `skein-keepalive-<os>-<arch>[-<variant>]` under `dir`;
/// anything unresolvable falls back to the shell sleep loop.
pub fn resolve(dir: Option<&Path>, platform: &Platform, in_container: bool) -> KeepaliveCommand {
    if in_container {
        return shell_fallback();
    }
    let Some(dir) = dir else {
        return shell_fallback();
    };

    let mut candidates = Vec::new();
    if let Some(variant) = &platform.variant {
        candidates.push(format!(
            "skein-keepalive-{}-{}-{}",
            platform.os, platform.arch, variant
        ));
    }
    candidates.push(format!("skein-keepalive-{}-{}", platform.os, platform.arch));

    for name in candidates {
        let path = dir.join(&name);
        if path.is_file() {
            return KeepaliveCommand {
                cmd: vec![KEEPALIVE_CONTAINER_PATH.to_string()],
                bind: Some(path),
            };
        }
    }
    tracing::debug!(platform = %platform, "no keepalive binary found; using shell loop");
    shell_fallback()
}

#[cfg(test)]
#[path = "keepalive_tests.rs"]
mod keepalive_tests;
