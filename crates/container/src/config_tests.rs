// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn minimal_image_config() {
    let cfg = ContainerExecConfig::from_value(&json!({"image": "alpine:3"})).unwrap();
    assert_eq!(cfg.image.as_deref(), Some("alpine:3"));
    assert_eq!(cfg.pull, PullPolicy::Missing);
    assert_eq!(cfg.startup, StartupMode::Keepalive);
    assert_eq!(cfg.wait_for, WaitFor::Running);
    assert!(!cfg.is_exec_mode());
}

#[test]
fn exec_mode_with_container_name() {
    let cfg = ContainerExecConfig::from_value(&json!({
        "container_name": "db",
        "exec": {"user": "postgres", "tty": true}
    }))
    .unwrap();
    assert!(cfg.is_exec_mode());
    let exec = cfg.exec.unwrap();
    assert_eq!(exec.user.as_deref(), Some("postgres"));
    assert!(exec.tty);
    assert!(!exec.privileged);
}

#[yare::parameterized(
    neither_image_nor_name = { json!({}) },
    null_config = { json!(null) },
    image_exec_without_name = { json!({"image": "alpine", "exec": {}}) },
    command_mode_without_command = { json!({"image": "alpine", "startup": "command"}) },
    bad_log_pattern = { json!({"image": "alpine", "log_pattern": "([unclosed"}) },
    bad_platform = { json!({"image": "alpine", "platform": "nonsense"}) },
)]
fn invalid_configs(value: serde_json::Value) {
    assert!(matches!(
        ContainerExecConfig::from_value(&value),
        Err(ContainerError::Config(_)) | Err(ContainerError::BadPlatform(_))
    ));
}

#[test]
fn image_with_exec_and_name_is_valid() {
    let cfg = ContainerExecConfig::from_value(&json!({
        "image": "alpine",
        "container_name": "work",
        "exec": {}
    }))
    .unwrap();
    assert!(cfg.is_exec_mode());
}

#[test]
fn startup_command_mode_parses() {
    let cfg = ContainerExecConfig::from_value(&json!({
        "image": "alpine",
        "startup": "command",
        "command": ["sh", "-c", "run"],
        "pull": "always",
        "wait_for": "healthy"
    }))
    .unwrap();
    assert_eq!(cfg.startup, StartupMode::Command);
    assert_eq!(cfg.pull, PullPolicy::Always);
    assert_eq!(cfg.wait_for, WaitFor::Healthy);
    assert_eq!(cfg.command, vec!["sh", "-c", "run"]);
}
