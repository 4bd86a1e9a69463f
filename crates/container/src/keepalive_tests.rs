// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn platform(s: &str) -> Platform {
    Platform::parse(s).unwrap()
}

#[test]
fn in_container_always_uses_shell_loop() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("skein-keepalive-linux-amd64"), b"bin").unwrap();

    let cmd = resolve(Some(dir.path()), &platform("linux/amd64"), true);
    assert!(cmd.bind.is_none());
    assert_eq!(cmd.cmd[0], "sh");
}

#[test]
fn binary_resolved_by_platform() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("skein-keepalive-linux-amd64"), b"bin").unwrap();

    let cmd = resolve(Some(dir.path()), &platform("linux/amd64"), false);
    assert_eq!(cmd.cmd, vec![KEEPALIVE_CONTAINER_PATH.to_string()]);
    assert_eq!(
        cmd.bind.unwrap(),
        dir.path().join("skein-keepalive-linux-amd64")
    );
}

#[test]
fn variant_binary_preferred_over_generic() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("skein-keepalive-linux-arm64"), b"bin").unwrap();
    std::fs::write(dir.path().join("skein-keepalive-linux-arm64-v8"), b"bin").unwrap();

    let cmd = resolve(Some(dir.path()), &platform("linux/arm64/v8"), false);
    assert_eq!(
        cmd.bind.unwrap(),
        dir.path().join("skein-keepalive-linux-arm64-v8")
    );
}

#[test]
fn missing_binary_falls_back_to_shell() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = resolve(Some(dir.path()), &platform("linux/s390x"), false);
    assert!(cmd.bind.is_none());
    assert_eq!(cmd.cmd[0], "sh");

    let cmd = resolve(None, &platform("linux/amd64"), false);
    assert!(cmd.bind.is_none());
}

#[test]
fn marker_detection() {
    let root = tempfile::tempdir().unwrap();
    assert!(!detect_markers(root.path(), false));
    assert!(detect_markers(root.path(), true));

    std::fs::write(root.path().join(".dockerenv"), b"").unwrap();
    assert!(detect_markers(root.path(), false));
    std::fs::remove_file(root.path().join(".dockerenv")).unwrap();

    std::fs::create_dir_all(root.path().join("run")).unwrap();
    std::fs::write(root.path().join("run/.containerenv"), b"").unwrap();
    assert!(detect_markers(root.path(), false));
    std::fs::remove_file(root.path().join("run/.containerenv")).unwrap();

    std::fs::create_dir_all(root.path().join("proc/1")).unwrap();
    std::fs::write(root.path().join("proc/1/cgroup"), "0::/kubepods/pod123\n").unwrap();
    assert!(detect_markers(root.path(), false));
}
