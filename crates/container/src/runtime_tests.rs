// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    two_parts = { "linux/amd64", "linux", "amd64", None },
    three_parts = { "linux/arm64/v8", "linux", "arm64", Some("v8") },
    x86_alias = { "linux/x86_64", "linux", "amd64", None },
    aarch_alias = { "Linux/aarch64", "linux", "arm64", None },
)]
fn platform_parse(input: &str, os: &str, arch: &str, variant: Option<&str>) {
    let p = Platform::parse(input).unwrap();
    assert_eq!(p.os, os);
    assert_eq!(p.arch, arch);
    assert_eq!(p.variant.as_deref(), variant);
}

#[yare::parameterized(
    empty = { "" },
    missing_arch = { "linux" },
    empty_arch = { "linux/" },
)]
fn platform_parse_rejects(input: &str) {
    assert!(Platform::parse(input).is_err());
}

#[test]
fn platform_matching() {
    let want = Platform::parse("linux/arm64").unwrap();
    assert!(want.matches(&Platform::parse("linux/arm64/v8").unwrap()));
    assert!(want.matches(&Platform::parse("linux/arm64").unwrap()));
    assert!(!want.matches(&Platform::parse("linux/amd64").unwrap()));

    let strict = Platform::parse("linux/arm64/v8").unwrap();
    assert!(strict.matches(&Platform::parse("linux/arm64/v8").unwrap()));
    assert!(!strict.matches(&Platform::parse("linux/arm64").unwrap()));
}

#[test]
fn platform_display_round_trips() {
    for s in ["linux/amd64", "linux/arm64/v8"] {
        assert_eq!(Platform::parse(s).unwrap().to_string(), s);
    }
}
