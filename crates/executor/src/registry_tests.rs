// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::contract::Writer;
use crate::error::ExecError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    fn set_stdout(&mut self, _w: Writer) {}
    fn set_stderr(&mut self, _w: Writer) {}

    async fn run(&self, _ctx: &CancellationToken) -> Result<(), ExecError> {
        Ok(())
    }

    async fn kill(&self, _signal: nix::sys::signal::Signal) -> Result<(), ExecError> {
        Ok(())
    }
}

fn noop_factory() -> Factory {
    std::sync::Arc::new(|_ctx, _step| Ok(Box::new(NoopExecutor) as _))
}

#[test]
fn register_and_create() {
    register("registry-test-noop", Capabilities::COMMAND, noop_factory());
    assert!(is_registered("registry-test-noop"));

    let ctx = ExecContext::default();
    let step = skein_core::Step::new("s");
    assert!(create("registry-test-noop", &ctx, &step).is_ok());
}

#[test]
fn unknown_type_is_config_error() {
    let ctx = ExecContext::default();
    let step = skein_core::Step::new("s");
    match create("registry-test-missing", &ctx, &step) {
        Err(ExecError::UnknownType(kind)) => assert_eq!(kind, "registry-test-missing"),
        other => panic!("expected UnknownType, got {other:?}"),
    }
}

#[test]
fn capability_bitset() {
    let caps = Capabilities::COMMAND | Capabilities::SCRIPT;
    assert!(caps.has(Capabilities::COMMAND));
    assert!(caps.has(Capabilities::SCRIPT));
    assert!(!caps.has(Capabilities::AGENT));
    assert!(Capabilities::NONE.has(Capabilities::NONE));

    register("registry-test-caps", caps, noop_factory());
    assert_eq!(capabilities("registry-test-caps"), Some(caps));
    assert_eq!(capabilities("registry-test-missing"), None);
}
