// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::contract::ExecContext;
use skein_core::Step;
use std::io::Write;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn command_step(command: &str) -> Step {
    let mut step = Step::new("test");
    step.command = command.to_string();
    step
}

fn executor_for(step: &Step) -> (CommandExecutor, SharedBuf, SharedBuf) {
    let mut exec = CommandExecutor::from_step(&ExecContext::default(), step).unwrap();
    let out = SharedBuf::default();
    let err = SharedBuf::default();
    exec.set_stdout(Box::new(out.clone()));
    exec.set_stderr(Box::new(err.clone()));
    (exec, out, err)
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_captures_stdout() {
    let step = command_step("echo hello");
    let (exec, out, _err) = executor_for(&step);

    exec.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(out.contents(), "hello\n");
    assert_eq!(exec.exit_code(), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn stderr_goes_to_stderr_writer() {
    let step = command_step("echo oops 1>&2");
    let (exec, out, err) = executor_for(&step);

    exec.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(out.contents(), "");
    assert_eq!(err.contents(), "oops\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn nonzero_exit_is_exit_status_error() {
    let step = command_step("exit 3");
    let (exec, _out, _err) = executor_for(&step);

    match exec.run(&CancellationToken::new()).await {
        Err(ExecError::ExitStatus(3)) => {}
        other => panic!("expected exit status 3, got {other:?}"),
    }
    assert_eq!(exec.exit_code(), Some(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn args_bypass_the_shell() {
    let mut step = Step::new("test");
    step.command = "printf".to_string();
    step.args = vec!["%s-%s".to_string(), "a".to_string(), "b".to_string()];
    let (exec, out, _err) = executor_for(&step);

    exec.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(out.contents(), "a-b");
}

#[tokio::test(flavor = "multi_thread")]
async fn script_body_runs_via_shell() {
    let mut step = Step::new("test");
    step.script = Some("x=40\ny=2\necho $((x + y))\n".to_string());
    let (exec, out, _err) = executor_for(&step);

    exec.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(out.contents().trim(), "42");
}

#[tokio::test(flavor = "multi_thread")]
async fn step_env_reaches_the_process() {
    let mut step = command_step("echo $GREETING");
    step.env = vec![("GREETING".to_string(), "hi".to_string())];
    let (exec, out, _err) = executor_for(&step);

    exec.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(out.contents().trim(), "hi");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_terminates_promptly() {
    let step = command_step("sleep 30");
    let (exec, _out, _err) = executor_for(&step);

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    match exec.run(&token).await {
        Err(ExecError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_interrupts_a_running_command() {
    let mut step = Step::new("test");
    step.script = Some("sleep 30".to_string());
    let (exec, _out, _err) = executor_for(&step);
    let exec = Arc::new(exec);

    let runner = {
        let exec = exec.clone();
        tokio::spawn(async move { exec.run(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    exec.kill(Signal::SIGTERM).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[test]
fn missing_command_is_config_error() {
    let step = Step::new("empty");
    assert!(matches!(
        CommandExecutor::from_step(&ExecContext::default(), &step),
        Err(ExecError::Config(_))
    ));
}
