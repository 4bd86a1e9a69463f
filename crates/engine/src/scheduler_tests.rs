// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::context::{SubDagRunner, SubRunOutcome};
use async_trait::async_trait;
use skein_core::{Precondition, RepeatPolicy, RetryPolicy, Route, RouterConfig, RouterMode};
use skein_core::{RunId, SubRunRef};
use std::time::Duration;

fn register_command() {
    skein_executor::command::register_builtin();
}

fn cmd_step(name: &str, command: &str) -> Step {
    let mut step = Step::new(name);
    step.command = command.to_string();
    step
}

fn dep(mut step: Step, deps: &[&str]) -> Step {
    step.depends_on = deps.iter().map(|s| s.to_string()).collect();
    step
}

async fn run_dag(dag: Dag, dir: &tempfile::TempDir) -> RunStatus {
    register_command();
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();
    scheduler.schedule().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn linear_chain_succeeds_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let seq = dir.path().join("seq");
    let echo = |name: &str| {
        cmd_step(name, &format!("echo {name} >> {}", seq.display()))
    };
    let dag = Dag::new(
        "chain",
        vec![
            echo("a"),
            dep(echo("b"), &["a"]),
            dep(echo("c"), &["b"]),
        ],
    );

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Succeeded);
    for node in &status.nodes {
        assert_eq!(node.status, Status::Succeeded, "step {}", node.step);
    }
    let order = std::fs::read_to_string(&seq).unwrap();
    assert_eq!(order, "a\nb\nc\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_step_fails_the_run_and_skips_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let dag = Dag::new(
        "fails",
        vec![
            cmd_step("boom", "exit 1"),
            dep(cmd_step("after", "echo never"), &["boom"]),
            cmd_step("independent", "echo fine"),
        ],
    );

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Failed);
    assert_eq!(status.node("boom").unwrap().status, Status::Failed);
    assert_eq!(status.node("after").unwrap().status, Status::Skipped);
    assert_eq!(status.node("independent").unwrap().status, Status::Succeeded);
    let error = status.error.unwrap();
    assert!(error.contains("step boom"), "error was: {error}");
    assert!(error.contains("exit status 1"), "error was: {error}");
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_on_listed_exit_code_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("count");
    let mut step = Step::new("flaky");
    step.script = Some(format!(
        "n=$(cat {c} 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > {c}\nif [ $n -ge 3 ]; then exit 0; fi\nexit 2\n",
        c = counter.display()
    ));
    step.retry = RetryPolicy { max: 2, exit_codes: vec![2], interval: Duration::ZERO };
    let dag = Dag::new("retry", vec![step]);

    let status = run_dag(dag, &dir).await;
    let node = status.node("flaky").unwrap();
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(node.retry_count, 2);
    assert!(node.retried_at.is_some());
    // Invoked exactly three times.
    assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
}

#[tokio::test(flavor = "multi_thread")]
async fn unlisted_exit_code_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut step = cmd_step("flaky", "exit 3");
    step.retry = RetryPolicy { max: 2, exit_codes: vec![2], interval: Duration::ZERO };
    let dag = Dag::new("retry", vec![step]);

    let status = run_dag(dag, &dir).await;
    let node = status.node("flaky").unwrap();
    assert_eq!(node.status, Status::Failed);
    assert_eq!(node.retry_count, 0);
}

fn router_dag(value: &str) -> Dag {
    let mut head = cmd_step("s1", &format!("echo {value}"));
    head.output = Some("V".to_string());
    head.router = Some(RouterConfig {
        value: "${V}".to_string(),
        mode: RouterMode::Exclusive,
        routes: vec![
            Route { pattern: "/^a.*/".to_string(), next: vec!["s2".to_string()] },
            Route { pattern: "[b,c]".to_string(), next: vec!["s3".to_string()] },
        ],
        default: vec!["s4".to_string()],
    });
    Dag::new(
        "routed",
        vec![
            head,
            dep(cmd_step("s2", "true"), &["s1"]),
            dep(cmd_step("s3", "true"), &["s1"]),
            dep(cmd_step("s4", "true"), &["s1"]),
        ],
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn exclusive_router_selects_one_branch() {
    for (value, winner) in [("apple", "s2"), ("b", "s3"), ("z", "s4")] {
        let dir = tempfile::tempdir().unwrap();
        let status = run_dag(router_dag(value), &dir).await;

        assert_eq!(status.status, Status::Succeeded);
        for name in ["s2", "s3", "s4"] {
            let node = status.node(name).unwrap();
            if name == winner {
                assert_eq!(node.status, Status::Succeeded, "value {value}: expected {name} to run");
            } else {
                assert_eq!(
                    node.status,
                    Status::Skipped,
                    "value {value}: expected {name} to be skipped"
                );
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn multi_select_router_runs_every_match() {
    let mut head = cmd_step("s1", "echo apple");
    head.output = Some("V".to_string());
    head.router = Some(RouterConfig {
        value: "${V}".to_string(),
        mode: RouterMode::MultiSelect,
        routes: vec![
            Route { pattern: "/^a.*/".to_string(), next: vec!["s2".to_string()] },
            Route { pattern: "[apple]".to_string(), next: vec!["s3".to_string()] },
        ],
        default: vec!["s4".to_string()],
    });
    let dag = Dag::new(
        "multi",
        vec![
            head,
            dep(cmd_step("s2", "true"), &["s1"]),
            dep(cmd_step("s3", "true"), &["s1"]),
            dep(cmd_step("s4", "true"), &["s1"]),
        ],
    );

    let dir = tempfile::tempdir().unwrap();
    let status = run_dag(dag, &dir).await;
    assert_eq!(status.node("s2").unwrap().status, Status::Succeeded);
    assert_eq!(status.node("s3").unwrap().status, Status::Succeeded);
    assert_eq!(status.node("s4").unwrap().status, Status::Skipped);
}

#[tokio::test(flavor = "multi_thread")]
async fn output_variable_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let mut step = cmd_step("emit", "echo 42");
    step.output = Some("RESULT".to_string());
    let dag = Dag::new("capture", vec![step]);

    let status = run_dag(dag, &dir).await;
    let node = status.node("emit").unwrap();
    assert_eq!(node.output_variables, vec!["RESULT=42".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn preconditions_skip_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut gated = cmd_step("gated", "echo never");
    gated.preconditions = vec![Precondition::new("staging", "production")];
    let dag = Dag::new("pre", vec![gated, cmd_step("always", "true")]);

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Succeeded);
    assert_eq!(status.node("gated").unwrap().status, Status::Skipped);
    assert!(status.error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn handlers_run_for_success() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("handlers");
    let mut dag = Dag::new("handled", vec![cmd_step("work", "true")]);
    dag.handlers.on_init = Some(cmd_step("init", &format!("echo init >> {}", marker.display())));
    dag.handlers.on_success =
        Some(cmd_step("celebrate", &format!("echo success >> {}", marker.display())));
    dag.handlers.on_failure = Some(cmd_step("mourn", "echo failure"));
    dag.handlers.on_exit = Some(cmd_step("exit", &format!("echo exit >> {}", marker.display())));

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Succeeded);
    assert_eq!(status.on_init.unwrap().status, Status::Succeeded);
    assert_eq!(status.on_success.unwrap().status, Status::Succeeded);
    assert!(status.on_failure.is_none());
    assert_eq!(status.on_exit.unwrap().status, Status::Succeeded);
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "init\nsuccess\nexit\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn on_failure_runs_when_a_step_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut dag = Dag::new("handled", vec![cmd_step("work", "exit 1")]);
    dag.handlers.on_success = Some(cmd_step("celebrate", "true"));
    dag.handlers.on_failure = Some(cmd_step("mourn", "true"));

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Failed);
    assert!(status.on_success.is_none());
    assert_eq!(status.on_failure.unwrap().status, Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn on_init_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut dag = Dag::new("handled", vec![cmd_step("work", "echo never")]);
    dag.handlers.on_init = Some(cmd_step("init", "exit 1"));
    dag.handlers.on_exit = Some(cmd_step("exit", "true"));

    let status = run_dag(dag, &dir).await;
    assert_eq!(status.status, Status::Failed);
    assert!(status.error.as_ref().unwrap().contains("onInit failed"));
    // The graph never started; onExit still ran.
    assert_eq!(status.node("work").unwrap().status, Status::NotStarted);
    assert_eq!(status.on_exit.unwrap().status, Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeat_runs_until_count() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("count");
    let mut step = cmd_step("tick", &format!("echo tick >> {}", counter.display()));
    step.repeat = Some(RepeatPolicy {
        count: 3,
        interval: Duration::ZERO,
        stop_condition: None,
    });
    let dag = Dag::new("repeats", vec![step]);

    let status = run_dag(dag, &dir).await;
    let node = status.node("tick").unwrap();
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(node.done_count, 3);
    assert!(node.repeated);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_cancels_running_and_pending_steps() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let dag = Dag::new(
        "cancellable",
        vec![cmd_step("slow", "sleep 30"), dep(cmd_step("after", "true"), &["slow"])],
    );
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();

    let handle = scheduler.clone();
    let run = tokio::spawn(async move { handle.schedule().await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.cancel(None);

    let status = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status.status, Status::Cancelled);
    assert_eq!(status.node("slow").unwrap().status, Status::Cancelled);
    assert_eq!(status.node("after").unwrap().status, Status::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn approval_gate_approved() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let mut gate = Step::new("gate");
    gate.approval = Some(skein_core::ApprovalConfig::default());
    let dag = Dag::new(
        "approvals",
        vec![gate, dep(cmd_step("after", "true"), &["gate"])],
    );
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();

    let handle = scheduler.clone();
    let run = tokio::spawn(async move { handle.schedule().await });

    // Wait for the gate to park in WaitingApproval.
    for _ in 0..100 {
        if scheduler.snapshot().node("gate").map(|n| n.status) == Some(Status::WaitingApproval) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.approve("gate", "ops@example.com", indexmap::IndexMap::new()).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status.status, Status::Succeeded);
    let gate = status.node("gate").unwrap();
    assert_eq!(gate.status, Status::Succeeded);
    assert_eq!(gate.approval.approved_by.as_deref(), Some("ops@example.com"));
    assert!(gate.approval.approved_at.is_some());
    assert_eq!(status.node("after").unwrap().status, Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn approval_gate_rejected() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let mut gate = Step::new("gate");
    gate.approval = Some(skein_core::ApprovalConfig::default());
    let dag = Dag::new("approvals", vec![gate]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();

    let handle = scheduler.clone();
    let run = tokio::spawn(async move { handle.schedule().await });
    for _ in 0..100 {
        if scheduler.snapshot().node("gate").map(|n| n.status) == Some(Status::WaitingApproval) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.reject("gate", "ops@example.com", "wrong change window").unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status.status, Status::Failed);
    let gate = status.node("gate").unwrap();
    assert_eq!(gate.approval.rejected_by.as_deref(), Some("ops@example.com"));
    assert_eq!(
        gate.approval.rejection_reason.as_deref(),
        Some("wrong change window")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn approve_unknown_step_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let dag = Dag::new("plain", vec![cmd_step("a", "true")]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();
    assert!(matches!(
        scheduler.approve("ghost", "x", indexmap::IndexMap::new()),
        Err(SchedulerError::NotWaiting { .. })
    ));
}

struct FakeSubDagRunner {
    status: Status,
}

#[async_trait]
impl SubDagRunner for FakeSubDagRunner {
    async fn run(
        &self,
        _parent: &RunContext,
        dag: &str,
        params: &str,
    ) -> Result<SubRunOutcome, SchedulerError> {
        Ok(SubRunOutcome {
            run_ref: SubRunRef {
                dag_run_id: RunId::from_string(format!("run-{dag}")),
                params: params.to_string(),
            },
            status: self.status,
        })
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sub_dag_dispatch_records_reference() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let mut step = Step::new("child");
    step.sub_dag = Some(skein_core::SubDagRef { dag: "etl".to_string(), params: "FULL=1".to_string() });
    let dag = Dag::new("parent", vec![step]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx)
        .sub_dag_runner(Arc::new(FakeSubDagRunner { status: Status::Succeeded }))
        .build()
        .unwrap();

    let status = scheduler.schedule().await.unwrap();
    let node = status.node("child").unwrap();
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(node.sub_runs.len(), 1);
    assert_eq!(node.sub_runs[0].dag_run_id.as_str(), "run-etl");
    assert_eq!(node.sub_runs[0].params, "FULL=1");
    assert!(node.sub_runs_repeated.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_sub_runs_append_without_replacing() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let mut step = Step::new("child");
    step.sub_dag = Some(skein_core::SubDagRef { dag: "etl".to_string(), params: String::new() });
    step.repeat = Some(RepeatPolicy {
        count: 3,
        interval: Duration::ZERO,
        stop_condition: None,
    });
    let dag = Dag::new("parent", vec![step]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx)
        .sub_dag_runner(Arc::new(FakeSubDagRunner { status: Status::Succeeded }))
        .build()
        .unwrap();

    let status = scheduler.schedule().await.unwrap();
    let node = status.node("child").unwrap();
    assert_eq!(node.sub_runs.len(), 1);
    assert_eq!(node.sub_runs_repeated.len(), 2);
    assert_eq!(node.done_count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_sub_run_fails_the_step() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let mut step = Step::new("child");
    step.sub_dag = Some(skein_core::SubDagRef { dag: "etl".to_string(), params: String::new() });
    let dag = Dag::new("parent", vec![step]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx)
        .sub_dag_runner(Arc::new(FakeSubDagRunner { status: Status::Failed }))
        .build()
        .unwrap();

    let status = scheduler.schedule().await.unwrap();
    assert_eq!(status.node("child").unwrap().status, Status::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_executor_type_fails_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut step = cmd_step("odd", "true");
    step.executor.kind = "no-such-backend".to_string();
    let dag = Dag::new("unknown", vec![step]);

    let status = run_dag(dag, &dir).await;
    let node = status.node("odd").unwrap();
    assert_eq!(node.status, Status::Failed);
    assert!(node.error.as_deref().unwrap().contains("unknown executor type"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_updates_are_emitted() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    let dag = Dag::new("observed", vec![cmd_step("a", "true")]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let scheduler = SchedulerBuilder::new(dag, ctx)
        .on_update(move |status| sink.lock().push(status.status))
        .build()
        .unwrap();

    let status = scheduler.schedule().await.unwrap();
    assert_eq!(status.status, Status::Succeeded);
    let seen = seen.lock();
    assert!(seen.contains(&Status::Running));
    assert_eq!(*seen.last().unwrap(), Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn max_active_steps_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    register_command();
    // Each step records overlap by checking a lock file.
    let flag = dir.path().join("active");
    let script = format!(
        "if [ -f {f} ]; then echo overlap >> {f}.bad; fi\ntouch {f}\nsleep 0.2\nrm {f}\n",
        f = flag.display()
    );
    let mk = |name: &str| {
        let mut s = Step::new(name);
        s.script = Some(script.clone());
        s
    };
    let mut dag = Dag::new("capped", vec![mk("one"), mk("two"), mk("three")]);
    dag.max_active_steps = 1;
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();

    let status = scheduler.schedule().await.unwrap();
    assert_eq!(status.status, Status::Succeeded);
    assert!(!dir.path().join("active.bad").exists());
}
