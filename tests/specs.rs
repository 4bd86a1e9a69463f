// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level integration tests: full DAG runs across the
//! scheduler, the executor registry, and the shipped back-ends.

use skein_container::fake::FakeRuntime;
use skein_core::{Dag, Route, RouterConfig, RouterMode, Status, Step};
use skein_engine::{RunContext, SchedulerBuilder};
use std::sync::Arc;

fn register_all() {
    skein_executor::command::register_builtin();
    skein_sql::register_builtin();
}

fn cmd_step(name: &str, command: &str) -> Step {
    let mut step = Step::new(name);
    step.command = command.to_string();
    step
}

fn sqlite_step(name: &str, dsn: &str, script: &str) -> Step {
    let mut step = Step::new(name);
    step.executor.kind = "sqlite".to_string();
    step.executor.config = serde_json::json!({"dsn": dsn, "script": script});
    step
}

#[tokio::test(flavor = "multi_thread")]
async fn mixed_command_and_sql_pipeline() {
    register_all();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("etl.db");
    let dsn = format!("sqlite://{}", db.display());

    let mut load = sqlite_step(
        "load",
        &dsn,
        "CREATE TABLE events (id INTEGER, kind TEXT); \
         INSERT INTO events VALUES (1, 'click'), (2, 'view')",
    );
    load.depends_on = vec!["prepare".to_string()];

    let mut verify = sqlite_step("verify", &dsn, "SELECT COUNT(*) AS n FROM events");
    verify.depends_on = vec!["load".to_string()];

    let dag = Dag::new("etl", vec![cmd_step("prepare", "true"), load, verify]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let scheduler = SchedulerBuilder::new(dag, ctx).build().unwrap();
    let status = scheduler.schedule().await.unwrap();

    assert_eq!(status.status, Status::Succeeded);
    for node in &status.nodes {
        assert_eq!(node.status, Status::Succeeded, "step {}", node.step);
    }
    // The verify step streamed its count as JSONL into its stdout log.
    let stdout = std::fs::read_to_string(&status.node("verify").unwrap().stdout).unwrap();
    let row: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(row["n"], 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn router_selects_sql_branch_from_command_output() {
    register_all();
    let dir = tempfile::tempdir().unwrap();

    let mut decide = cmd_step("decide", "echo full");
    decide.output = Some("MODE".to_string());
    decide.router = Some(RouterConfig {
        value: "${MODE}".to_string(),
        mode: RouterMode::Exclusive,
        routes: vec![
            Route { pattern: "full".to_string(), next: vec!["full_load".to_string()] },
            Route { pattern: "/^inc/".to_string(), next: vec!["incremental".to_string()] },
        ],
        default: vec!["noop".to_string()],
    });

    let branch = |name: &str| {
        let mut step = sqlite_step(name, ":memory:", "SELECT 1");
        step.depends_on = vec!["decide".to_string()];
        step
    };
    let dag = Dag::new(
        "branching",
        vec![decide, branch("full_load"), branch("incremental"), branch("noop")],
    );
    let ctx = RunContext::new(dir.path().join("logs"));
    let status = SchedulerBuilder::new(dag, ctx).build().unwrap().schedule().await.unwrap();

    assert_eq!(status.status, Status::Succeeded);
    assert_eq!(status.node("full_load").unwrap().status, Status::Succeeded);
    assert_eq!(status.node("incremental").unwrap().status, Status::Skipped);
    assert_eq!(status.node("noop").unwrap().status, Status::Skipped);
}

#[tokio::test(flavor = "multi_thread")]
async fn container_step_through_fake_runtime() {
    register_all();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script_running();
    runtime.script_logs([(false, b"container says hi\n".to_vec())]);
    runtime.script_exec_exit(0);
    skein_container::executor::register_with_runtime(runtime.clone());

    let dir = tempfile::tempdir().unwrap();
    let mut step = cmd_step("inside", "echo hi");
    step.executor.kind = "docker".to_string();
    step.executor.config = serde_json::json!({"container_name": "worker"});

    let dag = Dag::new("containerized", vec![step]);
    let ctx = RunContext::new(dir.path().join("logs"));
    let status = SchedulerBuilder::new(dag, ctx).build().unwrap().schedule().await.unwrap();

    assert_eq!(status.status, Status::Succeeded);
    let node = status.node("inside").unwrap();
    let stdout = std::fs::read_to_string(&node.stdout).unwrap();
    assert!(stdout.contains("container says hi"));
    assert_eq!(runtime.execs().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_record_round_trips_through_json() {
    register_all();
    let dir = tempfile::tempdir().unwrap();
    let mut dag = Dag::new("persisted", vec![cmd_step("only", "echo done")]);
    dag.handlers.on_exit = Some(cmd_step("sweep", "true"));
    let ctx = RunContext::new(dir.path().join("logs"));
    let status = SchedulerBuilder::new(dag, ctx).build().unwrap().schedule().await.unwrap();

    let json = serde_json::to_string_pretty(&status).unwrap();
    let parsed: skein_core::RunStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, status);
    assert_eq!(parsed.attempt_key.len(), 32);
    assert!(parsed.on_exit.is_some());
    assert!(parsed.finished_at.unwrap() >= parsed.started_at.unwrap());
}
