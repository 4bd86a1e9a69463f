// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

fn node_with(status: Status) -> Node {
    let mut n = Node::new("s");
    n.status = status;
    n
}

#[yare::parameterized(
    failed_wins = { &[Status::Succeeded, Status::Failed, Status::Cancelled], Status::Failed },
    cancelled_next = { &[Status::Succeeded, Status::Cancelled, Status::Skipped], Status::Cancelled },
    partial_next = { &[Status::Succeeded, Status::PartialSuccess], Status::PartialSuccess },
    all_succeeded = { &[Status::Succeeded, Status::Succeeded], Status::Succeeded },
    succeeded_and_skipped = { &[Status::Succeeded, Status::Skipped], Status::Succeeded },
    all_skipped = { &[Status::Skipped, Status::Skipped], Status::Succeeded },
    still_running = { &[Status::Succeeded, Status::Running], Status::Running },
    waiting_counts_as_running = { &[Status::WaitingApproval], Status::Running },
    untouched = { &[Status::NotStarted, Status::NotStarted], Status::NotStarted },
)]
fn aggregate_reduction(statuses: &[Status], expect: Status) {
    let nodes: Vec<Node> = statuses.iter().map(|s| node_with(*s)).collect();
    assert_eq!(aggregate_status(&nodes), expect);
}

#[test]
fn attempt_key_is_deterministic() {
    let a = attempt_key("root", "run-1", "child", "run-2", "try-1");
    let b = attempt_key("root", "run-1", "child", "run-2", "try-1");
    assert_eq!(a, b);
    assert_eq!(a.len(), 32);
}

#[test]
fn attempt_key_differs_on_any_field() {
    let base = attempt_key("root", "run-1", "child", "run-2", "try-1");
    assert_ne!(base, attempt_key("root2", "run-1", "child", "run-2", "try-1"));
    assert_ne!(base, attempt_key("root", "run-9", "child", "run-2", "try-1"));
    assert_ne!(base, attempt_key("root", "run-1", "child", "run-2", "try-2"));
}

proptest! {
    // Length-prefixing means shifting bytes between adjacent fields
    // changes the key.
    #[test]
    fn attempt_key_no_concat_collisions(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
        let joined = format!("{a}{b}");
        prop_assume!(!a.is_empty() && !joined.is_empty());
        let k1 = attempt_key(&a, &b, "d", "r", "t");
        let k2 = attempt_key(&joined, "", "d", "r", "t");
        prop_assert_ne!(k1, k2);
    }
}

#[test]
fn run_status_serializes_stable_fields() {
    let status = RunStatus {
        dag_name: "etl".into(),
        dag_run_id: "run-abc".into(),
        attempt_id: "try-1".into(),
        attempt_key: attempt_key("etl", "run-abc", "etl", "run-abc", "try-1"),
        root: None,
        parent: None,
        status: Status::Succeeded,
        pid: Some(42),
        queued_at: None,
        created_at: chrono::Utc::now(),
        started_at: None,
        finished_at: None,
        log: None,
        preconditions: vec![],
        worker_id: None,
        trigger_type: TriggerType::Manual,
        scheduled_time: None,
        nodes: vec![node_with(Status::Succeeded)],
        on_init: None,
        on_exit: None,
        on_success: None,
        on_failure: None,
        on_cancel: None,
        on_wait: None,
        error: None,
    };
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["dagName"], "etl");
    assert_eq!(json["dagRunId"], "run-abc");
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["triggerType"], "manual");
    assert_eq!(json["nodes"][0]["status"], "succeeded");
    assert!(json.get("onExit").is_none());

    let parsed: RunStatus = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, status);
}
