//! Resume, retry, and cancellation tests.
//!
//! A plan on disk is always consistent: a crashed or cancelled run leaves
//! InProgress subtasks behind, the next load reclassifies them as
//! Interrupted, and retry/reset are the only ways back to Pending.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hive::plan::{TaskStatus, WorkerId};
use hive::RunState;

use crate::fixtures::{plan_of, Behavior, TestRig};

#[tokio::test]
async fn test_idempotent_resume_runs_zero_workers() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-resume", &[("t1", &[]), ("t2", &["t1"])]);

    let first = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(first.success);
    let invocations_after_first = rig.worker.invocation_count();

    // Reload from disk and execute again: nothing to do
    let mut reloaded = rig.store().load("plan-resume").unwrap();
    let second = rig
        .orchestrator
        .execute(&mut reloaded, CancellationToken::new())
        .await
        .unwrap();

    assert!(second.success);
    assert_eq!(second.state, RunState::Completed);
    assert!(second.results.is_empty());
    assert_eq!(rig.worker.invocation_count(), invocations_after_first);
}

#[tokio::test]
async fn test_partial_resume_only_runs_remaining_work() {
    let mut rig = TestRig::new(2);

    // Simulate a prior run that completed t1 and crashed before t2
    let mut plan = plan_of("plan-partial", &[("t1", &[]), ("t2", &["t1"])]);
    plan.start_subtask("t1", WorkerId::new()).unwrap();
    plan.complete_subtask("t1").unwrap();
    rig.store().save(&plan).unwrap();

    let mut reloaded = rig.store().load("plan-partial").unwrap();
    let result = rig
        .orchestrator
        .execute(&mut reloaded, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    // Only t2 was dispatched
    assert_eq!(rig.worker.invoked(), vec!["t2"]);
}

#[tokio::test]
async fn test_crash_reclassification_on_load() {
    let rig = TestRig::new(2);

    let mut plan = plan_of("plan-crash", &[("t3", &[])]);
    plan.start_subtask("t3", WorkerId::new()).unwrap();
    rig.store().save(&plan).unwrap();

    let reloaded = rig.store().load("plan-crash").unwrap();
    assert_eq!(reloaded.get("t3").unwrap().status, TaskStatus::Interrupted);
    // An interrupted subtask cannot auto-resume
    assert!(!reloaded.can_make_progress());
}

#[tokio::test]
async fn test_stalled_plan_returns_without_spinning() {
    let mut rig = TestRig::new(2);

    let mut plan = plan_of("plan-stalled", &[("t1", &[])]);
    plan.start_subtask("t1", WorkerId::new()).unwrap();
    rig.store().save(&plan).unwrap();

    let mut reloaded = rig.store().load("plan-stalled").unwrap();
    let result = rig
        .orchestrator
        .execute(&mut reloaded, CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.state, RunState::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("no progress possible: retry or reset required")
    );
    assert_eq!(rig.worker.invocation_count(), 0);
}

#[tokio::test]
async fn test_retry_after_failure_completes_plan() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-retry", &[("t1", &[]), ("t2", &["t1"])]);
    rig.worker.script(
        "t1",
        Behavior::Fail {
            delay: Duration::from_millis(5),
            error: "first attempt".to_string(),
        },
    );

    let first = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(!first.success);
    assert_eq!(plan.get("t2").unwrap().status, TaskStatus::Blocked);

    // Retry resets exactly the failed and blocked subtasks
    let reset_count = plan.retry();
    assert_eq!(reset_count, 2);
    rig.worker.script(
        "t1",
        Behavior::Succeed {
            delay: Duration::from_millis(5),
            tests_passed: false,
        },
    );

    let second = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::Completed);
    assert_eq!(plan.get("t2").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_retry_leaves_completed_work_alone() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-retry-scope", &[("t1", &[]), ("t2", &[])]);
    rig.worker.script(
        "t2",
        Behavior::Fail {
            delay: Duration::from_millis(5),
            error: "broken".to_string(),
        },
    );

    rig.orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::Completed);

    let reset_count = plan.retry();
    assert_eq!(reset_count, 1);
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::Completed);
    assert_eq!(plan.get("t2").unwrap().status, TaskStatus::Pending);

    rig.worker.script(
        "t2",
        Behavior::Succeed {
            delay: Duration::from_millis(5),
            tests_passed: false,
        },
    );
    let second = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(second.success);
    // t1 ran once, t2 ran twice
    assert_eq!(
        rig.worker
            .invoked()
            .iter()
            .filter(|id| *id == "t1")
            .count(),
        1
    );
    assert_eq!(
        rig.worker
            .invoked()
            .iter()
            .filter(|id| *id == "t2")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_reset_reruns_everything() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-reset", &[("t1", &[]), ("t2", &["t1"])]);

    rig.orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rig.worker.invocation_count(), 2);

    plan.reset();
    for task in &plan.subtasks {
        assert_eq!(task.status, TaskStatus::Pending);
    }

    let second = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(rig.worker.invocation_count(), 4);
}

#[tokio::test]
async fn test_cancellation_returns_partial_result() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-cancel", &[("t1", &[]), ("t2", &[]), ("t3", &["t1"])]);
    rig.worker.script("t1", Behavior::Hang);
    rig.worker.script(
        "t2",
        Behavior::Succeed {
            delay: Duration::from_millis(10),
            tests_passed: false,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = rig.orchestrator.execute(&mut plan, cancel).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.state, RunState::Cancelled);
    assert_eq!(result.error.as_deref(), Some("run cancelled"));

    // t2 finished before the cancellation and is in the partial result
    assert!(result.results.iter().any(|r| r.subtask_id == "t2" && r.success));
    assert_eq!(plan.get("t2").unwrap().status, TaskStatus::Completed);
    // t1 was abandoned mid-flight and stays InProgress on disk...
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::InProgress);
    // ...t3 was never dispatched
    assert!(!rig.worker.invoked().contains(&"t3".to_string()));

    // ...until the next load reclassifies it for retry
    let reloaded = rig.store().load("plan-cancel").unwrap();
    assert_eq!(reloaded.get("t1").unwrap().status, TaskStatus::Interrupted);

    let mut reloaded = reloaded;
    assert_eq!(reloaded.retry(), 1);
    assert_eq!(reloaded.get("t1").unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_cancellation_before_any_dispatch() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-precancel", &[("t1", &[])]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = rig.orchestrator.execute(&mut plan, cancel).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.state, RunState::Cancelled);
    assert_eq!(rig.worker.invocation_count(), 0);
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::Pending);
}
