//! Phase-ordered execution tests.
//!
//! Covers the core scheduler properties: dependencies always complete
//! before dependents start, the pool limit bounds concurrency, phases act
//! as barriers, and progress events arrive in order.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use hive::orchestration::{OrchestratorConfig, OrchestratorEvent, ResultMerger, WorkspaceManager};
use hive::plan::TaskStatus;
use hive::{Error, RunState};

use crate::fixtures::{is_phase_completed, is_start_of, plan_of, position_of, Behavior, TestRig};

#[tokio::test]
async fn test_single_task_run() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-single", &[("t1", &[])]);

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, RunState::Completed);
    assert!(result.error.is_none());
    assert_eq!(result.results.len(), 1);
    assert!(result.results[0].success);
    assert_eq!(result.counts.completed, 1);
    assert_eq!(plan.get("t1").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_dependencies_complete_before_dependents() {
    let mut rig = TestRig::new(4);
    let mut plan = plan_of(
        "plan-chain",
        &[("t1", &[]), ("t2", &["t1"]), ("t3", &["t2"])],
    );

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    // Start order must follow the chain
    assert_eq!(rig.worker.invoked(), vec!["t1", "t2", "t3"]);
    // Every completed subtask has completed dependencies
    for task in &plan.subtasks {
        assert_eq!(task.status, TaskStatus::Completed);
        for dep in &task.depends_on {
            assert_eq!(plan.get(dep).unwrap().status, TaskStatus::Completed);
        }
    }
}

#[tokio::test]
async fn test_pool_limit_bounds_concurrency() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of(
        "plan-wide",
        &[
            ("t1", &[]),
            ("t2", &[]),
            ("t3", &[]),
            ("t4", &[]),
            ("t5", &[]),
            ("t6", &[]),
        ],
    );
    for id in ["t1", "t2", "t3", "t4", "t5", "t6"] {
        rig.worker.script(
            id,
            Behavior::Succeed {
                delay: Duration::from_millis(30),
                tests_passed: false,
            },
        );
    }

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(rig.worker.invocation_count(), 6);
    assert!(
        rig.worker.max_active() <= 2,
        "max {} workers ran concurrently with a pool of 2",
        rig.worker.max_active()
    );
}

#[tokio::test]
async fn test_single_agent_serializes_independent_tasks() {
    let mut rig = TestRig::new(1);
    let mut plan = plan_of("plan-serial", &[("t1", &[]), ("t2", &[]), ("t3", &[])]);
    for id in ["t1", "t2", "t3"] {
        rig.worker.script(
            id,
            Behavior::Succeed {
                delay: Duration::from_millis(40),
                tests_passed: false,
            },
        );
    }

    let started = Instant::now();
    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.success);
    assert_eq!(rig.worker.max_active(), 1);
    // One at a time: total wall time is at least the sum of durations
    assert!(
        elapsed >= Duration::from_millis(120),
        "serial run finished too fast: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_fan_out_runs_in_parallel_after_root() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of(
        "plan-fanout",
        &[("t1", &[]), ("t2", &["t1"]), ("t3", &["t1"])],
    );
    for id in ["t2", "t3"] {
        rig.worker.script(
            id,
            Behavior::Succeed {
                delay: Duration::from_millis(100),
                tests_passed: false,
            },
        );
    }

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    // t2 and t3 really overlapped
    assert_eq!(rig.worker.max_active(), 2);

    let events = rig.drain_events();
    let phase0_done = position_of(&events, |e| is_phase_completed(e, 0)).unwrap();
    let start_t2 = position_of(&events, |e| is_start_of(e, "t2")).unwrap();
    let start_t3 = position_of(&events, |e| is_start_of(e, "t3")).unwrap();
    let phase1_done = position_of(&events, |e| is_phase_completed(e, 1)).unwrap();

    // Phase 0 closes before anything in phase 1 starts
    assert!(phase0_done < start_t2);
    assert!(phase0_done < start_t3);
    // Phase 1 closes only after both completions
    assert_eq!(phase1_done, events.len() - 1);
}

#[tokio::test]
async fn test_phase_barrier_holds_even_when_dependencies_are_done() {
    // t3 depends only on t1, but sits in phase 1; slow t2 shares phase 0,
    // so t3 must wait for it despite having all dependencies completed.
    let mut rig = TestRig::new(4);
    let mut plan = plan_of(
        "plan-barrier",
        &[("t1", &[]), ("t2", &[]), ("t3", &["t1"])],
    );
    rig.worker.script(
        "t2",
        Behavior::Succeed {
            delay: Duration::from_millis(120),
            tests_passed: false,
        },
    );

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(result.success);

    let events = rig.drain_events();
    let t2_completed = position_of(&events, |e| {
        matches!(
            e,
            OrchestratorEvent::SubtaskCompleted { result, .. } if result.subtask_id == "t2"
        )
    })
    .unwrap();
    let start_t3 = position_of(&events, |e| is_start_of(e, "t3")).unwrap();
    assert!(
        t2_completed < start_t3,
        "t3 started before phase 0 finished"
    );
}

#[tokio::test]
async fn test_worker_started_precedes_completion_for_every_task() {
    let mut rig = TestRig::new(3);
    let mut plan = plan_of("plan-events", &[("t1", &[]), ("t2", &["t1"])]);

    rig.orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    let events = rig.drain_events();
    for id in ["t1", "t2"] {
        let started = position_of(&events, |e| is_start_of(e, id)).unwrap();
        let completed = position_of(&events, |e| {
            matches!(
                e,
                OrchestratorEvent::SubtaskCompleted { result, .. } if result.subtask_id == id
            )
        })
        .unwrap();
        assert!(started < completed);
    }
}

#[tokio::test]
async fn test_zero_max_agents_rejected() {
    let mut rig = TestRig::new(0);
    let mut plan = plan_of("plan-zero", &[("t1", &[])]);

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_results_carry_worker_identity_and_duration() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-results", &[("t1", &[]), ("t2", &[])]);
    rig.worker.script(
        "t1",
        Behavior::Succeed {
            delay: Duration::from_millis(25),
            tests_passed: true,
        },
    );

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.results.len(), 2);
    let t1 = result
        .results
        .iter()
        .find(|r| r.subtask_id == "t1")
        .unwrap();
    assert!(t1.duration >= Duration::from_millis(25));
    assert!(t1.merge_warning.is_none());

    let t2 = result
        .results
        .iter()
        .find(|r| r.subtask_id == "t2")
        .unwrap();
    assert_ne!(t1.worker_id, t2.worker_id);
}

#[tokio::test]
async fn test_plan_persisted_during_run() {
    let mut rig = TestRig::new(2);
    let mut plan = plan_of("plan-persisted", &[("t1", &[])]);

    rig.orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    // The stored plan reflects the final state, and the markdown rendering
    // was regenerated alongside it.
    let loaded = rig.store().load("plan-persisted").unwrap();
    assert_eq!(loaded.get("t1").unwrap().status, TaskStatus::Completed);
    assert!(rig.store_dir.path().join("plan-persisted.md").exists());
}

#[tokio::test]
async fn test_git_isolated_workspaces_with_automerge() {
    use git2::{IndexAddOption, Repository, Signature};

    // A real repository: each worker gets its own worktree, writes a file,
    // commits, and the orchestrator merges every branch into the base.
    let dir = tempfile::TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    std::fs::create_dir_all(&repo_path).unwrap();
    let repo = Repository::init(&repo_path).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    std::fs::write(repo_path.join("README.md"), "# Test\n").unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["."].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();
    drop(tree);
    drop(repo);

    let git = hive::git::GitOps::new(&repo_path).unwrap();
    let base = git.current_head().unwrap();

    let workspaces = WorkspaceManager::new(&repo_path, &dir.path().join("worktrees")).unwrap();
    let merger = ResultMerger::new(hive::git::GitOps::new(&repo_path).unwrap(), &base, false);
    let mut rig = TestRig::build(
        OrchestratorConfig {
            max_agents: 2,
            auto_merge: true,
            base_branch: base.clone(),
            ..Default::default()
        },
        |orchestrator| orchestrator.with_workspaces(workspaces).with_merger(merger),
    );

    let mut plan = plan_of("plan-git", &[("t1", &[]), ("t2", &[])]);
    for id in ["t1", "t2"] {
        rig.worker.script(id, Behavior::WriteFileAndSucceed {
            file: format!("{}.txt", id),
        });
    }

    let result = rig
        .orchestrator
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    for r in &result.results {
        assert!(r.merge_warning.is_none(), "unexpected: {:?}", r.merge_warning);
    }

    // Both files are in the base branch's tree after the merges
    let repo = Repository::open(&repo_path).unwrap();
    let tree = repo
        .find_branch(&base, git2::BranchType::Local)
        .unwrap()
        .get()
        .peel_to_tree()
        .unwrap();
    assert!(tree.get_name("t1.txt").is_some());
    assert!(tree.get_name("t2.txt").is_some());

    // Worktrees were cleaned up after completion
    assert_eq!(
        hive::git::GitOps::new(&repo_path)
            .unwrap()
            .list_worktrees()
            .unwrap()
            .len(),
        0
    );
}
