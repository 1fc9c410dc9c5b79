//! Test fixtures for integration tests.
//!
//! Provides a scripted in-process worker with per-subtask behaviors, plan
//! builders, and helpers for collecting orchestrator events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hive::orchestration::{
    AgentWorker, Orchestrator, OrchestratorConfig, OrchestratorEvent, WorkerOutput, Workspace,
};
use hive::plan::{PlanStore, SubTask, TaskPlan};
use hive::{Error, Result};

/// How the scripted worker should handle one subtask.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Sleep for the delay, then report success.
    Succeed { delay: Duration, tests_passed: bool },
    /// Sleep for the delay, then report failure.
    Fail { delay: Duration, error: String },
    /// Never finish; only cancellation (or the timeout) ends it.
    Hang,
    /// Write a file into the workspace, commit it, and report success.
    WriteFileAndSucceed { file: String },
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::Succeed {
            delay: Duration::from_millis(10),
            tests_passed: false,
        }
    }
}

/// Decrements the active-worker gauge even when the invocation future is
/// dropped mid-flight (timeout abandonment).
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An in-process worker driven by a per-subtask script.
///
/// Tracks every invocation and the peak number of concurrently running
/// invocations, which is how the pool-limit properties are asserted.
#[derive(Default)]
pub struct ScriptedWorker {
    behaviors: Mutex<HashMap<String, Behavior>>,
    invoked: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior for one subtask id.
    pub fn script(&self, subtask_id: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(subtask_id.to_string(), behavior);
    }

    /// Ids of subtasks this worker was invoked for, in start order.
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }

    /// Total number of worker invocations.
    pub fn invocation_count(&self) -> usize {
        self.invoked.lock().unwrap().len()
    }

    /// Peak number of concurrently running invocations.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, subtask_id: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(subtask_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[async_trait]
impl AgentWorker for ScriptedWorker {
    async fn execute(
        &self,
        subtask: &SubTask,
        workspace: &Workspace,
        cancel: CancellationToken,
    ) -> Result<WorkerOutput> {
        self.invoked.lock().unwrap().push(subtask.id.clone());
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(current, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match self.behavior_for(&subtask.id) {
            Behavior::Succeed {
                delay,
                tests_passed,
            } => {
                Self::sleep_or_cancel(delay, &cancel).await?;
                Ok(WorkerOutput::success("done", tests_passed))
            }
            Behavior::Fail { delay, error } => {
                Self::sleep_or_cancel(delay, &cancel).await?;
                Ok(WorkerOutput::failure(&error))
            }
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            Behavior::WriteFileAndSucceed { file } => {
                std::fs::write(workspace.path.join(&file), subtask.id.as_bytes())?;
                let git = hive::git::GitOps::new(&workspace.path)?;
                git.commit_all(&workspace.path, &format!("{}: {}", subtask.id, file))?;
                Ok(WorkerOutput::success("committed", true))
            }
        }
    }
}

/// A plan store rooted in a temp directory plus everything needed to run
/// the orchestrator against a scripted worker.
pub struct TestRig {
    pub store_dir: TempDir,
    pub worker: std::sync::Arc<ScriptedWorker>,
    pub events_rx: mpsc::Receiver<OrchestratorEvent>,
    pub orchestrator: Orchestrator,
}

impl TestRig {
    /// Build a rig with the given concurrency limit.
    pub fn new(max_agents: usize) -> Self {
        Self::with_config(OrchestratorConfig {
            max_agents,
            ..Default::default()
        })
    }

    /// Build a rig with a full configuration.
    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(config, |orchestrator| orchestrator)
    }

    /// Build a rig, customizing the orchestrator (workspaces, merger).
    pub fn build<F>(config: OrchestratorConfig, customize: F) -> Self
    where
        F: FnOnce(Orchestrator) -> Orchestrator,
    {
        let store_dir = TempDir::new().expect("temp dir");
        let store = PlanStore::new(store_dir.path());
        let worker = std::sync::Arc::new(ScriptedWorker::new());
        let worker_dyn: std::sync::Arc<dyn AgentWorker> = worker.clone();
        let (events_tx, events_rx) = mpsc::channel(256);
        let orchestrator =
            customize(Orchestrator::new(config, store, worker_dyn).with_events(events_tx));
        Self {
            store_dir,
            worker,
            events_rx,
            orchestrator,
        }
    }

    /// A fresh store handle over the rig's directory (for reload checks).
    pub fn store(&self) -> PlanStore {
        PlanStore::new(self.store_dir.path())
    }

    /// Drain all buffered orchestrator events.
    pub fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Build a plan from `(id, deps)` pairs.
pub fn plan_of(id: &str, tasks: &[(&str, &[&str])]) -> TaskPlan {
    let mut plan = TaskPlan::new(id, &format!("{} description", id));
    for (task_id, deps) in tasks {
        let mut task = SubTask::new(task_id, task_id, &format!("{} work", task_id));
        for dep in *deps {
            task = task.with_dependency(dep);
        }
        plan.subtasks.push(task);
    }
    plan
}

/// Index of the first event matching the predicate.
pub fn position_of<F>(events: &[OrchestratorEvent], predicate: F) -> Option<usize>
where
    F: Fn(&OrchestratorEvent) -> bool,
{
    events.iter().position(predicate)
}

/// True if the event is a WorkerStarted for the given subtask.
pub fn is_start_of(event: &OrchestratorEvent, subtask_id: &str) -> bool {
    matches!(
        event,
        OrchestratorEvent::WorkerStarted { subtask_id: id, .. } if id == subtask_id
    )
}

/// True if the event is the completion signal for the given phase.
pub fn is_phase_completed(event: &OrchestratorEvent, phase: usize) -> bool {
    matches!(event, OrchestratorEvent::PhaseCompleted { phase: p } if *p == phase)
}
