//! Orchestrator: phase-by-phase execution of a task plan.
//!
//! The orchestrator drives the whole run: it grades the dependency graph
//! into phases, dispatches ready subtasks to pooled workers, persists the
//! plan after every status transition, merges successful branches, and
//! aggregates the final result. All plan mutations happen from the
//! orchestrator's own execution context; workers only return values.
//!
//! Ordering guarantees: no subtask of phase k+1 starts before every subtask
//! of phase k has reached a terminal status, and the number of InProgress
//! subtasks never exceeds the pool size.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestration::merge::ResultMerger;
use crate::orchestration::pool::AgentPool;
use crate::orchestration::worker::{AgentWorker, WorkerOutput, Workspace};
use crate::orchestration::workspace::WorkspaceManager;
use crate::plan::phases::phase_groups;
use crate::plan::plan::{StatusCounts, TaskPlan};
use crate::plan::store::PlanStore;
use crate::plan::task::{TaskStatus, WorkerId};
use crate::{hlog, hlog_debug, hlog_warn};

/// Caller-supplied execution parameters for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrently running workers.
    pub max_agents: usize,
    /// Per-subtask execution timeout.
    pub task_timeout: Duration,
    /// Run each worker in a separate OS process.
    pub use_process_isolation: bool,
    /// Merge successful branches into the integration branch.
    pub auto_merge: bool,
    /// The integration branch merges land on.
    pub base_branch: String,
    /// Only merge subtasks whose worker reported passing tests.
    pub require_tests_pass: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: crate::config::DEFAULT_MAX_AGENTS,
            task_timeout: Duration::from_secs(crate::config::DEFAULT_TASK_TIMEOUT_SECS),
            use_process_isolation: true,
            auto_merge: false,
            base_branch: "main".to_string(),
            require_tests_pass: false,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from the user configuration file's defaults.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_agents: config.effective_max_agents(),
            task_timeout: Duration::from_secs(config.effective_task_timeout_secs()),
            ..Default::default()
        }
    }
}

/// Run-level state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable record of one subtask execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The subtask that was executed.
    pub subtask_id: String,
    /// The worker slot that executed it.
    pub worker_id: WorkerId,
    /// Whether the subtask completed successfully.
    pub success: bool,
    /// Wall time of the worker invocation.
    pub duration: Duration,
    /// Error description when `success` is false.
    pub error: Option<String>,
    /// Whether the failure was a per-subtask timeout.
    pub timed_out: bool,
    /// Merge warning attached to an otherwise-completed subtask.
    pub merge_warning: Option<String>,
}

/// Aggregated outcome of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    /// True only if every subtask in the plan reached Completed.
    pub success: bool,
    /// Final run state (Completed, Failed, or Cancelled).
    pub state: RunState,
    /// Total wall time of the run.
    pub total_duration: Duration,
    /// Per-subtask results, in completion order.
    pub results: Vec<TaskResult>,
    /// Top-level error description, if any.
    pub error: Option<String>,
    /// Subtask status counts at the end of the run.
    pub counts: StatusCounts,
}

/// Progress events emitted during a run.
///
/// Ordering: `WorkerStarted` always precedes the matching
/// `SubtaskCompleted`; `PhaseCompleted(k)` is emitted after every terminal
/// event of phase k and before any `WorkerStarted` of phase k+1.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A worker began executing a subtask.
    WorkerStarted {
        worker_id: WorkerId,
        subtask_id: String,
    },
    /// A subtask reached a terminal outcome for this run.
    SubtaskCompleted {
        worker_id: WorkerId,
        result: TaskResult,
    },
    /// Every subtask of the phase reached a terminal status.
    PhaseCompleted { phase: usize },
}

/// What a dispatched worker invocation came back with.
enum ExecOutcome {
    Finished(WorkerOutput),
    Errored(String),
    TimedOut,
    Cancelled,
}

/// Message a dispatched worker task sends back into the orchestrator loop.
///
/// Carries the pool slot so the permit is not released until the subtask's
/// terminal transition has been applied; the InProgress count can therefore
/// never exceed the pool size, even transiently. If the worker task dies,
/// the dropped message still releases the slot.
struct WorkerMessage {
    subtask_id: String,
    worker_id: WorkerId,
    duration: Duration,
    workspace: Workspace,
    outcome: ExecOutcome,
    slot: crate::orchestration::pool::AgentSlot,
}

enum Step {
    Acquired(crate::orchestration::pool::AgentSlot),
    Joined(WorkerMessage),
    Cancelled,
}

/// Drives phase-by-phase execution of task plans.
///
/// Constructed per run; owns its own pool, so concurrent plans never share
/// hidden state.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: PlanStore,
    pool: AgentPool,
    worker: Arc<dyn AgentWorker>,
    workspaces: Option<WorkspaceManager>,
    merger: Option<ResultMerger>,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
    state: RunState,
}

impl Orchestrator {
    /// Create an orchestrator over the given plan store and worker.
    pub fn new(config: OrchestratorConfig, store: PlanStore, worker: Arc<dyn AgentWorker>) -> Self {
        let pool = AgentPool::new(config.max_agents);
        Self {
            config,
            store,
            pool,
            worker,
            workspaces: None,
            merger: None,
            event_tx: None,
            state: RunState::Idle,
        }
    }

    /// Attach a workspace manager; each dispatched subtask then gets its
    /// own git worktree and branch.
    pub fn with_workspaces(mut self, workspaces: WorkspaceManager) -> Self {
        self.workspaces = Some(workspaces);
        self
    }

    /// Attach a result merger for auto-merge of successful branches.
    pub fn with_merger(mut self, merger: ResultMerger) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Attach an event channel for progress reporting.
    pub fn with_events(mut self, event_tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The execution configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    fn workspace_for(&self, plan_id: &str, subtask_id: &str) -> Result<Workspace> {
        match &self.workspaces {
            Some(manager) => manager.create(plan_id, subtask_id),
            // Without git isolation workers share the current directory;
            // the branch name is still assigned for bookkeeping.
            None => Ok(Workspace {
                path: std::path::PathBuf::from("."),
                branch: WorkspaceManager::branch_name(plan_id, subtask_id),
            }),
        }
    }

    /// Execute a plan until it completes, stalls, or is cancelled.
    ///
    /// Never returns `Err` for subtask failures, stalls, or cancellation;
    /// those are reported on the `OrchestratorResult`. Only structural
    /// errors (invalid plan, broken git state, worker panics) propagate.
    pub async fn execute(
        &mut self,
        plan: &mut TaskPlan,
        cancel: CancellationToken,
    ) -> Result<OrchestratorResult> {
        if self.config.max_agents == 0 {
            return Err(Error::Validation(
                "max_agents must be at least 1".to_string(),
            ));
        }
        plan.validate()?;

        let started = Instant::now();
        self.state = RunState::Running;
        hlog!(
            "Run started: plan {} ({} subtasks, {} workers)",
            plan.id,
            plan.subtasks.len(),
            self.config.max_agents
        );

        // Invocation-time reclassification and readiness re-evaluation: a
        // subtask left InProgress belongs to a dead run, and anything
        // depending on unsatisfiable work is blocked up front.
        plan.reclassify_interrupted();
        plan.block_unsatisfiable();
        self.store.save(plan)?;

        if !plan.can_make_progress() {
            let result = self.finish(plan, started, &cancel, Vec::new())?;
            return Ok(result);
        }

        let groups = phase_groups(&plan.subtasks)?;
        let mut results: Vec<TaskResult> = Vec::new();

        'phases: for (phase, ids) in groups.iter().enumerate() {
            let mut pending: VecDeque<String> = ids
                .iter()
                .filter(|id| {
                    plan.get(id)
                        .map(|t| t.status == TaskStatus::Pending && self.dependencies_ok(plan, t))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            let mut join_set: JoinSet<WorkerMessage> = JoinSet::new();

            while !pending.is_empty() || !join_set.is_empty() {
                if cancel.is_cancelled() {
                    pending.clear();
                }

                let step = if pending.is_empty() {
                    match join_set.join_next().await {
                        Some(joined) => {
                            Step::Joined(joined.map_err(|e| Error::TaskJoin(e.to_string()))?)
                        }
                        None => break,
                    }
                } else {
                    tokio::select! {
                        slot = self.pool.acquire(&cancel) => match slot {
                            Ok(slot) => Step::Acquired(slot),
                            Err(Error::Cancelled) => Step::Cancelled,
                            Err(e) => return Err(e),
                        },
                        Some(joined) = join_set.join_next() => {
                            Step::Joined(joined.map_err(|e| Error::TaskJoin(e.to_string()))?)
                        }
                    }
                };

                match step {
                    Step::Acquired(slot) => {
                        // Pending is non-empty on this arm; a drop of the
                        // slot releases it either way.
                        if let Some(subtask_id) = pending.pop_front() {
                            self.dispatch(plan, &subtask_id, slot, &cancel, &mut join_set, &mut results)
                                .await?;
                        }
                    }
                    Step::Joined(message) => {
                        self.settle(plan, message, &mut results).await?;
                    }
                    Step::Cancelled => {
                        pending.clear();
                    }
                }
            }

            if cancel.is_cancelled() {
                // In-flight work has drained; leave the remaining phases
                // untouched for the next run.
                break 'phases;
            }

            hlog_debug!("Phase {} completed", phase);
            self.emit(OrchestratorEvent::PhaseCompleted { phase }).await;
        }

        let result = self.finish(plan, started, &cancel, results)?;
        Ok(result)
    }

    fn dependencies_ok(&self, plan: &TaskPlan, task: &crate::plan::task::SubTask) -> bool {
        plan.dependencies_completed(task)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        plan: &mut TaskPlan,
        subtask_id: &str,
        slot: crate::orchestration::pool::AgentSlot,
        cancel: &CancellationToken,
        join_set: &mut JoinSet<WorkerMessage>,
        results: &mut Vec<TaskResult>,
    ) -> Result<()> {
        let worker_id = slot.worker_id();

        plan.start_subtask(subtask_id, worker_id)?;
        self.store.save(plan)?;
        self.emit(OrchestratorEvent::WorkerStarted {
            worker_id,
            subtask_id: subtask_id.to_string(),
        })
        .await;

        let workspace = match self.workspace_for(&plan.id, subtask_id) {
            Ok(workspace) => workspace,
            Err(e) => {
                // The slot is released on drop; the subtask fails without
                // ever reaching a worker.
                hlog_warn!("Workspace setup failed for {}: {}", subtask_id, e);
                plan.fail_subtask(subtask_id)?;
                plan.block_unsatisfiable();
                self.store.save(plan)?;
                let result = TaskResult {
                    subtask_id: subtask_id.to_string(),
                    worker_id,
                    success: false,
                    duration: Duration::ZERO,
                    error: Some(format!("workspace setup failed: {}", e)),
                    timed_out: false,
                    merge_warning: None,
                };
                results.push(result.clone());
                self.emit(OrchestratorEvent::SubtaskCompleted { worker_id, result })
                    .await;
                return Ok(());
            }
        };

        let subtask = plan
            .get(subtask_id)
            .cloned()
            .ok_or_else(|| Error::SubtaskNotFound(subtask_id.to_string()))?;
        let worker = Arc::clone(&self.worker);
        let timeout = self.config.task_timeout;
        let child_cancel = cancel.child_token();

        join_set.spawn(async move {
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(timeout, worker.execute(&subtask, &workspace, child_cancel))
                    .await
                {
                    Ok(Ok(output)) => ExecOutcome::Finished(output),
                    Ok(Err(Error::Cancelled)) => ExecOutcome::Cancelled,
                    Ok(Err(e)) => ExecOutcome::Errored(e.to_string()),
                    Err(_) => ExecOutcome::TimedOut,
                };
            WorkerMessage {
                subtask_id: subtask.id,
                worker_id,
                duration: started.elapsed(),
                workspace,
                outcome,
                slot,
            }
        });

        Ok(())
    }

    async fn settle(
        &self,
        plan: &mut TaskPlan,
        message: WorkerMessage,
        results: &mut Vec<TaskResult>,
    ) -> Result<()> {
        let WorkerMessage {
            subtask_id,
            worker_id,
            duration,
            workspace,
            outcome,
            slot,
        } = message;
        // Held until the terminal transition is applied and persisted.
        let _slot = slot;

        let result = match outcome {
            ExecOutcome::Finished(output) if output.success => {
                plan.complete_subtask(&subtask_id)?;
                // Completed is durable before the merge runs; a conflict
                // (or a fatal git error) never rolls the subtask back.
                self.store.save(plan)?;

                let merge_warning = if self.config.auto_merge {
                    match &self.merger {
                        Some(merger) => merger.merge(&workspace.branch, output.tests_passed)?.warning(),
                        None => None,
                    }
                } else {
                    None
                };

                TaskResult {
                    subtask_id: subtask_id.clone(),
                    worker_id,
                    success: true,
                    duration,
                    error: None,
                    timed_out: false,
                    merge_warning,
                }
            }
            ExecOutcome::Finished(output) => {
                plan.fail_subtask(&subtask_id)?;
                plan.block_unsatisfiable();
                TaskResult {
                    subtask_id: subtask_id.clone(),
                    worker_id,
                    success: false,
                    duration,
                    error: Some(
                        output
                            .error
                            .unwrap_or_else(|| "worker reported failure".to_string()),
                    ),
                    timed_out: false,
                    merge_warning: None,
                }
            }
            ExecOutcome::Errored(error) => {
                plan.fail_subtask(&subtask_id)?;
                plan.block_unsatisfiable();
                TaskResult {
                    subtask_id: subtask_id.clone(),
                    worker_id,
                    success: false,
                    duration,
                    error: Some(error),
                    timed_out: false,
                    merge_warning: None,
                }
            }
            ExecOutcome::TimedOut => {
                plan.fail_subtask(&subtask_id)?;
                plan.block_unsatisfiable();
                TaskResult {
                    subtask_id: subtask_id.clone(),
                    worker_id,
                    success: false,
                    duration,
                    error: Some(format!(
                        "timed out after {:?}",
                        self.config.task_timeout
                    )),
                    timed_out: true,
                    merge_warning: None,
                }
            }
            ExecOutcome::Cancelled => {
                // The subtask stays InProgress on disk; the next run's load
                // reclassifies it as Interrupted. Its worktree is kept for
                // inspection and replaced on retry.
                hlog_debug!("Subtask {} abandoned by cancellation", subtask_id);
                self.store.save(plan)?;
                return Ok(());
            }
        };

        if let Some(manager) = &self.workspaces {
            if let Err(e) = manager.remove(&workspace) {
                hlog_warn!("Worktree cleanup failed for {}: {}", subtask_id, e);
            }
        }

        self.store.save(plan)?;
        results.push(result.clone());
        self.emit(OrchestratorEvent::SubtaskCompleted { worker_id, result })
            .await;
        Ok(())
    }

    fn finish(
        &mut self,
        plan: &mut TaskPlan,
        started: Instant,
        cancel: &CancellationToken,
        results: Vec<TaskResult>,
    ) -> Result<OrchestratorResult> {
        self.store.save(plan)?;

        let counts = plan.status_counts();
        let success = plan.all_completed();
        let (state, error) = if cancel.is_cancelled() {
            (RunState::Cancelled, Some("run cancelled".to_string()))
        } else if success {
            (RunState::Completed, None)
        } else if counts.failed > 0 || counts.blocked > 0 {
            (
                RunState::Failed,
                Some(format!(
                    "{} failed, {} blocked",
                    counts.failed, counts.blocked
                )),
            )
        } else {
            (
                RunState::Failed,
                Some("no progress possible: retry or reset required".to_string()),
            )
        };
        self.state = state;

        hlog!(
            "Run finished: plan {} state={} ({} completed / {} total)",
            plan.id,
            state,
            counts.completed,
            counts.total()
        );

        Ok(OrchestratorResult {
            success,
            state,
            total_duration: started.elapsed(),
            results,
            error,
            counts,
        })
    }
}
