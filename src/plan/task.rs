//! Subtask data model for task plans.
//!
//! Subtasks are the atomic units of work assigned to agent workers. Each
//! subtask tracks its status, dependencies, assignment, and timing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for an agent worker slot.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Category of work a subtask represents.
///
/// Assigned by the decomposition step; informs agent prompting and
/// human-readable plan rendering but not scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Analysis,
    Planning,
    Implementation,
    Testing,
    Review,
    Documentation,
    Refactoring,
    Configuration,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Analysis => write!(f, "analysis"),
            TaskType::Planning => write!(f, "planning"),
            TaskType::Implementation => write!(f, "implementation"),
            TaskType::Testing => write!(f, "testing"),
            TaskType::Review => write!(f, "review"),
            TaskType::Documentation => write!(f, "documentation"),
            TaskType::Refactoring => write!(f, "refactoring"),
            TaskType::Configuration => write!(f, "configuration"),
        }
    }
}

/// Estimated complexity tier for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Trivial => write!(f, "trivial"),
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
            Complexity::VeryComplex => write!(f, "very_complex"),
        }
    }
}

/// Subtask status in its lifecycle.
///
/// Subtasks progress through these states as they are scheduled, executed,
/// and completed by workers. `Interrupted` is only ever assigned at plan
/// load time, to subtasks a dead run left `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Subtask created but not yet started.
    #[default]
    Pending,
    /// Subtask is currently being executed by a worker.
    InProgress,
    /// Subtask completed successfully.
    Completed,
    /// Subtask failed with an error.
    Failed,
    /// Subtask cannot run because a dependency failed, was blocked,
    /// or was interrupted without retry.
    Blocked,
    /// Subtask was found InProgress at plan load time; its owning run
    /// no longer exists.
    Interrupted,
}

impl TaskStatus {
    /// Check if the status is terminal for a run (Completed, Failed, or Blocked).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }

    /// Check if the status can be returned to Pending via retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Interrupted
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A single subtask in a task plan.
///
/// Subtasks are the atomic units of work assigned to agent workers. They
/// track status, dependencies, worker assignment, and timing. All status
/// transitions go through the validated methods below; the orchestrator is
/// the only caller that mutates a subtask during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Identifier unique within the owning plan, assigned by decomposition.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Detailed description of what the subtask should accomplish.
    pub description: String,
    /// Category of work.
    pub task_type: TaskType,
    /// Estimated complexity tier.
    pub complexity: Complexity,
    /// Estimated effort in minutes.
    pub estimated_minutes: u32,
    /// Ids of subtasks that must complete before this one can start.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Worker currently (or last) assigned to this subtask.
    pub assigned_worker: Option<WorkerId>,
    /// When the subtask last started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the subtask last reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubTask {
    /// Create a new pending subtask.
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            task_type: TaskType::Implementation,
            complexity: Complexity::Moderate,
            estimated_minutes: 30,
            depends_on: BTreeSet::new(),
            status: TaskStatus::Pending,
            assigned_worker: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency on another subtask id (builder-style, for tests
    /// and plan construction).
    pub fn with_dependency(mut self, dep: &str) -> Self {
        self.depends_on.insert(dep.to_string());
        self
    }

    /// Set the task type (builder-style).
    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Set the complexity tier (builder-style).
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    fn invalid_transition(&self, to: TaskStatus) -> Error {
        Error::InvalidTransition {
            task: self.id.clone(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Start the subtask under the given worker.
    ///
    /// Only valid from Pending. Dependency readiness is checked by the
    /// owning plan, which is the only caller.
    pub(crate) fn start(&mut self, worker: WorkerId) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid_transition(TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        self.assigned_worker = Some(worker);
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        Ok(())
    }

    /// Mark the subtask as successfully completed. Only valid from InProgress.
    pub(crate) fn complete(&mut self) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid_transition(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the subtask as failed. Only valid from InProgress.
    pub(crate) fn fail(&mut self) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid_transition(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the subtask as blocked by an unsatisfiable dependency.
    ///
    /// Valid from Pending; idempotent when already Blocked.
    pub(crate) fn block(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Blocked => {
                self.status = TaskStatus::Blocked;
                Ok(())
            }
            _ => Err(self.invalid_transition(TaskStatus::Blocked)),
        }
    }

    /// Reclassify a stale InProgress subtask as Interrupted.
    ///
    /// Applied at plan load time only; the run that owned the subtask can
    /// no longer be assumed alive.
    pub(crate) fn interrupt(&mut self) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid_transition(TaskStatus::Interrupted));
        }
        self.status = TaskStatus::Interrupted;
        Ok(())
    }

    /// Return a Failed/Blocked/Interrupted subtask to Pending.
    ///
    /// Clears the worker assignment. Returns false (without error) when the
    /// subtask is not in a retryable status.
    pub(crate) fn retry(&mut self) -> bool {
        if !self.status.is_retryable() {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.assigned_worker = None;
        true
    }

    /// Return the subtask to Pending regardless of status (full restart).
    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.assigned_worker = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Check if the subtask has reached a terminal status for this run.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed wall time between start and completion, if both are recorded.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
