//! Task plan aggregate and status machine.
//!
//! A `TaskPlan` owns the full list of subtasks for one orchestration run.
//! All status transitions go through the validated methods here, so no
//! caller can corrupt plan state: the orchestrator drives execution
//! transitions, and the retry/reset operations are the only way back out of
//! the Failed/Blocked/Interrupted statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::hlog_debug;
use crate::plan::phases::compute_phases;
use crate::plan::task::{SubTask, TaskStatus, WorkerId};

/// Counts of subtasks per status, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub interrupted: usize,
}

impl StatusCounts {
    /// Total number of subtasks counted.
    pub fn total(&self) -> usize {
        self.pending
            + self.in_progress
            + self.completed
            + self.failed
            + self.blocked
            + self.interrupted
    }
}

/// A task plan: the root aggregate for one orchestration run.
///
/// Produced once by the decomposition step, then mutated in place by the
/// orchestrator (subtask status and worker assignment) and persisted after
/// every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    /// Opaque plan identifier.
    pub id: String,
    /// The original natural-language task description.
    pub description: String,
    /// Human-readable summary produced by decomposition.
    pub summary: String,
    /// Recommended number of concurrent workers.
    pub recommended_agents: usize,
    /// Total estimated effort in minutes.
    pub estimated_total_minutes: u32,
    /// Risk assessment text from decomposition.
    pub risk_assessment: String,
    /// Parallelization strategy text from decomposition.
    pub parallelization_strategy: String,
    /// Ordered list of subtasks.
    pub subtasks: Vec<SubTask>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// When the plan was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl TaskPlan {
    /// Create a new empty plan.
    pub fn new(id: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            description: description.to_string(),
            summary: String::new(),
            recommended_agents: 1,
            estimated_total_minutes: 0,
            risk_assessment: String::new(),
            parallelization_strategy: String::new(),
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a subtask (builder-style, for tests and plan construction).
    pub fn with_subtask(mut self, subtask: SubTask) -> Self {
        self.subtasks.push(subtask);
        self
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validate the structural invariants of the plan.
    ///
    /// Checks that subtask ids are unique, every dependency references
    /// another subtask in this plan (no dangling or self references), and
    /// the dependency graph is acyclic. Called on load and before any
    /// execution begins; a violation is fatal.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.subtasks {
            if !seen.insert(task.id.as_str()) {
                return Err(Error::DuplicateSubtask(task.id.clone()));
            }
        }

        for task in &self.subtasks {
            for dep in &task.depends_on {
                if dep == &task.id || !seen.contains(dep.as_str()) {
                    return Err(Error::DanglingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Cycle detection is part of phase computation.
        compute_phases(&self.subtasks)?;
        Ok(())
    }

    /// Get a reference to a subtask by id.
    pub fn get(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut SubTask> {
        self.subtasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::SubtaskNotFound(id.to_string()))
    }

    /// Check if every dependency of the given subtask is Completed.
    pub fn dependencies_completed(&self, task: &SubTask) -> bool {
        task.depends_on.iter().all(|dep| {
            self.get(dep)
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Subtasks eligible to start: Pending with all dependencies Completed.
    pub fn ready_subtasks(&self) -> Vec<&SubTask> {
        self.subtasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_completed(t))
            .collect()
    }

    /// Start a subtask under the given worker.
    ///
    /// Valid only when the subtask is Pending and every dependency is
    /// Completed.
    pub fn start_subtask(&mut self, id: &str, worker: WorkerId) -> Result<()> {
        let ready = {
            let task = self
                .get(id)
                .ok_or_else(|| Error::SubtaskNotFound(id.to_string()))?;
            self.dependencies_completed(task)
        };
        if !ready {
            return Err(Error::Validation(format!(
                "Subtask '{}' has incomplete dependencies",
                id
            )));
        }
        self.get_mut(id)?.start(worker)?;
        self.touch();
        hlog_debug!("Subtask {} started (worker {})", id, worker.short());
        Ok(())
    }

    /// Mark a subtask Completed. Only valid from InProgress.
    pub fn complete_subtask(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.complete()?;
        self.touch();
        hlog_debug!("Subtask {} completed", id);
        Ok(())
    }

    /// Mark a subtask Failed. Only valid from InProgress.
    pub fn fail_subtask(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.fail()?;
        self.touch();
        hlog_debug!("Subtask {} failed", id);
        Ok(())
    }

    /// Block every Pending subtask with an unsatisfiable dependency.
    ///
    /// A dependency is unsatisfiable when it is Failed, Blocked, or
    /// Interrupted. Runs to a fixpoint so blocks cascade through chains of
    /// dependents. Returns the ids of newly blocked subtasks.
    pub fn block_unsatisfiable(&mut self) -> Vec<String> {
        let mut blocked = Vec::new();
        loop {
            let next: Vec<String> = self
                .subtasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| {
                    t.depends_on.iter().any(|dep| {
                        self.get(dep)
                            .map(|d| {
                                matches!(
                                    d.status,
                                    TaskStatus::Failed
                                        | TaskStatus::Blocked
                                        | TaskStatus::Interrupted
                                )
                            })
                            .unwrap_or(false)
                    })
                })
                .map(|t| t.id.clone())
                .collect();

            if next.is_empty() {
                break;
            }
            for id in &next {
                // Pending -> Blocked is always valid; unwrap is safe here
                // but keep error propagation out of the fixpoint loop.
                if let Ok(task) = self.get_mut(id) {
                    let _ = task.block();
                }
                hlog_debug!("Subtask {} blocked by failed dependency", id);
            }
            blocked.extend(next);
        }
        if !blocked.is_empty() {
            self.touch();
        }
        blocked
    }

    /// Reclassify every InProgress subtask as Interrupted.
    ///
    /// Applied exactly once, at plan load time: a subtask still InProgress
    /// on disk belongs to a run that no longer exists. Returns the ids of
    /// reclassified subtasks.
    pub fn reclassify_interrupted(&mut self) -> Vec<String> {
        let mut interrupted = Vec::new();
        for task in &mut self.subtasks {
            if task.status == TaskStatus::InProgress {
                let _ = task.interrupt();
                interrupted.push(task.id.clone());
            }
        }
        if !interrupted.is_empty() {
            self.touch();
            hlog_debug!("Reclassified {} subtasks as interrupted", interrupted.len());
        }
        interrupted
    }

    /// Return every Failed, Blocked, or Interrupted subtask to Pending.
    ///
    /// Completed subtasks are untouched. Returns the number of subtasks
    /// reset.
    pub fn retry(&mut self) -> usize {
        let mut count = 0;
        for task in &mut self.subtasks {
            if task.retry() {
                count += 1;
            }
        }
        if count > 0 {
            self.touch();
            hlog_debug!("Retry reset {} subtasks to pending", count);
        }
        count
    }

    /// Return every subtask to Pending regardless of status (full restart).
    pub fn reset(&mut self) {
        for task in &mut self.subtasks {
            task.reset();
        }
        self.touch();
        hlog_debug!("Plan {} reset", self.id);
    }

    /// Check whether the plan can still make progress.
    ///
    /// True iff at least one Pending subtask has all dependencies Completed,
    /// or at least one subtask is InProgress. False means all remaining work
    /// is Failed/Blocked/Interrupted and the caller must retry or reset.
    pub fn can_make_progress(&self) -> bool {
        self.subtasks
            .iter()
            .any(|t| t.status == TaskStatus::InProgress)
            || !self.ready_subtasks().is_empty()
    }

    /// Check if every subtask is Completed.
    pub fn all_completed(&self) -> bool {
        self.subtasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
    }

    /// Count subtasks per status.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.subtasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Blocked => counts.blocked += 1,
                TaskStatus::Interrupted => counts.interrupted += 1,
            }
        }
        counts
    }
}
