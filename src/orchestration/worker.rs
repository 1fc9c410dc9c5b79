//! Agent worker interface.
//!
//! A worker executes exactly one subtask inside an isolated workspace and
//! reports the outcome through its return value; it never mutates plan
//! state itself. The orchestrator bounds every invocation with a
//! per-subtask timeout and the run's cancellation token.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::git::GitOps;
use crate::hlog_debug;
use crate::orchestration::claude::ClaudeHeadless;
use crate::plan::task::SubTask;

/// Marker the agent is instructed to emit when the test suite passed.
pub const TESTS_PASSED_MARKER: &str = "HIVE_TESTS_PASSED";

/// An isolated workspace handed to a worker.
///
/// The orchestrator never runs two workers against the same workspace
/// concurrently.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Working directory (a dedicated git worktree).
    pub path: PathBuf,
    /// The branch checked out in this workspace.
    pub branch: String,
}

/// Outcome of one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// Whether the subtask was accomplished.
    pub success: bool,
    /// Human-readable summary of what the worker did.
    pub summary: String,
    /// Error description when `success` is false.
    pub error: Option<String>,
    /// Whether the worker reported a passing test run.
    pub tests_passed: bool,
}

impl WorkerOutput {
    /// A successful outcome with the given summary.
    pub fn success(summary: &str, tests_passed: bool) -> Self {
        Self {
            success: true,
            summary: summary.to_string(),
            error: None,
            tests_passed,
        }
    }

    /// A failed outcome with the given error message.
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            summary: String::new(),
            error: Some(error.to_string()),
            tests_passed: false,
        }
    }
}

/// Executes a single subtask in an isolated workspace.
///
/// Implementations must be safely cancellable mid-execution and must not
/// touch any shared orchestrator state; only the returned `WorkerOutput`
/// is consumed.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    async fn execute(
        &self,
        subtask: &SubTask,
        workspace: &Workspace,
        cancel: CancellationToken,
    ) -> Result<WorkerOutput>;
}

/// The real agent worker: drives Claude Code headless in the workspace.
///
/// Runs the agent CLI as a separate OS process inside the subtask's
/// worktree, then commits whatever the agent left in the tree to the
/// workspace branch.
pub struct ClaudeWorker {
    executor: ClaudeHeadless,
    git: GitOps,
}

impl ClaudeWorker {
    pub fn new(executor: ClaudeHeadless, git: GitOps) -> Self {
        Self { executor, git }
    }

    fn build_prompt(subtask: &SubTask) -> String {
        format!(
            "You are implementing one subtask of a larger plan.\n\
             \n\
             Subtask: {}\n\
             Type: {}\n\
             \n\
             {}\n\
             \n\
             Work only inside the current directory. Run the project's \
             test suite when you are done; if every test passes, print the \
             line {} as the last line of your summary.",
            subtask.title, subtask.task_type, subtask.description, TESTS_PASSED_MARKER
        )
    }
}

#[async_trait]
impl AgentWorker for ClaudeWorker {
    async fn execute(
        &self,
        subtask: &SubTask,
        workspace: &Workspace,
        cancel: CancellationToken,
    ) -> Result<WorkerOutput> {
        hlog_debug!(
            "ClaudeWorker executing {} in {}",
            subtask.id,
            workspace.path.display()
        );
        let prompt = Self::build_prompt(subtask);
        let response = self
            .executor
            .execute(&prompt, &workspace.path, &cancel)
            .await?;

        if !response.is_success() {
            return Ok(WorkerOutput::failure(
                response.error_message().unwrap_or("agent reported failure"),
            ));
        }

        let summary = response.output().unwrap_or_default().to_string();
        let tests_passed = summary.contains(TESTS_PASSED_MARKER);

        // Commit whatever the agent produced to the workspace branch.
        if self.git.is_dirty(&workspace.path)? {
            self.git
                .commit_all(&workspace.path, &format!("{}: {}", subtask.id, subtask.title))?;
        }

        Ok(WorkerOutput::success(&summary, tests_passed))
    }
}
