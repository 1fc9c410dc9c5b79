//! Per-subtask workspace lifecycle.
//!
//! Every dispatched subtask gets its own git worktree and branch so workers
//! never interfere with each other or with the primary working tree.
//! Workspaces are created and removed from the orchestrator's own context,
//! one at a time; workers only ever see the finished `Workspace`.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::git::GitOps;
use crate::hlog_debug;
use crate::orchestration::worker::Workspace;

/// Creates and tears down per-subtask worktrees.
pub struct WorkspaceManager {
    git: GitOps,
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager for the given repository, placing worktrees under
    /// `root`.
    pub fn new(repo_path: &Path, root: &Path) -> Result<Self> {
        Ok(Self {
            git: GitOps::new(repo_path)?,
            root: root.to_path_buf(),
        })
    }

    /// The branch name used for a subtask's workspace.
    pub fn branch_name(plan_id: &str, subtask_id: &str) -> String {
        format!("hive/task/{}-{}", plan_id, subtask_id)
    }

    /// Directory a subtask's worktree lives in.
    pub fn worktree_path(&self, plan_id: &str, subtask_id: &str) -> PathBuf {
        self.root.join(format!("{}-{}", plan_id, subtask_id))
    }

    /// Create a fresh workspace for a subtask.
    ///
    /// Leftovers from a previous (interrupted or retried) run of the same
    /// subtask are torn down first so the worker always starts from the
    /// current HEAD of the primary repository.
    pub fn create(&self, plan_id: &str, subtask_id: &str) -> Result<Workspace> {
        let branch = Self::branch_name(plan_id, subtask_id);
        let path = self.worktree_path(plan_id, subtask_id);
        hlog_debug!(
            "WorkspaceManager::create branch={} path={}",
            branch,
            path.display()
        );

        if path.exists() {
            self.git.remove_worktree(&path)?;
        }
        if self.git.branch_exists(&branch)? {
            self.git.delete_branch(&branch)?;
        }
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }

        self.git.create_worktree(&branch, &path)?;
        Ok(Workspace { path, branch })
    }

    /// Remove a workspace's worktree, keeping its branch.
    ///
    /// The branch carries the worker's commits and stays available for
    /// merging or manual inspection.
    pub fn remove(&self, workspace: &Workspace) -> Result<()> {
        hlog_debug!(
            "WorkspaceManager::remove path={}",
            workspace.path.display()
        );
        self.git.remove_worktree(&workspace.path)
    }

    /// Remove a workspace's worktree and delete its branch.
    pub fn discard(&self, workspace: &Workspace) -> Result<()> {
        self.remove(workspace)?;
        self.git.delete_branch(&workspace.branch)
    }

    /// Access the underlying git operations.
    pub fn git(&self) -> &GitOps {
        &self.git
    }
}
