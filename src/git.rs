use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, IndexAddOption, Repository, Signature};

use crate::{hlog_debug, hlog_warn, Error, Result};

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        hlog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn create_worktree(&self, branch: &str, worktree_path: &Path) -> Result<()> {
        hlog_debug!(
            "GitOps::create_worktree branch={} path={}",
            branch,
            worktree_path.display()
        );
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        hlog_debug!("Creating branch {} from commit {}", branch, commit.id());
        let branch_obj = repo.branch(branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Use worktree path's folder name as worktree name (branch may contain slashes)
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        hlog_debug!("Creating worktree with name: {}", worktree_name);
        repo.worktree(worktree_name, worktree_path, Some(&opts))?;
        hlog_debug!("Worktree created successfully");
        Ok(())
    }

    /// Remove a worktree and clean up all associated resources.
    /// This function attempts cleanup even if some operations fail.
    /// It's critical that we fully disassociate the branch from the worktree,
    /// otherwise deleting the branch fails with "branch is already checked out".
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        hlog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        // Try to find the worktree by path (may fail due to path canonicalization)
        let worktree_name: Option<String> = worktrees
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == worktree_path)
                    .unwrap_or(false)
            })
            .map(|s| s.to_string());

        // Also try to find by folder name as fallback
        let folder_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name = worktree_name.or_else(|| {
            folder_name.as_ref().and_then(|fname| {
                worktrees
                    .iter()
                    .flatten()
                    .find(|name| *name == fname.as_str())
                    .map(|s| s.to_string())
            })
        });

        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                hlog_debug!("Unlocking and pruning worktree: {}", name);
                let _ = worktree.unlock();
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    hlog_warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        // Always try to remove the worktree directory if it exists
        if worktree_path.exists() {
            hlog_debug!("Removing worktree directory: {}", worktree_path.display());
            std::fs::remove_dir_all(worktree_path)?;
        }

        // Clean up the git worktree admin directory (e.g., .git/worktrees/<name>)
        // so git does not keep thinking the branch is checked out.
        if let Some(ref name) = worktree_name {
            self.cleanup_worktree_admin_dir(name);
        }
        if let Some(ref fname) = folder_name {
            self.cleanup_worktree_admin_dir(fname);
        }

        hlog_debug!("Worktree removed successfully");
        Ok(())
    }

    /// Clean up the git worktree admin directory (.git/worktrees/<name>)
    fn cleanup_worktree_admin_dir(&self, worktree_name: &str) {
        if let Ok(repo) = self.repo() {
            let git_dir = repo.path(); // This is the .git directory
            let admin_dir = git_dir.join("worktrees").join(worktree_name);
            if admin_dir.exists() {
                hlog_debug!("Cleaning up worktree admin dir: {}", admin_dir.display());
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }
    }

    pub fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<()> {
        hlog_debug!(
            "GitOps::commit_all path={} message={}",
            worktree_path.display(),
            message
        );
        let repo = Repository::open(worktree_path)?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Hive", "hive@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        hlog_debug!("Commit created: {}", commit_id);
        Ok(())
    }

    pub fn current_head(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(name.to_string());
            }
        }
        let commit = head.peel_to_commit()?;
        Ok(format!("{:.7}", commit.id()))
    }

    pub fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    pub fn list_worktrees(&self) -> Result<Vec<String>> {
        let repo = self.repo()?;
        Ok(repo
            .worktrees()?
            .iter()
            .flatten()
            .map(String::from)
            .collect())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let result = repo.find_branch(branch, BranchType::Local);
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a worktree has uncommitted changes (staged or unstaged).
    pub fn is_dirty(&self, worktree_path: &Path) -> Result<bool> {
        let repo = Repository::open(worktree_path)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// Delete a local branch. Returns Ok even if branch doesn't exist.
    /// Logs a warning if deletion fails for other reasons but doesn't error.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        hlog_debug!("GitOps::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, BranchType::Local) {
            Ok(mut branch_ref) => {
                if let Err(e) = branch_ref.delete() {
                    // The branch might still be checked out in a stale
                    // worktree; the worktree removal is what matters.
                    hlog_warn!("Failed to delete branch '{}': {}", branch, e);
                } else {
                    hlog_debug!("Branch deleted: {}", branch);
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                hlog_debug!("Branch '{}' not found (already deleted?)", branch);
            }
            Err(e) => {
                hlog_warn!("Error looking up branch '{}': {}", branch, e);
            }
        }
        Ok(())
    }

    fn branch_commit<'a>(&self, repo: &'a Repository, branch: &str) -> Result<git2::Commit<'a>> {
        let branch_ref = repo.find_branch(branch, BranchType::Local)?;
        Ok(branch_ref.get().peel_to_commit()?)
    }

    /// Merge `source` into `target` without touching any working tree.
    ///
    /// Fast-forwards the target ref when possible, otherwise performs an
    /// in-memory merge and writes a merge commit with both parents. Returns
    /// the resulting target commit id. A content conflict aborts with
    /// `Error::MergeConflict` and leaves both branches untouched.
    pub fn merge_branch(&self, source: &str, target: &str) -> Result<String> {
        hlog_debug!("GitOps::merge_branch source={} target={}", source, target);
        let repo = self.repo()?;
        let source_commit = self.branch_commit(&repo, source)?;
        let target_commit = self.branch_commit(&repo, target)?;

        let base = repo.merge_base(target_commit.id(), source_commit.id())?;

        if base == source_commit.id() {
            // Source is already contained in target
            hlog_debug!("Merge is a no-op: {} already in {}", source, target);
            return Ok(target_commit.id().to_string());
        }

        let target_refname = format!("refs/heads/{}", target);
        if base == target_commit.id() {
            // Fast-forward
            let mut reference = repo.find_reference(&target_refname)?;
            reference.set_target(
                source_commit.id(),
                &format!("hive: fast-forward {} to {}", target, source),
            )?;
            hlog_debug!("Fast-forwarded {} to {}", target, source_commit.id());
            return Ok(source_commit.id().to_string());
        }

        let mut index = repo.merge_commits(&target_commit, &source_commit, None)?;
        if index.has_conflicts() {
            hlog_warn!("Merge conflict merging {} into {}", source, target);
            return Err(Error::MergeConflict {
                branch: source.to_string(),
                target: target.to_string(),
            });
        }

        let tree_id = index.write_tree_to(&repo)?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Hive", "hive@localhost"))?;
        let commit_id = repo.commit(
            Some(&target_refname),
            &sig,
            &sig,
            &format!("Merge branch '{}' into {}", source, target),
            &tree,
            &[&target_commit, &source_commit],
        )?;
        hlog_debug!("Merge commit created: {}", commit_id);
        Ok(commit_id.to_string())
    }
}
