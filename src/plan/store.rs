//! Durable plan persistence.
//!
//! Plans are stored as one JSON file per plan id. Every save is atomic:
//! the new contents are written to a temp file and renamed into place, so
//! an external reader (or a crashed run) always observes a complete plan
//! file, never a torn write. A companion Markdown rendering is regenerated
//! on every save for human inspection; it is never read back.
//!
//! Loading applies the crash-detection rule: any subtask still marked
//! InProgress on disk belonged to a run that no longer exists and is
//! reclassified as Interrupted before the plan is returned.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hlog_debug;
use crate::plan::phases::phase_groups;
use crate::plan::plan::TaskPlan;
use crate::plan::task::TaskStatus;

/// File-backed store for task plans.
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    /// Create a store rooted at the given directory.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Create a store rooted at the default plans directory (`~/.hive/plans`).
    pub fn default_dir() -> Result<Self> {
        Ok(Self::new(&crate::config::Config::plans_dir()?))
    }

    /// The directory this store persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the JSON file for a plan id.
    pub fn plan_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Path of the Markdown rendering for a plan id.
    pub fn markdown_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    /// Persist a plan.
    ///
    /// Writes the JSON to a temp file and renames it into place; keeps a
    /// `.bak` copy of the previous version. The Markdown rendering is
    /// regenerated alongside.
    pub fn save(&self, plan: &TaskPlan) -> Result<()> {
        hlog_debug!("PlanStore::save id={} dir={}", plan.id, self.dir.display());
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }

        let path = self.plan_path(&plan.id);
        if path.exists() {
            let backup_path = path.with_extension("json.bak");
            fs::copy(&path, &backup_path)?;
        }

        let contents = serde_json::to_string_pretty(plan)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, &path)?;

        fs::write(self.markdown_path(&plan.id), render_markdown(plan))?;
        hlog_debug!("Plan saved: {}", path.display());
        Ok(())
    }

    /// Load a plan by id.
    ///
    /// Validates the structural invariants (fatal on cycle, dangling or
    /// duplicate ids) and applies the InProgress -> Interrupted
    /// reclassification exactly once, here. Callers that intend to resume
    /// should save the plan back after loading so the reclassification is
    /// durable.
    pub fn load(&self, id: &str) -> Result<TaskPlan> {
        let path = self.plan_path(id);
        hlog_debug!("PlanStore::load path={}", path.display());
        if !path.exists() {
            return Err(Error::PlanNotFound(id.to_string()));
        }

        let contents = fs::read_to_string(&path)?;
        let mut plan: TaskPlan = serde_json::from_str(&contents)?;
        plan.validate()?;

        let interrupted = plan.reclassify_interrupted();
        if !interrupted.is_empty() {
            hlog_debug!(
                "Plan {} loaded with {} interrupted subtasks",
                id,
                interrupted.len()
            );
        }
        Ok(plan)
    }

    /// List the ids of all plans in the store.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn status_glyph(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => " ",
        TaskStatus::InProgress => ">",
        TaskStatus::Completed => "x",
        TaskStatus::Failed => "!",
        TaskStatus::Blocked => "-",
        TaskStatus::Interrupted => "~",
    }
}

/// Render a plan as human-readable Markdown.
///
/// The rendering is regenerated on every save and never read back; its
/// format carries no compatibility obligations.
pub fn render_markdown(plan: &TaskPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Plan {}\n\n", plan.id));
    out.push_str(&format!("**Task:** {}\n\n", plan.description));
    if !plan.summary.is_empty() {
        out.push_str(&format!("{}\n\n", plan.summary));
    }
    out.push_str(&format!(
        "- Recommended agents: {}\n- Estimated total: {} min\n",
        plan.recommended_agents, plan.estimated_total_minutes
    ));
    if !plan.risk_assessment.is_empty() {
        out.push_str(&format!("- Risk: {}\n", plan.risk_assessment));
    }
    if !plan.parallelization_strategy.is_empty() {
        out.push_str(&format!("- Strategy: {}\n", plan.parallelization_strategy));
    }

    let counts = plan.status_counts();
    out.push_str(&format!(
        "- Progress: {} completed / {} total\n\n",
        counts.completed,
        counts.total()
    ));

    // Group subtasks by execution phase; fall back to a flat listing when
    // the plan is structurally broken (the JSON is still authoritative).
    match phase_groups(&plan.subtasks) {
        Ok(groups) => {
            for (phase, ids) in groups.iter().enumerate() {
                out.push_str(&format!("## Phase {}\n\n", phase));
                for id in ids {
                    if let Some(task) = plan.get(id) {
                        render_task_line(&mut out, task);
                    }
                }
                out.push('\n');
            }
        }
        Err(_) => {
            out.push_str("## Subtasks\n\n");
            for task in &plan.subtasks {
                render_task_line(&mut out, task);
            }
            out.push('\n');
        }
    }

    out
}

fn render_task_line(out: &mut String, task: &crate::plan::task::SubTask) {
    out.push_str(&format!(
        "- [{}] `{}` {} ({}, {}, ~{} min)",
        status_glyph(task.status),
        task.id,
        task.title,
        task.task_type,
        task.complexity,
        task.estimated_minutes
    ));
    if !task.depends_on.is_empty() {
        let deps: Vec<&str> = task.depends_on.iter().map(|s| s.as_str()).collect();
        out.push_str(&format!(" <- {}", deps.join(", ")));
    }
    out.push('\n');
}
