//! Task decomposition: natural language -> TaskPlan.
//!
//! Decomposition is a single opaque request/response against the agent CLI:
//! the task description (plus optional codebase context) goes in, a fully
//! formed plan with dependency ids comes out. The response JSON is parsed
//! and structurally validated before anything else touches it.

use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hlog_debug;
use crate::orchestration::claude::ClaudeHeadless;
use crate::plan::plan::TaskPlan;
use crate::plan::task::{Complexity, SubTask, TaskType};

/// JSON shape the decomposition prompt asks the model to produce.
#[derive(Debug, Deserialize)]
struct RawPlan {
    summary: String,
    #[serde(default)]
    recommended_agents: usize,
    #[serde(default)]
    estimated_total_minutes: Option<u32>,
    #[serde(default)]
    risk_assessment: String,
    #[serde(default)]
    parallelization_strategy: String,
    subtasks: Vec<RawSubTask>,
}

#[derive(Debug, Deserialize)]
struct RawSubTask {
    id: String,
    title: String,
    description: String,
    task_type: TaskType,
    complexity: Complexity,
    estimated_minutes: u32,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Turns a task description into a validated `TaskPlan`.
pub struct Decomposer {
    executor: ClaudeHeadless,
}

impl Decomposer {
    pub fn new(executor: ClaudeHeadless) -> Self {
        Self { executor }
    }

    fn build_prompt(description: &str, context: Option<&str>) -> String {
        let mut prompt = format!(
            "Decompose the following task into subtasks for parallel execution \
             by autonomous coding agents.\n\nTask: {}\n",
            description
        );
        if let Some(context) = context {
            prompt.push_str(&format!("\nCodebase context:\n{}\n", context));
        }
        prompt.push_str(
            "\nRespond with a single JSON object and nothing else:\n\
             {\n\
             \x20 \"summary\": \"...\",\n\
             \x20 \"recommended_agents\": 2,\n\
             \x20 \"estimated_total_minutes\": 90,\n\
             \x20 \"risk_assessment\": \"...\",\n\
             \x20 \"parallelization_strategy\": \"...\",\n\
             \x20 \"subtasks\": [\n\
             \x20   {\n\
             \x20     \"id\": \"t1\",\n\
             \x20     \"title\": \"...\",\n\
             \x20     \"description\": \"...\",\n\
             \x20     \"task_type\": \"analysis|planning|implementation|testing|review|documentation|refactoring|configuration\",\n\
             \x20     \"complexity\": \"trivial|simple|moderate|complex|very_complex\",\n\
             \x20     \"estimated_minutes\": 30,\n\
             \x20     \"depends_on\": []\n\
             \x20   }\n\
             \x20 ]\n\
             }\n\
             Subtask ids must be unique; depends_on entries must reference \
             other subtask ids; the dependency graph must be acyclic.",
        );
        prompt
    }

    /// Run decomposition against the repository at `cwd`.
    pub async fn decompose(
        &self,
        description: &str,
        context: Option<&str>,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<TaskPlan> {
        hlog_debug!("Decomposer::decompose description={:.60}", description);
        let prompt = Self::build_prompt(description, context);
        let response = self.executor.execute(&prompt, cwd, cancel).await?;

        let output = match response.output() {
            Some(output) => output,
            None => {
                return Err(Error::AgentOutputMalformed(
                    response
                        .error_message()
                        .unwrap_or("decomposition returned no output")
                        .to_string(),
                ))
            }
        };

        Self::parse_plan(description, output)
    }

    /// Parse a model response into a validated plan.
    ///
    /// Tolerates prose or markdown fences around the JSON object. The plan
    /// id is minted here; the model only names subtasks.
    pub fn parse_plan(description: &str, output: &str) -> Result<TaskPlan> {
        let json = extract_json(output)
            .ok_or_else(|| Error::AgentOutputMalformed("no JSON object in output".to_string()))?;
        let raw: RawPlan = serde_json::from_str(json)
            .map_err(|e| Error::AgentOutputMalformed(format!("plan JSON: {}", e)))?;

        let mut plan = TaskPlan::new(&format!("plan-{}", Uuid::new_v4()), description);
        plan.summary = raw.summary;
        plan.recommended_agents = raw.recommended_agents.max(1);
        plan.risk_assessment = raw.risk_assessment;
        plan.parallelization_strategy = raw.parallelization_strategy;

        let mut total = 0u32;
        for raw_task in raw.subtasks {
            total = total.saturating_add(raw_task.estimated_minutes);
            let mut task = SubTask::new(&raw_task.id, &raw_task.title, &raw_task.description)
                .with_type(raw_task.task_type)
                .with_complexity(raw_task.complexity);
            task.estimated_minutes = raw_task.estimated_minutes;
            for dep in raw_task.depends_on {
                task.depends_on.insert(dep);
            }
            plan.subtasks.push(task);
        }
        plan.estimated_total_minutes = raw.estimated_total_minutes.unwrap_or(total);

        plan.validate()?;
        hlog_debug!(
            "Decomposed into {} subtasks (plan {})",
            plan.subtasks.len(),
            plan.id
        );
        Ok(plan)
    }
}

/// Extract the outermost JSON object from model output.
fn extract_json(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&output[start..=end])
}
