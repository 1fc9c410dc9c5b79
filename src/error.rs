use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency cycle detected at subtask '{0}'")]
    DependencyCycle(String),

    #[error("Subtask '{task}' depends on unknown subtask '{dependency}'")]
    DanglingDependency { task: String, dependency: String },

    #[error("Duplicate subtask id '{0}' in plan")]
    DuplicateSubtask(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Subtask not found: {0}")]
    SubtaskNotFound(String),

    #[error("Invalid status transition for subtask '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Agent binary not found: {0}")]
    AgentBinaryNotFound(String),

    #[error("Agent returned malformed output: {0}")]
    AgentOutputMalformed(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Merge conflict merging '{branch}' into '{target}'")]
    MergeConflict { branch: String, target: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
