pub mod config;
pub mod error;
pub mod git;
pub mod log;
pub mod orchestration;
pub mod plan;

pub use error::{Error, Result};
pub use orchestration::{
    Orchestrator, OrchestratorConfig, OrchestratorEvent, OrchestratorResult, RunState, TaskResult,
};
pub use plan::{PlanStore, StatusCounts, SubTask, TaskPlan, TaskStatus, WorkerId};
