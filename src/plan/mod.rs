//! Task plan domain model and persistence.
//!
//! This module contains the plan aggregate, its subtasks and status
//! machine, the dependency grader that assigns execution phases, and the
//! file-backed plan store.

pub mod phases;
#[allow(clippy::module_inception)]
pub mod plan;
pub mod store;
pub mod task;

pub use phases::{compute_phases, phase_groups};
pub use plan::{StatusCounts, TaskPlan};
pub use store::{render_markdown, PlanStore};
pub use task::{Complexity, SubTask, TaskStatus, TaskType, WorkerId};
