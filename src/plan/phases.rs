//! Dependency grader: topological phase assignment for subtasks.
//!
//! Each subtask is assigned a 0-based phase number: phase 0 for subtasks
//! with no dependencies, otherwise one more than the deepest dependency.
//! Execution proceeds phase by phase, so subtasks in the same phase never
//! depend on each other and may run fully in parallel.
//!
//! Phases are recomputed from the current subtask list on every
//! orchestration invocation; topology is always derived, never stored.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::plan::task::SubTask;

/// Compute the phase number for every subtask.
///
/// Returns a map from subtask id to phase. Detects dependency cycles and
/// dangling dependency ids, reporting a structural error rather than
/// looping forever; this runs before any execution begins.
pub fn compute_phases(subtasks: &[SubTask]) -> Result<HashMap<String, usize>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for task in subtasks {
        let node = graph.add_node(task.id.as_str());
        index.insert(task.id.as_str(), node);
    }

    // Edge direction: dependency -> dependent
    for task in subtasks {
        for dep in &task.depends_on {
            let from = index
                .get(dep.as_str())
                .ok_or_else(|| Error::DanglingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
            let to = index[task.id.as_str()];
            graph.add_edge(*from, to, ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let id = graph
            .node_weight(cycle.node_id())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Error::DependencyCycle(id)
    })?;

    let mut phases: HashMap<String, usize> = HashMap::with_capacity(subtasks.len());
    for node in sorted {
        let id = graph[node];
        let phase = graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .map(|dep| phases[graph[dep]] + 1)
            .max()
            .unwrap_or(0);
        phases.insert(id.to_string(), phase);
    }

    Ok(phases)
}

/// Group subtask ids by phase, in ascending phase order.
///
/// Ids within a phase keep the plan's subtask ordering.
pub fn phase_groups(subtasks: &[SubTask]) -> Result<Vec<Vec<String>>> {
    let phases = compute_phases(subtasks)?;
    let phase_count = phases.values().max().map(|p| p + 1).unwrap_or(0);

    let mut groups: Vec<Vec<String>> = vec![Vec::new(); phase_count];
    for task in subtasks {
        groups[phases[&task.id]].push(task.id.clone());
    }
    Ok(groups)
}
