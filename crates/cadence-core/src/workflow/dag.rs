//! Step graph construction and cycle detection.
//!
//! Uses `petgraph` to model successor edges between steps. Only steps
//! reachable from the entry step take part: a cycle among them would let a
//! run loop forever, so topological sort rejects it at authoring time.

use std::collections::{HashMap, VecDeque};

use cadence_types::workflow::WorkflowDefinition;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::definition::WorkflowError;

/// Successor graph of the steps reachable from the entry step.
struct StepGraph<'a> {
    graph: DiGraph<&'a str, ()>,
}

fn build_reachable_graph(def: &WorkflowDefinition) -> Result<StepGraph<'_>, WorkflowError> {
    let entry = def.entry_step().ok_or_else(|| {
        WorkflowError::UnknownStep(format!("entry step '{}' does not exist", def.entry_step_id))
    })?;

    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::new();

    nodes.insert(entry.id.as_str(), graph.add_node(entry.id.as_str()));
    queue.push_back(entry);

    while let Some(step) = queue.pop_front() {
        let from = nodes[step.id.as_str()];
        for succ_id in step.successors() {
            let succ = def.step(succ_id).ok_or_else(|| {
                WorkflowError::UnknownStep(format!(
                    "step '{}' references unknown step '{}'",
                    step.id, succ_id
                ))
            })?;
            let to = match nodes.get(succ.id.as_str()) {
                Some(idx) => *idx,
                None => {
                    let idx = graph.add_node(succ.id.as_str());
                    nodes.insert(succ.id.as_str(), idx);
                    queue.push_back(succ);
                    idx
                }
            };
            graph.update_edge(from, to, ());
        }
    }

    Ok(StepGraph { graph })
}

/// Verify the reachable step graph is acyclic and every edge resolves.
pub fn validate_step_graph(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    execution_order(def).map(|_| ())
}

/// Reachable step ids in topological order, entry first.
pub fn execution_order(def: &WorkflowDefinition) -> Result<Vec<&str>, WorkflowError> {
    let StepGraph { graph } = build_reachable_graph(def)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        WorkflowError::CycleDetected(format!(
            "cycle detected involving step '{}'",
            graph[cycle.node_id()]
        ))
    })?;
    Ok(sorted.into_iter().map(|idx| graph[idx]).collect())
}

/// Steps that no path from the entry step reaches.
pub fn unreachable_steps(def: &WorkflowDefinition) -> Result<Vec<&str>, WorkflowError> {
    let StepGraph { graph } = build_reachable_graph(def)?;
    let reachable: Vec<&str> = graph.node_weights().copied().collect();
    Ok(def
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| !reachable.contains(id))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
