use std::collections::HashMap;

use super::expander::TraversalState;
use super::{Graph, PaperNode};

pub const NODE_SIZE_MIN: f64 = 4.0;
pub const NODE_SIZE_MAX: f64 = 20.0;
pub const NODE_SIZE_PER_DEGREE: f64 = 2.0;

/// Visual weight for a node touching `degree` links, clamped so isolated
/// nodes stay visible and hubs don't swamp the layout.
pub fn node_size(degree: usize) -> f64 {
    (NODE_SIZE_MIN + NODE_SIZE_PER_DEGREE * degree as f64).clamp(NODE_SIZE_MIN, NODE_SIZE_MAX)
}

/// Turn a finished traversal into the public graph, nodes in discovery order.
pub fn assemble(state: TraversalState) -> Graph {
    let mut degree: HashMap<&str, usize> = HashMap::new();
    for edge in &state.edges {
        *degree.entry(edge.source.as_str()).or_default() += 1;
        *degree.entry(edge.target.as_str()).or_default() += 1;
    }

    let nodes = state.nodes.iter()
        .map(|n| PaperNode {
            id: n.id.clone(),
            label: n.label.clone(),
            size: node_size(degree.get(n.id.as_str()).copied().unwrap_or(0)),
            depth: n.depth,
        })
        .collect();

    Graph { nodes, links: state.edges }
}
