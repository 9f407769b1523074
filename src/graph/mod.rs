pub mod assembler;
pub mod cache;
pub mod expander;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// A paper in the citation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperNode {
    /// DOI, or a synthetic `openalex:W…` id.
    pub id: String,
    /// Title when known; renderers fall back to `id`.
    pub label: Option<String>,
    /// Visual weight derived from the node's degree.
    pub size: f64,
    /// Depth at which the node was first discovered (seeds are 0).
    pub depth: u32,
}

/// `source` cites `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<PaperNode>,
    pub links: Vec<CitationEdge>,
}

impl Graph {
    /// `{nodes, links}` document handed to renderers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Traversal bounds and pacing for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphOptions {
    pub max_depth: u32,
    pub max_refs_per_node: usize,
    /// Stop enqueueing new nodes once this many are discovered.
    pub max_total_nodes: Option<usize>,
    /// Also ask "who cites this node" for each expanded node.
    pub include_incoming: bool,
    /// Minimum gap between outbound provider calls.
    pub delay_ms: u64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_refs_per_node: 10,
            max_total_nodes: None,
            include_incoming: false,
            delay_ms: 250,
        }
    }
}

impl GraphOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth > 0 && self.max_refs_per_node == 0 {
            return Err(ConfigError::InvalidOption(
                "max_refs_per_node must be at least 1 when max_depth > 0".into(),
            ));
        }
        if self.max_total_nodes == Some(0) {
            return Err(ConfigError::InvalidOption("max_total_nodes must be at least 1".into()));
        }
        Ok(())
    }

    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build cancelled")]
    Cancelled,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Notified synchronously before each frontier node is expanded.
pub trait ProgressObserver: Send + Sync {
    /// `index` is zero-based; `total` is the number of nodes discovered so far.
    fn on_progress(&self, index: usize, total: usize, id: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn on_progress(&self, index: usize, total: usize, id: &str) {
        self(index, total, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_json_shape() {
        let graph = Graph {
            nodes: vec![PaperNode { id: "10.1/a".into(), label: Some("A".into()), size: 6.0, depth: 0 }],
            links: vec![],
        };
        let json: serde_json::Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();
        assert_eq!(json["nodes"][0]["id"], "10.1/a");
        assert_eq!(json["nodes"][0]["label"], "A");
        assert!(json["links"].as_array().unwrap().is_empty());
        let back: Graph = serde_json::from_str(&graph.to_json().unwrap()).unwrap();
        assert_eq!(back, graph);
    }

    #[test]
    fn test_options_validation() {
        assert!(GraphOptions::default().validate().is_ok());
        let zero_cap = GraphOptions { max_refs_per_node: 0, ..Default::default() };
        assert!(zero_cap.validate().is_err());
        let seeds_only = GraphOptions { max_depth: 0, max_refs_per_node: 0, ..Default::default() };
        assert!(seeds_only.validate().is_ok());
        let no_nodes = GraphOptions { max_total_nodes: Some(0), ..Default::default() };
        assert!(no_nodes.validate().is_err());
    }
}
