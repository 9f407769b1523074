use std::collections::{HashMap, HashSet, VecDeque};

use tokio_util::sync::CancellationToken;

use super::{BuildError, CitationEdge, GraphOptions, ProgressObserver};
use crate::apis::{Direction, RelatedWork};
use crate::fetcher::RateLimitedFetcher;

/// A node as recorded during traversal, before size weights are known.
#[derive(Debug, Clone)]
pub struct DiscoveredNode {
    pub id: String,
    pub label: Option<String>,
    pub depth: u32,
}

/// Visited set, FIFO frontier and edge accumulator owned by a single build.
#[derive(Debug, Default)]
pub struct TraversalState {
    pub(crate) nodes: Vec<DiscoveredNode>,
    index: HashMap<String, usize>,
    frontier: VecDeque<usize>,
    pub(crate) edges: Vec<CitationEdge>,
    edge_set: HashSet<CitationEdge>,
    max_nodes: Option<usize>,
}

impl TraversalState {
    pub fn new(max_nodes: Option<usize>) -> Self {
        Self { max_nodes, ..Default::default() }
    }

    pub fn discovered(&self) -> usize {
        self.nodes.len()
    }

    fn at_capacity(&self) -> bool {
        self.max_nodes.is_some_and(|max| self.nodes.len() >= max)
    }

    /// Mark `id` discovered and enqueue it. Returns false if already known or the ceiling is hit.
    fn discover(&mut self, id: &str, label: Option<String>, depth: u32) -> bool {
        if self.at_capacity() {
            return false;
        }
        self.enqueue(id, label, depth)
    }

    /// Seeds are always admitted; the ceiling only bounds what they lead to.
    fn seed(&mut self, id: &str, label: Option<String>) {
        self.enqueue(id, label, 0);
    }

    fn enqueue(&mut self, id: &str, label: Option<String>, depth: u32) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        let pos = self.nodes.len();
        self.nodes.push(DiscoveredNode { id: id.to_string(), label, depth });
        self.index.insert(id.to_string(), pos);
        self.frontier.push_back(pos);
        true
    }

    fn add_edge(&mut self, source: &str, target: &str) -> bool {
        if source == target {
            return false;
        }
        let edge = CitationEdge { source: source.to_string(), target: target.to_string() };
        if self.edge_set.insert(edge.clone()) {
            self.edges.push(edge);
            true
        } else {
            false
        }
    }

    /// Record the relation between an expanded node and one related work.
    ///
    /// Links always run citer → cited. A work that cannot be admitted (node
    /// ceiling) produces no link, so every link endpoint stays in the node set.
    fn link(
        &mut self,
        node: &str,
        work: RelatedWork,
        direction: Direction,
        depth: u32,
        titles: &HashMap<String, String>,
    ) {
        if work.id == node {
            return;
        }
        if !self.index.contains_key(&work.id) {
            let label = titles.get(&work.id).cloned().or(work.title);
            if !self.discover(&work.id, label, depth) {
                return;
            }
        }
        match direction {
            Direction::References => self.add_edge(node, &work.id),
            Direction::Citations => self.add_edge(&work.id, node),
        };
    }
}

/// Breadth-first expansion from `seeds` through the fetcher.
///
/// Seeds must already be normalized. Each node is expanded at most once, at
/// the depth it was first discovered; nodes at `max_depth` are kept but not
/// expanded.
pub async fn expand(
    fetcher: &RateLimitedFetcher,
    seeds: &[String],
    titles: &HashMap<String, String>,
    options: &GraphOptions,
    observer: Option<&dyn ProgressObserver>,
    cancel: &CancellationToken,
) -> Result<TraversalState, BuildError> {
    let mut state = TraversalState::new(options.max_total_nodes);
    for seed in seeds {
        state.seed(seed, titles.get(seed).cloned());
    }
    if let Some(max) = options.max_total_nodes.filter(|max| state.discovered() > *max) {
        tracing::warn!(
            "{} seeds exceed max_total_nodes={}; no further nodes will be added",
            state.discovered(), max
        );
    }

    let cap = options.max_refs_per_node;
    let delay = options.delay();
    let mut processed = 0usize;

    while let Some(pos) = state.frontier.pop_front() {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let DiscoveredNode { id, depth, .. } = state.nodes[pos].clone();
        if let Some(obs) = observer {
            obs.on_progress(processed, state.discovered(), &id);
        }
        processed += 1;

        if depth >= options.max_depth {
            continue;
        }

        let mut directions = vec![Direction::References];
        if options.include_incoming {
            directions.push(Direction::Citations);
        }
        for direction in directions {
            let related = fetcher.fetch(&id, direction, cap, delay, cancel).await?;
            for work in related.into_iter().take(cap) {
                state.link(&id, work, direction, depth + 1, titles);
            }
        }
    }

    tracing::debug!(
        "Traversal finished: {} nodes, {} links, {} expanded",
        state.nodes.len(), state.edges.len(), processed
    );
    Ok(state)
}
