//! Topology hints used by the scorer for graph-proximity estimation.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Entity adjacency supplied by the embedder.
///
/// The pipeline treats hints as read-only; the embedder may replace the
/// whole structure atomically between ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphHints {
    /// Entity key to neighbour entity keys. Edges are treated as
    /// undirected regardless of which side declares them.
    #[serde(default)]
    pub adjacency: HashMap<String, Vec<String>>,

    /// Optional per-entity metadata, opaque to the pipeline.
    #[serde(default)]
    pub metadata: HashMap<String, HashMap<String, String>>,
}

impl GraphHints {
    /// Creates hints from an adjacency mapping.
    pub fn from_adjacency(adjacency: HashMap<String, Vec<String>>) -> Self {
        Self { adjacency, metadata: HashMap::new() }
    }

    /// Shortest undirected path length from `from` to `to`, bounded at
    /// `max_depth` hops. Returns `None` when either endpoint is missing
    /// from the graph or no path exists within the bound.
    pub fn distance(&self, from: &str, to: &str, max_depth: usize) -> Option<usize> {
        if from == to {
            return Some(0);
        }
        if !self.contains(from) || !self.contains(to) {
            return None;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(from);
        queue.push_back((from, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for neighbour in self.neighbours(node) {
                if neighbour == to {
                    return Some(depth + 1);
                }
                if visited.insert(neighbour) {
                    queue.push_back((neighbour, depth + 1));
                }
            }
        }
        None
    }

    /// True when the entity appears as a node or a neighbour.
    fn contains(&self, entity: &str) -> bool {
        self.adjacency.contains_key(entity)
            || self.adjacency.values().any(|neighbours| {
                neighbours.iter().any(|neighbour| neighbour == entity)
            })
    }

    /// Undirected neighbourhood of an entity: declared neighbours plus any
    /// node that declares the entity as its own neighbour.
    fn neighbours<'a>(&'a self, entity: &str) -> Vec<&'a str> {
        let mut out: Vec<&str> = self
            .adjacency
            .get(entity)
            .map(|neighbours| neighbours.iter().map(String::as_str).collect())
            .unwrap_or_default();
        for (node, neighbours) in &self.adjacency {
            if neighbours.iter().any(|neighbour| neighbour == entity) {
                out.push(node.as_str());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> GraphHints {
        GraphHints::from_adjacency(HashMap::from([
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["c".to_string()]),
        ]))
    }

    #[test]
    fn distance_follows_chain() {
        let graph = chain();
        assert_eq!(graph.distance("a", "b", 4), Some(1));
        assert_eq!(graph.distance("a", "c", 4), Some(2));
        assert_eq!(graph.distance("a", "a", 4), Some(0));
    }

    #[test]
    fn distance_is_undirected() {
        let graph = chain();
        assert_eq!(graph.distance("c", "a", 4), Some(2));
    }

    #[test]
    fn distance_respects_depth_bound() {
        let graph = GraphHints::from_adjacency(HashMap::from([
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["c".to_string()]),
            ("c".to_string(), vec!["d".to_string()]),
            ("d".to_string(), vec!["e".to_string()]),
            ("e".to_string(), vec!["f".to_string()]),
        ]));
        assert_eq!(graph.distance("a", "e", 4), Some(4));
        assert_eq!(graph.distance("a", "f", 4), None);
    }

    #[test]
    fn missing_endpoints_are_unreachable() {
        let graph = chain();
        assert_eq!(graph.distance("a", "zz", 4), None);
        assert_eq!(graph.distance("zz", "a", 4), None);
    }
}
