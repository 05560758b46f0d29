//! Pack dependency resolution
//!
//! Packs form a directed graph where an edge `A -> B` means "A requires B".
//! Resolution computes the transitive closure of a selection. The graph
//! comes from manifest data and may contain mistakes, including cycles, so
//! traversal tracks what it has already resolved instead of assuming a DAG.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::constants::packs;

/// Mutable adjacency map from a pack to the packs it requires
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a manifest dependency map
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Self {
        let mut graph = Self::new();
        for (pack, requirements) in map {
            for required in requirements {
                graph.add_dependency(pack, required);
            }
        }
        graph
    }

    /// Record that `pack` requires `requires`; duplicate edges are ignored
    pub fn add_dependency(&mut self, pack: &str, requires: &str) {
        let targets = self.edges.entry(pack.to_string()).or_default();
        if !targets.iter().any(|t| t == requires) {
            targets.push(requires.to_string());
        }
    }

    /// Direct requirements of a pack, empty for packs the graph does not know
    pub fn requirements(&self, pack: &str) -> &[String] {
        self.edges.get(pack).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of packs with at least one outgoing edge
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no edges at all
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Selected packs plus everything they transitively require
    ///
    /// Uses an explicit work stack. Popping a pack that is already resolved
    /// is a no-op, which is what makes cyclic graphs terminate. Unknown packs
    /// are kept in the result but contribute nothing further.
    pub fn resolve<I, S>(&self, selected: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = selected
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        while let Some(pack) = stack.pop() {
            if resolved.contains(&pack) {
                continue;
            }
            for required in self.requirements(&pack) {
                if !resolved.contains(required) {
                    stack.push(required.clone());
                }
            }
            resolved.insert(pack);
        }

        debug!("Resolved {} packs", resolved.len());
        resolved
    }

    /// Resolve a selection after adding the always-required base pack
    pub fn resolve_with_base<I, S>(&self, selected: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seeds: Vec<String> = selected
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        seeds.push(packs::BASE_PACK.to_string());
        self.resolve(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("GP01", "EP01");
        graph.add_dependency("EP01", "Base");
        graph.add_dependency("SP01", "Base");
        graph
    }

    #[test]
    fn test_transitive_closure() {
        let graph = sample_graph();
        assert_eq!(graph.resolve(["GP01"]), set(&["GP01", "EP01", "Base"]));
        assert_eq!(
            graph.resolve(["GP01", "SP01"]),
            set(&["GP01", "EP01", "SP01", "Base"])
        );
    }

    #[test]
    fn test_cycle_terminates() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("A", "B");
        graph.add_dependency("B", "A");
        assert_eq!(graph.resolve(["A"]), set(&["A", "B"]));
    }

    #[test]
    fn test_self_loop_terminates() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("A", "A");
        assert_eq!(graph.resolve(["A"]), set(&["A"]));
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("EP01", "Base");
        graph.add_dependency("EP01", "Base");
        assert_eq!(graph.requirements("EP01").len(), 1);
    }

    #[test]
    fn test_unknown_pack_contributes_nothing() {
        let graph = sample_graph();
        assert_eq!(graph.resolve(["FP99"]), set(&["FP99"]));
        assert!(graph.requirements("FP99").is_empty());
    }

    #[test]
    fn test_resolve_with_base_always_includes_base() {
        let graph = DependencyGraph::new();
        let resolved = graph.resolve_with_base(Vec::<String>::new());
        assert_eq!(resolved, set(&["Base"]));
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut graph = DependencyGraph::new();
        for i in 0..50_000 {
            graph.add_dependency(&format!("P{}", i), &format!("P{}", i + 1));
        }
        assert_eq!(graph.resolve(["P0"]).len(), 50_001);
    }

    #[test]
    fn test_from_map() {
        let mut map = BTreeMap::new();
        map.insert("GP01".to_string(), vec!["EP01".to_string()]);
        let graph = DependencyGraph::from_map(&map);
        assert_eq!(graph.requirements("GP01"), &["EP01".to_string()]);
        assert_eq!(graph.len(), 1);
    }
}
