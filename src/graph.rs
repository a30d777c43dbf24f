use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::ops::Index;

use crate::error::PackageError;
use crate::registry::{PackageState, Registry};
use crate::types::PackageName;

/// Dependency graph over the packages a registry knows about.
///
/// Edges point from a prerequisite to the package that requires it, so
/// a topological order is a valid load order.
pub struct PackageGraph {
    graph: DiGraph<Node, ()>,
    node_map: HashMap<PackageName, NodeIndex>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: PackageName,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Loaded,
    Failed,
}

impl From<&PackageState> for NodeStatus {
    fn from(state: &PackageState) -> Self {
        match state {
            PackageState::Pending => Self::Pending,
            PackageState::Loaded => Self::Loaded,
            PackageState::Failed(_) => Self::Failed,
        }
    }
}

impl PackageGraph {
    /// Snapshot the registry's packages and declared prerequisites.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        };
        for (name, state, _) in registry.packages() {
            graph.add_package(name, state.into());
        }
        for (name, _, prerequisites) in registry.packages() {
            for prerequisite in prerequisites {
                graph.add_dependency(prerequisite, name);
            }
        }
        graph
    }

    fn add_package(&mut self, name: &PackageName, status: NodeStatus) -> NodeIndex {
        if let Some(index) = self.node_map.get(name) {
            return *index;
        }
        let index = self.graph.add_node(Node {
            name: name.clone(),
            status,
        });
        self.node_map.insert(name.clone(), index);
        index
    }

    fn add_dependency(&mut self, prerequisite: &PackageName, dependent: &PackageName) {
        let source = self.add_package(prerequisite, NodeStatus::Pending);
        let target = self.add_package(dependent, NodeStatus::Pending);
        self.graph.update_edge(source, target, ());
    }

    /// Package names in an order where prerequisites come first.
    pub fn build_order(&self) -> Result<Vec<PackageName>, PackageError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .map(|index| self.graph[index].name.clone())
                    .collect()
            })
            .map_err(|cycle| {
                let name = self.graph[cycle.node_id()].name.to_string();
                PackageError::Cycle {
                    package: name.clone(),
                    involving: name,
                }
            })
    }

    pub fn get_node_index(&self, name: &str) -> Option<NodeIndex> {
        self.node_map.get(name).copied()
    }

    /// Direct prerequisites of a package.
    pub fn prerequisites(&self, name: &str) -> Vec<PackageName> {
        let Some(index) = self.get_node_index(name) else {
            return Vec::new();
        };
        let mut names: Vec<_> = self
            .graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .map(|neighbor| self.graph[neighbor].name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.raw_nodes().iter().map(|node| &node.weight)
    }

    /// Write the graph to a DOT file
    pub fn write_dot_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.dot())
            .map_err(|e| anyhow::anyhow!("Failed to write DOT file: {e}"))?;
        Ok(())
    }

    pub fn dot(&self) -> String {
        let mut output = String::from("digraph PackageGraph {\n");
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [fontname=\"Arial\", fontsize=10];\n");

        for node_index in self.graph.node_indices() {
            let node = &self.graph[node_index];
            let color = match node.status {
                NodeStatus::Loaded => "lightgreen",
                NodeStatus::Pending => "lightblue",
                NodeStatus::Failed => "salmon",
            };
            output.push_str(&format!(
                "  {} [label=\"{}\", shape=box, fillcolor={color}, style=\"rounded,filled\"];\n",
                node_index.index(),
                node.name
            ));
        }

        for edge_ref in self.graph.edge_references() {
            output.push_str(&format!(
                "  {} -> {};\n",
                edge_ref.source().index(),
                edge_ref.target().index()
            ));
        }

        output.push_str("}\n");
        output
    }
}

impl std::fmt::Debug for PackageGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let edges: Vec<String> = self
            .graph
            .edge_references()
            .map(|edge| {
                format!(
                    "{} -> {}",
                    self.graph[edge.source()].name,
                    self.graph[edge.target()].name
                )
            })
            .collect();
        f.debug_struct("PackageGraph")
            .field("nodes", &self.nodes().collect::<Vec<_>>())
            .field("edges", &edges)
            .finish()
    }
}

impl Index<NodeIndex> for PackageGraph {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.graph[index]
    }
}

/// Check whether declaring `name` with `prerequisites` would close a
/// cycle, returning a package on it.
pub(crate) fn find_cycle(
    registry: &Registry,
    name: &PackageName,
    prerequisites: &[PackageName],
) -> Option<PackageName> {
    if prerequisites.is_empty() {
        return None;
    }
    let mut graph = PackageGraph::from_registry(registry);
    for prerequisite in prerequisites {
        graph.add_dependency(prerequisite, name);
    }
    petgraph::algo::toposort(&graph.graph, None)
        .err()
        .map(|cycle| graph.graph[cycle.node_id()].name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackageDefinition;

    fn names(order: &[PackageName]) -> Vec<&str> {
        order.iter().map(PackageName::as_str).collect()
    }

    #[test]
    fn test_build_order_puts_prerequisites_first() {
        let mut registry = Registry::new();
        registry
            .declare(PackageDefinition::new("main", |_| Ok(())).require(["fx", "cssColor"]))
            .unwrap();
        registry
            .declare(PackageDefinition::new("fx", |_| Ok(())).require(["css", "dom"]))
            .unwrap();

        let graph = PackageGraph::from_registry(&registry);
        let order = graph.build_order().unwrap();
        let position = |name: &str| names(&order).iter().position(|n| *n == name).unwrap();
        assert!(position("css") < position("fx"));
        assert!(position("dom") < position("fx"));
        assert!(position("fx") < position("main"));
        assert!(position("cssColor") < position("main"));

        let fx = PackageName::parse("fx").unwrap();
        let css = PackageName::parse("css").unwrap();
        let dom = PackageName::parse("dom").unwrap();
        assert_eq!(graph.prerequisites("fx"), vec![css, dom]);
        assert!(graph.prerequisites("unknown").is_empty());
        assert_eq!(graph[graph.get_node_index("fx").unwrap()].name, fx);
    }

    #[test]
    fn test_dot_output_reflects_status() {
        let mut registry = Registry::new();
        registry
            .declare(PackageDefinition::new("utils", |_| Ok(())))
            .unwrap();
        registry
            .declare(PackageDefinition::new("str", |_| Ok(())).require(["utils", "json"]))
            .unwrap();

        let dot = PackageGraph::from_registry(&registry).dot();
        assert!(dot.starts_with("digraph PackageGraph {"));
        assert!(dot.contains("label=\"utils\", shape=box, fillcolor=lightgreen"));
        assert!(dot.contains("label=\"json\", shape=box, fillcolor=lightblue"));
        assert_eq!(dot.matches(" -> ").count(), 2);
    }

    #[test]
    fn test_find_cycle_detects_indirect_cycle() {
        let mut registry = Registry::new();
        registry
            .declare(PackageDefinition::new("a", |_| Ok(())).require(["b"]))
            .unwrap();
        registry
            .declare(PackageDefinition::new("b", |_| Ok(())).require(["c"]))
            .unwrap();

        let c = PackageName::parse("c").unwrap();
        let a = PackageName::parse("a").unwrap();
        let d = PackageName::parse("d").unwrap();
        assert!(find_cycle(&registry, &c, std::slice::from_ref(&a)).is_some());
        assert!(find_cycle(&registry, &c, std::slice::from_ref(&d)).is_none());
    }
}
