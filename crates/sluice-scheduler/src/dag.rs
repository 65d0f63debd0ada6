//! DAG resolution for pipeline stages.
//!
//! Every pipeline document becomes a node, including documents whose trigger
//! did not match. Skipped nodes stay in the graph so that dependencies can be
//! rewritten through them onto their nearest non-skipped ancestors.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("Dependency cycle detected in Pipeline")]
    CycleDetected,
    #[error("Unknown stage dependency: {dependency} (required by {stage})")]
    UnknownDependency { stage: String, dependency: String },
    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),
}

/// A node in the stage DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub name: String,
    /// Direct dependencies in declaration order.
    pub depends_on: Vec<String>,
    /// Set when the document's trigger did not match.
    pub skip: bool,
}

/// Directed acyclic graph of the documents of one execution.
/// Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct StageDag {
    graph: DiGraph<DagNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl StageDag {
    pub fn get(&self, name: &str) -> Option<&DagNode> {
        self.name_to_index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Get all nodes in insertion order.
    pub fn nodes(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Get topologically sorted nodes.
    pub fn topological_order(&self) -> Result<Vec<&DagNode>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|_| DagError::CycleDetected)
    }

    /// Effective dependencies of `name` once skipped documents are removed.
    ///
    /// A skipped direct dependency is replaced by its own effective
    /// dependencies, recursively. The result keeps declaration order and holds
    /// each name once.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        let mut combined = Vec::new();
        if let Some(&idx) = self.name_to_index.get(name) {
            self.collect_dependencies(idx, &mut combined);
        }
        combined
    }

    fn collect_dependencies(&self, idx: NodeIndex, combined: &mut Vec<String>) {
        for dep in &self.graph[idx].depends_on {
            let Some(&dep_idx) = self.name_to_index.get(dep) else {
                continue;
            };
            let node = &self.graph[dep_idx];
            if node.skip {
                self.collect_dependencies(dep_idx, combined);
            } else if !combined.contains(&node.name) {
                combined.push(node.name.clone());
            }
        }
    }
}

/// Builder for constructing stage DAGs.
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<DagNode>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Nodes start out skipped; see [`DagBuilder::set_skip`].
    pub fn add(&mut self, name: impl Into<String>, depends_on: &[String]) -> &mut Self {
        self.nodes.push(DagNode {
            name: name.into(),
            depends_on: depends_on.to_vec(),
            skip: true,
        });
        self
    }

    /// Mark the most recently added node as matched or skipped.
    pub fn set_skip(&mut self, skip: bool) -> &mut Self {
        if let Some(node) = self.nodes.last_mut() {
            node.skip = skip;
        }
        self
    }

    /// Validate names and dependencies, then check for cycles.
    pub fn build(self) -> Result<StageDag, DagError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        // Add all documents as nodes
        for node in self.nodes {
            if name_to_index.contains_key(&node.name) {
                return Err(DagError::DuplicateStage(node.name));
            }
            let name = node.name.clone();
            let idx = graph.add_node(node);
            name_to_index.insert(name, idx);
        }

        // Add edges for dependencies
        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            let node = &graph[idx];
            for dep in &node.depends_on {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| DagError::UnknownDependency {
                    stage: node.name.clone(),
                    dependency: dep.clone(),
                })?;
                edges.push((*dep_idx, idx));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        let dag = StageDag {
            graph,
            name_to_index,
        };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn build(nodes: &[(&str, &[&str], bool)]) -> Result<StageDag, DagError> {
        let mut builder = DagBuilder::new();
        for (name, depends_on, skip) in nodes {
            builder.add(*name, &deps(depends_on)).set_skip(*skip);
        }
        builder.build()
    }

    #[test]
    fn test_linear_dag() {
        let dag = build(&[("a", &[], false), ("b", &["a"], false), ("c", &["b"], false)]).unwrap();

        let order: Vec<_> = dag
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(dag.dependencies("c"), deps(&["b"]));
        assert!(dag.dependencies("a").is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let err = build(&[("a", &["b"], false), ("b", &["a"], false)]).unwrap_err();
        assert_eq!(err, DagError::CycleDetected);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = build(&[("a", &["a"], false)]).unwrap_err();
        assert_eq!(err, DagError::CycleDetected);
    }

    #[test]
    fn test_cycle_through_skipped_nodes() {
        let err = build(&[("a", &["c"], true), ("b", &["a"], false), ("c", &["b"], true)])
            .unwrap_err();
        assert_eq!(err, DagError::CycleDetected);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = build(&[("a", &["missing"], false)]).unwrap_err();
        assert_eq!(
            err,
            DagError::UnknownDependency {
                stage: "a".into(),
                dependency: "missing".into()
            }
        );
    }

    #[test]
    fn test_duplicate_stage() {
        let err = build(&[("a", &[], false), ("a", &[], false)]).unwrap_err();
        assert_eq!(err, DagError::DuplicateStage("a".into()));
    }

    #[test]
    fn test_dependencies_skip_through_to_ancestors() {
        // a -> b(skipped) -> c
        let dag = build(&[("a", &[], false), ("b", &["a"], true), ("c", &["b"], false)]).unwrap();
        assert_eq!(dag.dependencies("c"), deps(&["a"]));
    }

    #[test]
    fn test_dependencies_skip_chain_to_nothing() {
        let dag = build(&[("a", &[], true), ("b", &["a"], true), ("c", &["b"], false)]).unwrap();
        assert!(dag.dependencies("c").is_empty());
    }

    #[test]
    fn test_dependencies_diamond_dedup_keeps_order() {
        //     root
        //    /    \
        //  x(s)   y(s)
        //    \    /
        //     leaf  (also depends on z)
        let dag = build(&[
            ("root", &[], false),
            ("z", &[], false),
            ("x", &["root"], true),
            ("y", &["root", "z"], true),
            ("leaf", &["x", "y"], false),
        ])
        .unwrap();

        assert_eq!(dag.dependencies("leaf"), deps(&["root", "z"]));
    }

    #[test]
    fn test_nodes_default_to_skipped() {
        let mut builder = DagBuilder::new();
        builder.add("a", &[]);
        let dag = builder.build().unwrap();
        assert!(dag.get("a").unwrap().skip);
        assert_eq!(dag.nodes().len(), 1);
    }
}
