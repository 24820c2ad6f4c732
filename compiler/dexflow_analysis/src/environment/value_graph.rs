//! Dependency graph between values.
//!
//! An edge `a -> b` means "if `b` depends on the environment, so does `a`".

use dexflow_ir::ValueId;
use petgraph::algo::{condensation, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub(super) struct ValueGraph {
    graph: DiGraph<ValueId, ()>,
    nodes: FxHashMap<ValueId, NodeIndex>,
}

impl ValueGraph {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn node(&mut self, value: ValueId) -> NodeIndex {
        if let Some(&node) = self.nodes.get(&value) {
            return node;
        }
        let node = self.graph.add_node(value);
        self.nodes.insert(value, node);
        node
    }

    pub(super) fn add_edge(&mut self, from: ValueId, to: ValueId) {
        let from = self.node(from);
        let to = self.node(to);
        self.graph.update_edge(from, to, ());
    }

    pub(super) fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Can every node be proven independent of the environment?
    ///
    /// Strongly connected components are merged first, so mutually
    /// dependent values are decided together. Starting from "all nodes
    /// dependent", a node becomes independent once all its successors are.
    pub(super) fn is_environment_independent(&self) -> bool {
        let condensed = condensation(self.graph.clone(), true);
        debug_assert!(
            !is_cyclic_directed(&condensed),
            "condensed value graph must be acyclic"
        );

        let mut dependent = vec![true; condensed.node_count()];
        let mut remaining = condensed.node_count();
        let mut iterations = 0usize;
        while remaining > 0 {
            iterations += 1;
            let ready: Vec<NodeIndex> = condensed
                .node_indices()
                .filter(|&n| dependent[n.index()])
                .filter(|&n| {
                    condensed
                        .neighbors_directed(n, Direction::Outgoing)
                        .all(|succ| !dependent[succ.index()])
                })
                .collect();
            if ready.is_empty() {
                tracing::trace!(remaining, iterations, "value graph fixpoint stuck");
                return false;
            }
            for node in ready {
                dependent[node.index()] = false;
                remaining -= 1;
            }
        }
        tracing::trace!(
            nodes = self.graph.node_count(),
            components = condensed.node_count(),
            iterations,
            "value graph fixpoint converged"
        );
        true
    }
}
