//! The dependency graph between controls and derivations.
//!
//! Edges point from an input to the vertex that reads it, so walking the
//! graph forward from a control visits exactly the derivations that have to
//! be recomputed after the control changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;

use crate::core::ArcStr;
use crate::engine::node::DerivationNode;
use crate::error::EngineError;

pub(crate) enum Vertex {
    Control(ArcStr),
    Node(DerivationNode),
    /// A name used as an input before it was registered.
    Pending(ArcStr),
}

impl Vertex {
    pub(crate) fn name(&self) -> &ArcStr {
        match self {
            Vertex::Control(name) | Vertex::Pending(name) => name,
            Vertex::Node(node) => &node.name,
        }
    }
}

#[derive(Default)]
pub(crate) struct DependencyGraph {
    pub(crate) graph: Graph<Vertex, ()>,
    lookup: HashMap<ArcStr, NodeIndex>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.lookup.get(name).copied()
    }

    /// Whether `name` is a registered control or derivation, as opposed to
    /// unknown or only referenced so far.
    pub(crate) fn is_declared(&self, name: &str) -> bool {
        self.index_of(name)
            .is_some_and(|index| !matches!(self.graph[index], Vertex::Pending(_)))
    }

    pub(crate) fn add_control(&mut self, name: ArcStr) -> Result<NodeIndex, EngineError> {
        match self.lookup.get(&name) {
            Some(&index) if matches!(self.graph[index], Vertex::Pending(_)) => {
                self.graph[index] = Vertex::Control(name);
                Ok(index)
            }
            Some(_) => Err(EngineError::DuplicateName(name)),
            None => {
                let index = self.graph.add_node(Vertex::Control(name.clone()));
                self.lookup.insert(name, index);
                Ok(index)
            }
        }
    }

    /// Records `node` together with an edge from each of its declared inputs.
    ///
    /// Inputs that are not known yet become pending vertices. An edge that
    /// would close a cycle is rejected before anything is inserted.
    pub(crate) fn register(&mut self, node: DerivationNode) -> Result<NodeIndex, EngineError> {
        let name = node.name.clone();
        let existing = self.lookup.get(&name).copied();

        if let Some(index) = existing
            && !matches!(self.graph[index], Vertex::Pending(_))
        {
            return Err(EngineError::DuplicateName(name));
        }

        for input in &node.inputs {
            let cyclic = match (existing, self.lookup.get(input)) {
                _ if *input == name => true,
                // Another vertex already reads this pending name; the new
                // edge closes a cycle if the input is downstream of it.
                (Some(index), Some(&input_index)) => {
                    has_path_connecting(&self.graph, index, input_index, None)
                }
                _ => false,
            };

            if cyclic {
                return Err(EngineError::CyclicDependency {
                    node: name,
                    input: input.clone(),
                });
            }
        }

        let inputs = node.inputs.clone();
        let index = match existing {
            Some(index) => {
                self.graph[index] = Vertex::Node(node);
                index
            }
            None => {
                let index = self.graph.add_node(Vertex::Node(node));
                self.lookup.insert(name, index);
                index
            }
        };

        let mut seen = HashSet::new();
        for input in inputs {
            if !seen.insert(input.clone()) {
                continue;
            }

            let input_index = match self.lookup.get(&input) {
                Some(&input_index) => input_index,
                None => {
                    let input_index = self.graph.add_node(Vertex::Pending(input.clone()));
                    self.lookup.insert(input, input_index);
                    input_index
                }
            };

            self.graph.add_edge(input_index, index, ());
        }

        Ok(index)
    }

    /// Finds the first input that was referenced but never registered.
    pub(crate) fn unresolved(&self) -> Option<EngineError> {
        self.graph.raw_edges().iter().find_map(|edge| {
            match &self.graph[edge.source()] {
                Vertex::Pending(input) => Some(EngineError::UnknownInput {
                    node: self.graph[edge.target()].name().clone(),
                    input: input.clone(),
                }),
                _ => None,
            }
        })
    }

    /// Marks every derivation reachable from `control` as stale and returns
    /// how many of them were fresh before.
    pub(crate) fn mark_changed(&mut self, control: &str) -> Result<usize, EngineError> {
        let start = self
            .index_of(control)
            .filter(|&index| matches!(self.graph[index], Vertex::Control(_)))
            .ok_or_else(|| EngineError::UnknownControl(Arc::from(control)))?;

        let mut marked = 0;
        let mut dfs = Dfs::new(&self.graph, start);

        while let Some(index) = dfs.next(&self.graph) {
            if let Vertex::Node(node) = &mut self.graph[index]
                && node.invalidate()
            {
                marked += 1;
            }
        }

        Ok(marked)
    }

    pub(crate) fn node(&self, index: NodeIndex) -> Option<&DerivationNode> {
        match self.graph.node_weight(index) {
            Some(Vertex::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> Option<&mut DerivationNode> {
        match self.graph.node_weight_mut(index) {
            Some(Vertex::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// Derivations among the declared inputs of `index`, in declaration order.
    pub(crate) fn upstream_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let Some(node) = self.node(index) else {
            return vec![];
        };

        node.inputs
            .iter()
            .filter_map(|input| self.index_of(input))
            .filter(|&input| self.node(input).is_some())
            .collect()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &DerivationNode> {
        self.graph.node_weights().filter_map(|vertex| match vertex {
            Vertex::Node(node) => Some(node),
            _ => None,
        })
    }
}
